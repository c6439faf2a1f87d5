//! Block-change monitor.
//!
//! Subscribes to the node's notification endpoints (newline-delimited JSON
//! frames over TCP) and surfaces [`BlockEvent`]s to the control loop through
//! a non-blocking `poll`. When no endpoint is reachable the monitor degrades
//! to polling the node's best block hash and synthesizing events from the
//! diff, so event-driven and polling refresh share one consumption path.

use crate::monitor::events::{BlockEvent, BlockEventKind, NotificationFrame};
use crate::rpc::client::NodeClient;
use crate::runtime::backoff::{next_backoff, sleep_with_cancellation};
use anyhow::Result;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RECONNECT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connection state of the monitor, advanced by its background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Disconnected,
    Connected,
    Watching,
}

/// How the monitor ended up sourcing events after `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// At least one notification endpoint accepted the subscription.
    Subscribed,
    /// No endpoint was reachable; the caller should start the polling
    /// fallback. A soft failure, not an error.
    PollingFallback,
}

#[derive(Debug, Default)]
struct SharedState(AtomicU8);

impl SharedState {
    fn set(&self, state: MonitorState) {
        let value = match state {
            MonitorState::Disconnected => 0,
            MonitorState::Connected => 1,
            MonitorState::Watching => 2,
        };
        self.0.store(value, Ordering::SeqCst);
    }

    fn get(&self) -> MonitorState {
        match self.0.load(Ordering::SeqCst) {
            1 => MonitorState::Connected,
            2 => MonitorState::Watching,
            _ => MonitorState::Disconnected,
        }
    }
}

pub struct ChainMonitor {
    event_tx: mpsc::Sender<BlockEvent>,
    event_rx: mpsc::Receiver<BlockEvent>,
    state: Arc<SharedState>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ChainMonitor {
    pub fn new(shutdown: CancellationToken) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            event_tx,
            event_rx,
            state: Arc::new(SharedState::default()),
            shutdown,
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state.get()
    }

    /// Handle through which alternative notification sources (or tests) can
    /// inject events into the monitor's queue.
    pub fn event_sender(&self) -> mpsc::Sender<BlockEvent> {
        self.event_tx.clone()
    }

    /// Attempts a non-blocking subscription against the configured endpoints.
    ///
    /// On success a background task owns the connection and reconnects with
    /// backoff after channel errors. When every endpoint is unreachable the
    /// monitor stays in `Disconnected` and reports `PollingFallback`.
    pub async fn connect(&mut self, endpoints: &[String]) -> Result<ConnectOutcome> {
        if endpoints.is_empty() {
            tracing::info!(
                target: "mineloop::monitor",
                "no notification endpoints configured; using polling fallback"
            );
            return Ok(ConnectOutcome::PollingFallback);
        }

        match try_connect_any(endpoints).await {
            Some((endpoint, stream)) => {
                self.state.set(MonitorState::Connected);
                tracing::info!(
                    target: "mineloop::monitor",
                    endpoint = %endpoint,
                    "subscribed to notification endpoint"
                );

                let task = spawn_subscription_task(
                    endpoints.to_vec(),
                    Some(stream),
                    self.event_tx.clone(),
                    self.state.clone(),
                    self.shutdown.clone(),
                );
                self.tasks.push(task);
                Ok(ConnectOutcome::Subscribed)
            }
            None => {
                tracing::warn!(
                    target: "mineloop::monitor",
                    endpoints = endpoints.len(),
                    "no notification endpoint reachable; falling back to polling"
                );
                Ok(ConnectOutcome::PollingFallback)
            }
        }
    }

    /// Starts the polling fallback: diffs the node's best block hash on an
    /// interval and synthesizes `NewBlock` events.
    pub fn start_polling(&mut self, node: Arc<dyn NodeClient>, poll_interval: Duration) {
        let event_tx = self.event_tx.clone();
        let shutdown = self.shutdown.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_hash: Option<String> = None;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match node.best_block_hash().await {
                            Ok(hash) => {
                                let changed = last_hash.as_deref() != Some(hash.as_str());
                                if changed {
                                    if last_hash.is_some() {
                                        let event = BlockEvent::new(
                                            BlockEventKind::NewBlock,
                                            hash.clone(),
                                        );
                                        if event_tx.send(event).await.is_err() {
                                            break;
                                        }
                                    }
                                    last_hash = Some(hash);
                                }
                            }
                            Err(err) => {
                                tracing::debug!(
                                    target: "mineloop::monitor",
                                    error = %err,
                                    "best-block poll failed; will retry next tick"
                                );
                            }
                        }
                    }
                }
            }
        });
        self.tasks.push(task);
    }

    /// Non-blocking check for a pending event; at most one event per call so
    /// a burst cannot starve the rest of the control loop.
    pub fn poll(&mut self) -> Option<BlockEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Cancels background tasks and waits for them to finish.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                tracing::warn!(target: "mineloop::monitor", error = %err, "monitor task panicked");
            }
        }
        self.state.set(MonitorState::Disconnected);
    }
}

async fn try_connect_any(endpoints: &[String]) -> Option<(String, TcpStream)> {
    for endpoint in endpoints {
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(endpoint.as_str())).await {
            Ok(Ok(stream)) => return Some((endpoint.clone(), stream)),
            Ok(Err(err)) => {
                tracing::debug!(
                    target: "mineloop::monitor",
                    endpoint = %endpoint,
                    error = %err,
                    "notification endpoint refused connection"
                );
            }
            Err(_) => {
                tracing::debug!(
                    target: "mineloop::monitor",
                    endpoint = %endpoint,
                    "notification endpoint connect timed out"
                );
            }
        }
    }
    None
}

fn spawn_subscription_task(
    endpoints: Vec<String>,
    initial_stream: Option<TcpStream>,
    event_tx: mpsc::Sender<BlockEvent>,
    state: Arc<SharedState>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = initial_stream;
        let mut backoff = RECONNECT_INITIAL_BACKOFF;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let connected = match stream.take() {
                Some(stream) => stream,
                None => match try_connect_any(&endpoints).await {
                    Some((endpoint, stream)) => {
                        tracing::info!(
                            target: "mineloop::monitor",
                            endpoint = %endpoint,
                            "notification subscription re-established"
                        );
                        stream
                    }
                    None => {
                        state.set(MonitorState::Disconnected);
                        if sleep_with_cancellation(backoff, &shutdown).await.is_err() {
                            break;
                        }
                        backoff = next_backoff(backoff, RECONNECT_MAX_BACKOFF);
                        continue;
                    }
                },
            };

            state.set(MonitorState::Watching);
            backoff = RECONNECT_INITIAL_BACKOFF;

            if read_frames(connected, &event_tx, &shutdown).await.is_err() {
                break;
            }

            state.set(MonitorState::Disconnected);
            tracing::warn!(
                target: "mineloop::monitor",
                "notification channel dropped; reconnecting"
            );
        }

        state.set(MonitorState::Disconnected);
    })
}

/// Reads newline-delimited JSON frames until the stream closes or shutdown
/// fires. Returns `Err` only on shutdown so the outer loop can exit.
async fn read_frames(
    stream: TcpStream,
    event_tx: &mpsc::Sender<BlockEvent>,
    shutdown: &CancellationToken,
) -> Result<(), ()> {
    let mut lines = BufReader::new(stream).lines();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Err(()),
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    // EOF or transport error: reconnect.
                    Ok(None) | Err(_) => return Ok(()),
                };

                match serde_json::from_str::<NotificationFrame>(&line) {
                    Ok(frame) => {
                        let event = BlockEvent::new(frame.kind, frame.id);
                        if event_tx.send(event).await.is_err() {
                            return Err(());
                        }
                    }
                    Err(err) => {
                        tracing::debug!(
                            target: "mineloop::monitor",
                            error = %err,
                            "skipping malformed notification frame"
                        );
                    }
                }
            }
        }
    }
}
