//! Worker pool supervision: launching daemon processes, liveness sweeps with
//! automatic relaunch, graceful teardown, and the emergency kill path.

use crate::coordination::area::CoordinationArea;
use crate::pipeline::state::PipelineState;
use crate::runtime::config::LoopConfig;
use crate::supervisor::daemon::{fresh_instance_id, DaemonStatus, WorkerDaemon};
use anyhow::{bail, Context, Result};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use uuid::Uuid;

/// Environment variable stamped onto every worker process. Its value is the
/// pool marker, which lets [`emergency_kill_all`] find strays without a pid
/// list.
pub const WORKER_ENV_MARKER: &str = "MINELOOP_WORKER";

/// A daemon that died this many times is left down until the next
/// `start_pool`; relaunching past this point is a crash loop, not recovery.
const MAX_RELAUNCH_ATTEMPTS: u32 = 10;

pub struct DaemonSupervisor {
    worker_command: Vec<String>,
    shutdown_grace: Duration,
    restart_cooldown: Duration,
    area: Arc<CoordinationArea>,
    state: Arc<PipelineState>,
    daemons: Vec<WorkerDaemon>,
    pool_marker: String,
    adjustment_reason: Option<String>,
}

impl DaemonSupervisor {
    pub fn new(
        config: &LoopConfig,
        area: Arc<CoordinationArea>,
        state: Arc<PipelineState>,
    ) -> Self {
        Self {
            worker_command: config.worker_command().to_vec(),
            shutdown_grace: config.shutdown_grace(),
            restart_cooldown: config.restart_cooldown(),
            area,
            state,
            daemons: Vec::new(),
            pool_marker: format!("pool-{}", Uuid::new_v4().simple()),
            adjustment_reason: None,
        }
    }

    /// Marker value shared by every process this supervisor launches.
    pub fn pool_marker(&self) -> &str {
        &self.pool_marker
    }

    /// Why the requested worker count was adjusted on the last `start_pool`,
    /// if it was.
    pub fn adjustment_reason(&self) -> Option<&str> {
        self.adjustment_reason.as_deref()
    }

    /// Ordinals of the slots managed by this pool.
    pub fn ordinals(&self) -> Vec<u32> {
        self.daemons.iter().map(|daemon| daemon.ordinal).collect()
    }

    pub fn alive_count(&self) -> usize {
        self.daemons.iter().filter(|d| d.is_alive()).count()
    }

    /// Launches the pool, clamping the requested count to the hardware
    /// ceiling. Individual launch failures are recorded and skipped; the call
    /// fails only when not a single daemon could be started.
    pub async fn start_pool(&mut self, requested: usize) -> Result<usize> {
        if self.alive_count() > 0 {
            bail!("worker pool is already running");
        }

        let ceiling = num_cpus::get();
        let (count, reason) = clamp_to_hardware(requested, ceiling);
        if let Some(reason) = &reason {
            tracing::warn!(
                target: "mineloop::supervisor",
                requested,
                ceiling,
                "{reason}"
            );
        }
        self.adjustment_reason = reason;

        // Ordinals are 1-based: slot 1 belongs to the first daemon.
        self.daemons = (1..=count as u32).map(WorkerDaemon::new).collect();
        self.area.ensure_layout(&self.ordinals()).await?;

        let mut started = 0;
        for index in 0..self.daemons.len() {
            match self.launch(index).await {
                Ok(()) => started += 1,
                Err(err) => {
                    let ordinal = self.daemons[index].ordinal;
                    self.state
                        .record_error(format!("worker {ordinal} failed to launch: {err:#}"));
                    self.daemons[index].status = DaemonStatus::Failed;
                }
            }
        }

        if started == 0 {
            bail!("no worker daemon could be started out of {count} requested");
        }

        tracing::info!(
            target: "mineloop::supervisor",
            started,
            requested,
            pool_marker = %self.pool_marker,
            "worker pool started"
        );
        Ok(started)
    }

    /// One liveness sweep. Exited daemons are marked failed and relaunched
    /// under a fresh instance id once the restart cooldown has elapsed.
    /// Returns the number of daemons relaunched.
    pub async fn health_check(&mut self) -> Result<usize> {
        let mut relaunched = 0;

        for index in 0..self.daemons.len() {
            let exited = match self.daemons[index].child.as_mut() {
                Some(child) => match child.try_wait() {
                    Ok(Some(exit)) => Some(exit),
                    Ok(None) => {
                        self.daemons[index].status = DaemonStatus::Running;
                        None
                    }
                    Err(err) => {
                        let ordinal = self.daemons[index].ordinal;
                        self.state
                            .record_error(format!("worker {ordinal} liveness probe failed: {err}"));
                        None
                    }
                },
                None => None,
            };

            if let Some(exit) = exited {
                let daemon = &mut self.daemons[index];
                daemon.child = None;
                daemon.status = DaemonStatus::Failed;
                daemon.dead_letters += 1;
                tracing::warn!(
                    target: "mineloop::supervisor",
                    ordinal = daemon.ordinal,
                    instance_id = %daemon.instance_id,
                    exit_status = %exit,
                    "worker daemon exited unexpectedly"
                );
            }

            if self.daemons[index].status == DaemonStatus::Failed
                && self.should_relaunch(index)
            {
                let ordinal = self.daemons[index].ordinal;
                self.daemons[index].instance_id = fresh_instance_id(ordinal);
                self.daemons[index].last_restart = Some(Instant::now());
                self.daemons[index].restarts += 1;

                match self.launch(index).await {
                    Ok(()) => {
                        relaunched += 1;
                        self.state.record_worker_restart();
                        tracing::info!(
                            target: "mineloop::supervisor",
                            ordinal,
                            instance_id = %self.daemons[index].instance_id,
                            restarts = self.daemons[index].restarts,
                            "worker daemon relaunched"
                        );
                    }
                    Err(err) => {
                        self.state
                            .record_error(format!("worker {ordinal} relaunch failed: {err:#}"));
                        self.daemons[index].status = DaemonStatus::Failed;
                    }
                }
            }
        }

        Ok(relaunched)
    }

    fn should_relaunch(&self, index: usize) -> bool {
        let daemon = &self.daemons[index];
        if daemon.restarts >= MAX_RELAUNCH_ATTEMPTS {
            return false;
        }
        match daemon.last_restart {
            Some(last) => last.elapsed() >= self.restart_cooldown,
            None => true,
        }
    }

    async fn launch(&mut self, index: usize) -> Result<()> {
        let (program, args) = self
            .worker_command
            .split_first()
            .context("worker_command is empty")?;

        let daemon = &mut self.daemons[index];
        let slot_dir = self.area.slot_dir(daemon.ordinal);

        daemon.status = DaemonStatus::Starting;
        let child = Command::new(program)
            .args(args)
            .arg("--ordinal")
            .arg(daemon.ordinal.to_string())
            .arg("--instance-id")
            .arg(&daemon.instance_id)
            .arg("--slot-dir")
            .arg(&slot_dir)
            .env(WORKER_ENV_MARKER, &self.pool_marker)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn worker daemon {program}"))?;

        tracing::debug!(
            target: "mineloop::supervisor",
            ordinal = daemon.ordinal,
            instance_id = %daemon.instance_id,
            pid = child.id().unwrap_or(0),
            "worker daemon spawned"
        );

        daemon.child = Some(child);
        daemon.launched_at = Some(Instant::now());
        daemon.status = DaemonStatus::Running;
        Ok(())
    }

    /// Stops every daemon. With `graceful` set each child first gets SIGTERM
    /// and the shutdown grace period to exit on its own; stragglers (and the
    /// non-graceful path) are killed outright. Idempotent: calling on an
    /// already-stopped pool is a no-op.
    pub async fn stop_pool(&mut self, graceful: bool) -> Result<()> {
        if self.alive_count() == 0 && self.daemons.iter().all(|d| d.child.is_none()) {
            return Ok(());
        }

        if graceful {
            for daemon in &self.daemons {
                if let Some(pid) = daemon.pid() {
                    // SAFETY: sending a signal to a pid we own.
                    unsafe {
                        libc::kill(pid as i32, libc::SIGTERM);
                    }
                }
            }
        }

        for daemon in &mut self.daemons {
            let Some(mut child) = daemon.child.take() else {
                daemon.status = DaemonStatus::Stopped;
                continue;
            };

            if graceful {
                match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                    Ok(Ok(exit)) => {
                        tracing::debug!(
                            target: "mineloop::supervisor",
                            ordinal = daemon.ordinal,
                            exit_status = %exit,
                            "worker daemon exited gracefully"
                        );
                        daemon.status = DaemonStatus::Stopped;
                        continue;
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(
                            target: "mineloop::supervisor",
                            ordinal = daemon.ordinal,
                            error = %err,
                            "waiting for worker daemon failed"
                        );
                    }
                    Err(_) => {
                        tracing::warn!(
                            target: "mineloop::supervisor",
                            ordinal = daemon.ordinal,
                            grace_ms = self.shutdown_grace.as_millis() as u64,
                            "worker daemon ignored SIGTERM; killing"
                        );
                    }
                }
            }

            if let Err(err) = child.kill().await {
                tracing::warn!(
                    target: "mineloop::supervisor",
                    ordinal = daemon.ordinal,
                    error = %err,
                    "failed to kill worker daemon"
                );
            }
            daemon.status = DaemonStatus::Stopped;
        }

        tracing::info!(target: "mineloop::supervisor", graceful, "worker pool stopped");
        Ok(())
    }
}

/// Applies the hardware ceiling to a requested worker count. Returns the
/// effective count and, when it differs from the request, the reason.
fn clamp_to_hardware(requested: usize, ceiling: usize) -> (usize, Option<String>) {
    if requested == 0 {
        return (
            ceiling,
            Some(format!(
                "worker count 0 interpreted as hardware ceiling of {ceiling}"
            )),
        );
    }
    if requested > ceiling {
        return (
            ceiling,
            Some(format!(
                "requested {requested} workers exceeds the {ceiling} available cpus; starting {ceiling}"
            )),
        );
    }
    (requested, None)
}

/// Last-resort cleanup: scans `/proc` for worker processes and sends SIGKILL.
/// Works without any supervisor state, so it can run from a fresh process
/// after a crashed orchestrator. With a marker only that pool's processes
/// match; without one, every process carrying the worker environment
/// variable is swept, whatever pool launched it. Returns the number of
/// processes killed.
pub fn emergency_kill_all(marker: Option<&str>) -> Result<usize> {
    let own_pid = std::process::id();
    let mut killed = 0;

    let entries = std::fs::read_dir("/proc").context("failed to read /proc")?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        if pid == own_pid {
            continue;
        }

        let environ = match std::fs::read(entry.path().join("environ")) {
            Ok(environ) => environ,
            Err(_) => continue,
        };
        if !environ_matches(&environ, marker) {
            continue;
        }

        // SAFETY: SIGKILL to a pid identified by our own marker.
        let result = unsafe { libc::kill(pid as i32, libc::SIGKILL) };
        if result == 0 {
            killed += 1;
            tracing::warn!(target: "mineloop::supervisor", pid, "emergency-killed worker daemon");
        }
    }

    Ok(killed)
}

/// Matches a NUL-separated `/proc/<pid>/environ` blob against the worker
/// variable: exact `MINELOOP_WORKER=<marker>` when a marker is given, any
/// `MINELOOP_WORKER=` entry otherwise.
fn environ_matches(environ: &[u8], marker: Option<&str>) -> bool {
    let needle = match marker {
        Some(marker) => format!("{WORKER_ENV_MARKER}={marker}"),
        None => format!("{WORKER_ENV_MARKER}="),
    };
    environ.split(|byte| *byte == 0).any(|var| {
        if marker.is_some() {
            var == needle.as_bytes()
        } else {
            var.starts_with(needle.as_bytes())
        }
    })
}
