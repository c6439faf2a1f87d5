//! The control loop tying every pipeline component together.
//!
//! One orchestrator instance owns the worker pool, the template broadcaster,
//! the block-change monitor, and the submission coordinator. Its `run` loop
//! multiplexes periodic liveness sweeps, template refreshes, and coordination
//! area scans over a single task so phase transitions stay strictly ordered.

use crate::coordination::area::CoordinationArea;
use crate::coordination::broadcast::TemplateBroadcaster;
use crate::coordination::package::WorkerCommand;
use crate::monitor::events::BlockEvent;
use crate::monitor::watcher::{ChainMonitor, ConnectOutcome};
use crate::pipeline::hooks::ConsensusHook;
use crate::pipeline::state::{Phase, PipelineState};
use crate::rpc::client::NodeClient;
use crate::runtime::backoff::sleep_with_cancellation;
use crate::runtime::config::{LoopConfig, MiningMode, MAX_BLOCKS_PER_DAY};
use crate::runtime::fatal::FatalErrorHandler;
use crate::submission::coordinator::{AttemptOutcome, SubmissionCoordinator};
use crate::supervisor::pool::DaemonSupervisor;
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct Orchestrator {
    config: LoopConfig,
    node: Arc<dyn NodeClient>,
    state: Arc<PipelineState>,
    area: Arc<CoordinationArea>,
    broadcaster: TemplateBroadcaster,
    supervisor: DaemonSupervisor,
    monitor: ChainMonitor,
    submissions: SubmissionCoordinator,
    fatal: FatalErrorHandler,
    run_shutdown: CancellationToken,
    accepted_this_run: u32,
}

impl Orchestrator {
    pub fn new(
        config: LoopConfig,
        node: Arc<dyn NodeClient>,
        consensus: Arc<dyn ConsensusHook>,
        root_shutdown: CancellationToken,
    ) -> Self {
        let run_shutdown = root_shutdown.child_token();
        let state = Arc::new(PipelineState::default());
        let area = Arc::new(CoordinationArea::new(config.coordination_dir()));
        let broadcaster = TemplateBroadcaster::new(area.clone());
        let supervisor = DaemonSupervisor::new(&config, area.clone(), state.clone());
        let monitor = ChainMonitor::new(run_shutdown.child_token());
        let submissions = SubmissionCoordinator::new(
            node.clone(),
            consensus,
            state.clone(),
            area.clone(),
        );
        let fatal = FatalErrorHandler::new(root_shutdown, run_shutdown.clone());

        Self {
            config,
            node,
            state,
            area,
            broadcaster,
            supervisor,
            monitor,
            submissions,
            fatal,
            run_shutdown,
            accepted_this_run: 0,
        }
    }

    pub fn state(&self) -> Arc<PipelineState> {
        self.state.clone()
    }

    pub fn fatal_handler(&self) -> FatalErrorHandler {
        self.fatal.clone()
    }

    pub fn run_token(&self) -> CancellationToken {
        self.run_shutdown.clone()
    }

    /// Brings the pipeline up: coordination layout, block-change monitor
    /// (with polling fallback), worker pool, and the first distribution. An
    /// unreachable node here is fatal; there is nothing to orchestrate
    /// without a template.
    pub async fn start(&mut self) -> Result<()> {
        self.state.set_phase(Phase::FetchingTemplate);

        match self.monitor.connect(self.config.notify_endpoints()).await? {
            ConnectOutcome::Subscribed => {}
            ConnectOutcome::PollingFallback => {
                self.monitor.start_polling(
                    self.node.clone(),
                    self.config.template_refresh_interval(),
                );
            }
        }

        let started = self
            .supervisor
            .start_pool(self.config.worker_count())
            .await
            .map_err(|err| self.fatal.trigger("worker pool startup", err))?;
        tracing::info!(
            target: "mineloop::pipeline",
            started,
            "pipeline starting"
        );

        let template = self
            .node
            .fetch_template()
            .await
            .context("initial template fetch failed")
            .map_err(|err| self.fatal.trigger("initial template fetch", err))?;
        self.distribute_template(template).await?;
        Ok(())
    }

    /// Drives the pipeline until the run token fires or a fatal error brings
    /// it down. Returns the captured fatal error in the latter case.
    pub async fn run(&mut self) -> Result<()> {
        let mut health_tick = interval(self.config.health_check_interval());
        let mut refresh_tick = interval(self.config.template_refresh_interval());
        let mut scan_tick = interval(self.config.solution_poll_interval());
        for ticker in [&mut health_tick, &mut refresh_tick, &mut scan_tick] {
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                _ = self.run_shutdown.cancelled() => break,
                _ = health_tick.tick() => {
                    if let Err(err) = self.supervisor.health_check().await {
                        self.state.record_error(format!("health check failed: {err:#}"));
                    }
                }
                _ = refresh_tick.tick() => {
                    if let Err(err) = self.refresh_template().await {
                        self.state.record_error(format!("template refresh failed: {err:#}"));
                    }
                }
                _ = scan_tick.tick() => {
                    if let Some(event) = self.monitor.poll() {
                        if let Err(err) = self.handle_block_event(event).await {
                            self.state.record_error(format!("block event handling failed: {err:#}"));
                        }
                    }
                    if let Err(err) = self.scan_solutions().await {
                        self.state.record_error(format!("solution scan failed: {err:#}"));
                    }
                }
            }
        }

        if self.fatal.is_triggered() {
            return Err(self
                .fatal
                .error()
                .unwrap_or_else(|| anyhow!("pipeline shut down after a fatal error")));
        }
        Ok(())
    }

    /// Tears the pipeline down. Safe to call more than once.
    pub async fn stop(&mut self) -> Result<()> {
        self.run_shutdown.cancel();
        self.supervisor.stop_pool(true).await?;
        self.monitor.shutdown().await;
        self.state.set_phase(Phase::Idle);
        tracing::info!(target: "mineloop::pipeline", "pipeline stopped");
        Ok(())
    }

    /// Periodic template refetch, the backstop when notifications are not
    /// flowing. A changed template identity is treated exactly like a block
    /// event.
    async fn refresh_template(&mut self) -> Result<()> {
        let template = self.node.fetch_template().await?;
        let identity = template_identity(&template);

        match self.broadcaster.current_template().await {
            Some(current) if current == identity => Ok(()),
            _ => {
                tracing::info!(
                    target: "mineloop::pipeline",
                    template = %identity,
                    "template changed during refresh; rotating workspace"
                );
                self.reset_workspace().await?;
                self.distribute_template(template).await
            }
        }
    }

    /// Reacts to an upstream state change: stop the workers, wipe the
    /// workspace, fetch the successor template, distribute, resume. The clear
    /// always lands before the new distribution.
    async fn handle_block_event(&mut self, event: BlockEvent) -> Result<()> {
        self.state.record_block_event();
        if !event.is_actionable() {
            tracing::debug!(
                target: "mineloop::pipeline",
                identifier = %event.identifier,
                "ignoring non-actionable event"
            );
            return Ok(());
        }

        tracing::info!(
            target: "mineloop::pipeline",
            block = %event.identifier,
            "new block observed; rotating template"
        );

        self.reset_workspace().await?;
        let template = self
            .node
            .fetch_template()
            .await
            .context("template fetch after block event failed")?;
        self.distribute_template(template).await
    }

    async fn reset_workspace(&mut self) -> Result<()> {
        self.state.set_phase(Phase::ResettingWorkspace);
        let ordinals = self.supervisor.ordinals();

        for ordinal in &ordinals {
            self.area.write_command(*ordinal, &WorkerCommand::Stop).await?;
        }
        self.broadcaster.clear_workspace(&ordinals).await?;
        self.submissions.note_workspace_reset();
        Ok(())
    }

    async fn distribute_template(&mut self, template: Value) -> Result<()> {
        let identity = template_identity(&template);
        let ordinals = self.supervisor.ordinals();

        self.state.set_phase(Phase::Distributing);
        self.broadcaster
            .distribute(&identity, &template, &ordinals)
            .await?;
        self.submissions.note_template(&identity);

        for ordinal in &ordinals {
            self.area
                .write_command(
                    *ordinal,
                    &WorkerCommand::Resume {
                        target_difficulty: None,
                    },
                )
                .await?;
        }

        self.state.record_template_processed();
        self.state.set_phase(Phase::Mining);
        Ok(())
    }

    /// Sweeps every slot for candidate solutions and runs them through the
    /// submission gate in arrival order.
    async fn scan_solutions(&mut self) -> Result<()> {
        let ordinals = self.supervisor.ordinals();
        for ordinal in ordinals {
            let Some(candidate) = self.area.take_solution(ordinal).await? else {
                continue;
            };

            self.state.set_phase(Phase::Submitting);
            let outcome = self.submissions.process(&candidate).await;
            self.state.set_phase(Phase::Mining);

            match outcome {
                Ok(AttemptOutcome::Accepted) => {
                    self.accepted_this_run += 1;
                    self.after_accepted().await?;
                }
                Ok(_) => {}
                Err(err) => {
                    self.state
                        .record_error(format!("submission from worker {ordinal} failed: {err:#}"));
                }
            }
        }
        Ok(())
    }

    /// Mode-dependent follow-through after an accepted submission. The
    /// workspace is reset first in every mode so no worker keeps grinding a
    /// template the network has already built on.
    async fn after_accepted(&mut self) -> Result<()> {
        self.reset_workspace().await?;

        let target = self.config.block_target().min(MAX_BLOCKS_PER_DAY);
        match self.config.mode() {
            MiningMode::Continuous => self.rotate_after_win().await,
            MiningMode::FixedCount => {
                if self.accepted_this_run >= target {
                    tracing::info!(
                        target: "mineloop::pipeline",
                        accepted = self.accepted_this_run,
                        target,
                        "block target reached; stopping"
                    );
                    self.run_shutdown.cancel();
                    Ok(())
                } else {
                    self.rotate_after_win().await
                }
            }
            MiningMode::OnDemand => {
                tracing::info!(
                    target: "mineloop::pipeline",
                    window_secs = self.config.activation_window().as_secs(),
                    "parking worker pool until the next activation window"
                );
                self.supervisor.stop_pool(true).await?;
                self.state.set_phase(Phase::Idle);

                if sleep_with_cancellation(self.config.activation_window(), &self.run_shutdown)
                    .await
                    .is_err()
                {
                    return Ok(());
                }

                self.supervisor
                    .start_pool(self.config.worker_count())
                    .await
                    .map_err(|err| self.fatal.trigger("worker pool reactivation", err))?;
                self.rotate_after_win().await
            }
        }
    }

    async fn rotate_after_win(&mut self) -> Result<()> {
        self.state.set_phase(Phase::FetchingTemplate);
        let template = self
            .node
            .fetch_template()
            .await
            .context("template fetch after accepted submission failed")?;
        self.distribute_template(template).await
    }
}

/// Stable identity of a template payload: height plus parent hash when the
/// node provides them, a digest of the payload otherwise. The identity must
/// be a pure function of the payload so a refresh returning the same
/// template is never mistaken for a rotation.
fn template_identity(template: &Value) -> String {
    let height = template.get("height").and_then(Value::as_u64);
    let parent = template.get("previousblockhash").and_then(Value::as_str);
    match (height, parent) {
        (Some(height), Some(parent)) => format!("{height}-{parent}"),
        _ => {
            let mut hasher = DefaultHasher::new();
            template.to_string().hash(&mut hasher);
            format!("anon-{:016x}", hasher.finish())
        }
    }
}
