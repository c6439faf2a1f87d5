//! Top-level process runner: builds the node client and the orchestrator
//! from a validated configuration, wires signal handling, and guarantees the
//! worker pool is torn down on every exit path.

use crate::pipeline::hooks::{AcceptAll, ConsensusHook};
use crate::pipeline::orchestrator::Orchestrator;
use crate::rpc::client::AsyncNodeClient;
use crate::runtime::config::LoopConfig;
use crate::runtime::telemetry::{spawn_metrics_reporter, DEFAULT_METRICS_INTERVAL};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Runner {
    config: LoopConfig,
    consensus: Arc<dyn ConsensusHook>,
    root_shutdown: CancellationToken,
}

impl Runner {
    pub fn new(config: LoopConfig) -> Self {
        Self::with_consensus(config, Arc::new(AcceptAll))
    }

    pub fn with_consensus(config: LoopConfig, consensus: Arc<dyn ConsensusHook>) -> Self {
        Self {
            config,
            consensus,
            root_shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the whole process when cancelled. Handed out so
    /// embedders can stop the runner from another task.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root_shutdown.clone()
    }

    /// Runs the pipeline to completion: until the block target is reached,
    /// a fatal error occurs, or SIGINT arrives.
    pub async fn run(self) -> Result<()> {
        let node = Arc::new(AsyncNodeClient::from_config(&self.config)?);
        let mut orchestrator = Orchestrator::new(
            self.config,
            node,
            self.consensus,
            self.root_shutdown.clone(),
        );

        let reporter = spawn_metrics_reporter(
            orchestrator.state(),
            self.root_shutdown.child_token(),
            DEFAULT_METRICS_INTERVAL,
        );

        if let Err(err) = orchestrator.start().await {
            orchestrator.stop().await?;
            self.root_shutdown.cancel();
            let _ = reporter.await;
            return Err(err);
        }

        let outcome = tokio::select! {
            outcome = orchestrator.run() => outcome,
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => tracing::info!(target: "mineloop::runtime", "interrupt received; shutting down"),
                    Err(err) => tracing::warn!(target: "mineloop::runtime", error = %err, "signal handler failed; shutting down"),
                }
                Ok(())
            }
        };

        orchestrator.stop().await?;
        self.root_shutdown.cancel();
        let _ = reporter.await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_token_is_shared() {
        let config = LoopConfig::builder()
            .rpc_url("http://localhost:8332")
            .rpc_user("user")
            .rpc_password("pass")
            .worker_command(vec!["sleep".into(), "300".into()])
            .coordination_dir("/tmp/mineloop-test")
            .build()
            .expect("config");

        let runner = Runner::new(config);
        let token = runner.shutdown_token();
        token.cancel();
        assert!(runner.root_shutdown.is_cancelled());
    }
}
