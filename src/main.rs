use anyhow::{Context, Result};
use clap::Parser;
use mineloop::runtime::config::{LoopConfig, MiningMode};
use mineloop::runtime::telemetry::init_tracing;
use mineloop::rpc::client::AsyncNodeClient;
use mineloop::runtime::runner::Runner;
use mineloop::supervisor::pool::emergency_kill_all;
use mineloop::CoordinationArea;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mineloop", version, about = "Mining daemon orchestrator")]
struct Cli {
    /// JSON-RPC endpoint of the upstream node.
    #[arg(long, default_value = "http://127.0.0.1:8332")]
    rpc_url: String,

    /// RPC username.
    #[arg(long, env = "MINELOOP_RPC_USER", default_value = "")]
    rpc_user: String,

    /// RPC password.
    #[arg(long, env = "MINELOOP_RPC_PASSWORD", default_value = "")]
    rpc_password: String,

    /// Number of worker daemons. Defaults to the cpu count; values above it
    /// are clamped at startup.
    #[arg(long)]
    workers: Option<usize>,

    /// Behaviour after an accepted submission.
    #[arg(long, value_enum, default_value_t = MiningMode::Continuous)]
    mode: MiningMode,

    /// Accepted-submission target for fixed-count mode.
    #[arg(long)]
    blocks: Option<u32>,

    /// Root of the shared coordination area.
    #[arg(long, default_value = "/tmp/mineloop")]
    coordination_dir: PathBuf,

    /// Command line used to launch one worker daemon; per-slot arguments are
    /// appended. Repeat the flag for each argument.
    #[arg(long = "worker-command", default_value = "mineloop-worker")]
    worker_command: Vec<String>,

    /// Block-notification endpoint (host:port). May be repeated; when none
    /// is reachable the monitor falls back to polling.
    #[arg(long = "notify-endpoint")]
    notify_endpoints: Vec<String>,

    /// Kill stray worker processes, then exit. Sweeps every worker on the
    /// host unless a pool marker narrows it to one pool.
    #[arg(long, value_name = "MARKER", num_args = 0..=1)]
    emergency_stop: Option<Option<String>>,

    /// Verify the coordination area and node reachability, then exit.
    #[arg(long)]
    smoke_test: bool,
}

impl Cli {
    fn into_config(self) -> Result<LoopConfig> {
        let mut builder = LoopConfig::builder()
            .rpc_url(self.rpc_url)
            .rpc_user(self.rpc_user)
            .rpc_password(self.rpc_password)
            .worker_command(self.worker_command)
            .coordination_dir(self.coordination_dir)
            .notify_endpoints(self.notify_endpoints)
            .mode(self.mode);

        if let Some(workers) = self.workers {
            builder = builder.worker_count(workers);
        }
        if let Some(blocks) = self.blocks {
            builder = builder.block_target(blocks);
        }

        builder.build()
    }
}

async fn smoke_test(config: &LoopConfig) -> Result<()> {
    let area = CoordinationArea::new(config.coordination_dir());
    area.ensure_layout(&[])
        .await
        .context("coordination area is not writable")?;

    let client = AsyncNodeClient::from_config(config)?;
    let hash = client
        .get_best_block_hash()
        .await
        .context("node is not reachable")?;

    tracing::info!(
        target: "mineloop::smoke",
        best_block = %hash,
        coordination_dir = ?config.coordination_dir(),
        "smoke test passed"
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Some(marker) = &cli.emergency_stop {
        match emergency_kill_all(marker.as_deref()) {
            Ok(killed) => {
                tracing::info!(killed, "emergency stop complete");
                return;
            }
            Err(err) => {
                tracing::error!(error = %err, "emergency stop failed");
                std::process::exit(1);
            }
        }
    }

    let run_smoke_test = cli.smoke_test;
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = format!("{err:#}"), "invalid configuration");
            // Invalid arguments exit 2, the same as argument parse failures.
            std::process::exit(2);
        }
    };

    let outcome = if run_smoke_test {
        smoke_test(&config).await
    } else {
        Runner::new(config).run().await
    };

    if let Err(err) = outcome {
        tracing::error!(error = format!("{err:#}"), "mineloop exited with an error");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_target_over_daily_ceiling_is_invalid() {
        let cli = Cli::parse_from([
            "mineloop",
            "--rpc-user",
            "user",
            "--rpc-password",
            "pass",
            "--blocks",
            "200",
        ]);
        let err = cli.into_config().unwrap_err();
        assert!(format!("{err:#}").contains("daily ceiling"));
    }

    #[test]
    fn emergency_stop_accepts_an_optional_marker() {
        let cli = Cli::parse_from(["mineloop", "--emergency-stop"]);
        assert_eq!(cli.emergency_stop, Some(None));

        let cli = Cli::parse_from(["mineloop", "--emergency-stop", "pool-abc"]);
        assert_eq!(cli.emergency_stop, Some(Some("pool-abc".to_string())));

        let cli = Cli::parse_from(["mineloop", "--rpc-user", "u", "--rpc-password", "p"]);
        assert_eq!(cli.emergency_stop, None);
    }
}
