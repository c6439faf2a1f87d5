use crate::pipeline::state::PipelineState;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(15);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Spawns a background task that periodically logs the pipeline snapshot:
/// phase, submission counters, and worker restarts.
pub fn spawn_metrics_reporter(
    state: Arc<PipelineState>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_succeeded = state.submissions_succeeded();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "mineloop::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = state.snapshot();
                    let accepted_delta = snapshot
                        .submissions_succeeded
                        .saturating_sub(last_succeeded);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let acceptance_rate = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        accepted_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "mineloop::metrics",
                        phase = %snapshot.phase,
                        templates = snapshot.templates_processed,
                        accepted = snapshot.submissions_succeeded,
                        rejected = snapshot.submissions_failed,
                        restarts = snapshot.worker_restarts,
                        block_events = snapshot.block_events,
                        acceptance_rate = format!("{acceptance_rate:.4}"),
                        "pipeline metrics snapshot"
                    );

                    last_succeeded = snapshot.submissions_succeeded;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
