use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Doubles the delay up to `max_backoff`, starting from one millisecond when
/// the current value is zero.
pub(crate) fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}

/// Sleeps for `delay` unless the token fires first, in which case an error is
/// returned so retry loops unwind promptly.
pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        _ = cancellation.cancelled() => Err(anyhow!("wait cancelled")),
        _ = sleep(delay) => Ok(()),
    }
}
