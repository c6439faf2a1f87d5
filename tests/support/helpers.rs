use anyhow::{bail, Result};
use std::future::Future;
use std::time::Duration;

pub fn init_tracing() {
    mineloop::init_tracing();
}

/// Polls `probe` every 10ms until it returns true or the timeout elapses.
pub async fn wait_until<F, Fut>(what: &str, timeout: Duration, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
