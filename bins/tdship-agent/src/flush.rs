use std::sync::Arc;
use std::time::Duration;

use tdship_engine::{Batch, Output, ShipError};

/// Backoff between attempts to ship one chunk.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// Ship `batch`, retrying retryable errors with exponential backoff. The
/// same batch (and so the same idempotency token) is presented every time.
pub async fn write_with_retry(
    output: &Output,
    batch: Arc<Batch>,
    policy: RetryPolicy,
) -> Result<(), ShipError> {
    let mut delay = policy.base_delay;
    let mut attempt = 0;

    loop {
        match output.write(batch.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    tag = batch.tag(),
                    id = %batch.id(),
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "chunk upload failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, policy.max_delay);
            }
            Err(e) => return Err(e),
        }
    }
}
