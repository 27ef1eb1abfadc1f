//! Exponential backoff for transient provider failures
//!
//! Schedule: base 1 s, factor 2, up to 5 attempts. Only errors the caller
//! classifies as retryable are retried; everything else surfaces
//! immediately.

use std::future::Future;
use std::time::Duration;

use crate::error::{EmbeddingError, EmbeddingResult};

/// Base delay before the first retry
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Maximum number of attempts (initial call included)
pub const MAX_ATTEMPTS: u32 = 5;

/// Delay before retry `attempt` (1-based retry count)
pub fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE * 2_u32.saturating_pow(attempt.saturating_sub(1))
}

/// Run `operation`, retrying retryable failures with exponential backoff.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted, or the first
/// non-retryable error immediately.
pub async fn with_backoff<T, F, Fut>(label: &str, mut operation: F) -> EmbeddingResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EmbeddingResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transient provider failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
