//! Retrying provider calls that failed in transit.
//!
//! Only reads and plans go through here. Applying a change is not
//! idempotent, so apply calls are made once.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ProviderError;

use super::ProviderResult;

/// Attempts made before an unreachable provider is reported.
pub const MAX_ATTEMPTS: u32 = 3;

/// Base delay between attempts, multiplied by the attempt number.
const RETRY_DELAY_MS: u64 = 100;

/// Runs `call` until it succeeds, fails with a non-retryable error, or
/// [`MAX_ATTEMPTS`] attempts have failed with [`ProviderError::Unreachable`].
///
/// # Errors
///
/// Returns the first non-retryable error, or the last retryable one.
pub async fn with_retry<T, F, Fut>(operation: &str, mut call: F) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut last_error = None;

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            debug!("Retry attempt {attempt} of {MAX_ATTEMPTS} for {operation}");
            tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt))).await;
        }

        match call().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() => {
                warn!("{operation} failed: {e}");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| ProviderError::unreachable(operation, "no attempt was made")))
}
