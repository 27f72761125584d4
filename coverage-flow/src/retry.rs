//! Deadline and backoff wrappers for fallible async operations.
//!
//! Every remote call in the workflow goes through one of these rather than an
//! inlined loop, so timeout and retry behavior stays uniform across storage,
//! database and gateway call sites. The two compose:
//!
//! ```ignore
//! with_retry(|| with_timeout(store.upload(...), Duration::from_secs(30), "upload"), 3, Duration::from_secs(1)).await
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{CoreError, Result};

/// Race `fut` against a timer. If the timer wins, the future is dropped and a
/// `CoreError::Timeout` carrying `message` is returned. The remote side of
/// the operation is not cancelled - callers must tolerate a write that lands
/// after its deadline fired (rows are last-write-wins).
pub async fn with_timeout<T, F>(fut: F, timeout: Duration, message: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::Timeout(message.to_string())),
    }
}

/// Invoke `op` up to `retries` times, sleeping `initial_delay * 2^attempt`
/// between attempts. Pure exponential backoff, no jitter. The last error is
/// returned after exhausting all attempts.
pub async fn with_retry<T, F, Fut>(op: F, retries: u32, initial_delay: Duration) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..retries {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(attempt = attempt + 1, retries, error = %e, "attempt failed");
                last_err = Some(e);
                if attempt + 1 < retries {
                    let delay = initial_delay * 2u32.pow(attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| CoreError::InvalidInput("retries must be > 0".to_string())))
}
