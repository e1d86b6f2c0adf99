//! Retry logic for transient external-call errors.
//!
//! Provides exponential backoff for calls that fail with network
//! timeouts or rate limiting. Non-retryable errors surface immediately.

use std::future::Future;

use crate::error::LecternResult;

/// Retry delays for transient errors (exponential backoff).
const RETRY_DELAYS_MS: [u64; 3] = [500, 1500, 4000];

/// Executes an external call with retry logic for transient errors.
///
/// Retries on errors where [`crate::error::LecternError::is_retryable`]
/// holds, with backoff delays of 500ms, 1.5s, 4s.
///
/// # Arguments
/// * `action` - Action name for logging
/// * `operation` - Closure that performs the call
pub async fn with_retry<T, F, Fut>(action: &str, mut operation: F) -> LecternResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LecternResult<T>>,
{
    let mut last_error = None;
    for (attempt, &delay_ms) in std::iter::once(&0)
        .chain(RETRY_DELAYS_MS.iter())
        .enumerate()
    {
        if attempt > 0 {
            log::info!(
                "[Retry] Retrying {} (attempt {}/{}) after {}ms",
                action,
                attempt + 1,
                RETRY_DELAYS_MS.len() + 1,
                delay_ms
            );
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                log::warn!("[Retry] {} transient error: {}", action, e);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.expect("retry loop should have set last_error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LecternError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result = with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LecternError::Network("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_surfaces_immediately() {
        let calls = AtomicUsize::new(0);
        let result: LecternResult<()> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LecternError::InvalidRequest("bad".into())) }
        })
        .await;

        assert!(matches!(result, Err(LecternError::InvalidRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let result: LecternResult<()> =
            with_retry("test", || async { Err(LecternError::Network("down".into())) }).await;
        assert!(matches!(result, Err(LecternError::Network(_))));
    }
}
