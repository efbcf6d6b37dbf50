//! Generic backoff-retry driver, grounded in the fetcher's retry loop.

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::DownloadError;

/// What a single attempt decided to do.
enum RetryAction<T> {
    Done(T),
    Retry(DownloadError),
    Fail(DownloadError),
}

/// Run `attempt` up to `policy.max_retries + 1` times, sleeping
/// `policy.delay_for_attempt(k)` between attempt `k` and `k+1`, honoring `token`.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut attempt: F,
) -> Result<T, DownloadError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, DownloadError>>,
{
    let mut last_err = None;
    for k in 0..=policy.max_retries {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let action = match attempt(k).await {
            Ok(value) => RetryAction::Done(value),
            Err(e) if e.is_retryable() && k < policy.max_retries => RetryAction::Retry(e),
            Err(e) => RetryAction::Fail(e),
        };

        match action {
            RetryAction::Done(value) => return Ok(value),
            RetryAction::Fail(e) => return Err(e),
            RetryAction::Retry(e) => {
                let delay = policy.delay_for_attempt(k);
                warn!(attempt = k, delay_secs = delay.as_secs_f64(), error = %e, "retrying after backoff");
                last_err = Some(e);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => return Err(DownloadError::Cancelled),
                }
            }
        }
    }

    Err(last_err.unwrap_or(DownloadError::ConfigError("retry loop exited without an attempt".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let policy = RetryPolicy { max_retries: 3, backoff_factor: 2.0 };
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(&policy, &token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, DownloadError>(42) }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_on_non_retryable_error() {
        let policy = RetryPolicy { max_retries: 3, backoff_factor: 2.0 };
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(&policy, &token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(DownloadError::MalformedPlaylist("bad".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn honors_cancellation() {
        let policy = RetryPolicy { max_retries: 5, backoff_factor: 1.0 };
        let token = CancellationToken::new();
        token.cancel();

        let result = retry_with_backoff(&policy, &token, |_| async {
            Err::<u32, _>(DownloadError::permanent_http(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
                "http://x",
            ))
        })
        .await;

        assert!(matches!(result, Err(DownloadError::Cancelled)));
    }
}
