//! Single-shot retry on 401-with-refresh.

use crate::error::ProxyError;
use std::future::Future;

/// Tunables.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_auth_retries: u32,
    pub auto_refresh_token: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_auth_retries: 1,
            auto_refresh_token: true,
        }
    }
}

/// What happened during one [`execute`] call, for callers that want to
/// observe retry behavior (`retryCount`/`tokenRefreshSucceeded`).
#[derive(Debug, Clone, Default)]
pub struct RetryReport {
    pub retry_count: u32,
    pub token_refresh_attempted: bool,
    pub token_refresh_succeeded: bool,
}

/// Run `op`. On `ProxyError::AuthError`, call `refresh` once (if configured
/// to) and retry `op` exactly once more. Never retries a second time:
/// total dispatches are bounded to two.
pub async fn execute<T, Op, Fut, Refresh, RFut>(
    config: &RetryConfig,
    mut op: Op,
    refresh: Refresh,
) -> (Result<T, ProxyError>, RetryReport)
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProxyError>>,
    Refresh: FnOnce() -> RFut,
    RFut: Future<Output = bool>,
{
    let first = op().await;

    let is_auth_error = matches!(first, Err(ProxyError::AuthError(_)));
    if !is_auth_error || config.max_auth_retries == 0 || !config.auto_refresh_token {
        return (first, RetryReport::default());
    }

    let refreshed = refresh().await;
    if !refreshed {
        return (
            first,
            RetryReport {
                retry_count: 0,
                token_refresh_attempted: true,
                token_refresh_succeeded: false,
            },
        );
    }

    let second = op().await;
    (
        second,
        RetryReport {
            retry_count: 1,
            token_refresh_attempted: true,
            token_refresh_succeeded: true,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn non_auth_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let (result, report) = execute(
            &RetryConfig::default(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProxyError::UpstreamError("boom".into())) }
            },
            || async { true },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.retry_count, 0);
    }

    #[tokio::test]
    async fn scenario_3_auth_error_then_success() {
        let calls = AtomicU32::new(0);
        let (result, report) = execute(
            &RetryConfig::default(),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ProxyError::AuthError("401".into()))
                    } else {
                        Ok(200)
                    }
                }
            },
            || async { true },
        )
        .await;
        assert_eq!(result.unwrap(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.retry_count, 1);
        assert!(report.token_refresh_succeeded);
    }

    #[tokio::test]
    async fn refresh_failure_surfaces_original_401() {
        let calls = AtomicU32::new(0);
        let (result, report) = execute(
            &RetryConfig::default(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProxyError::AuthError("401".into())) }
            },
            || async { false },
        )
        .await;
        assert!(matches!(result, Err(ProxyError::AuthError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!report.token_refresh_succeeded);
    }

    #[tokio::test]
    async fn p5_never_retries_twice() {
        let calls = AtomicU32::new(0);
        let (result, _) = execute(
            &RetryConfig::default(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProxyError::AuthError("401".into())) }
            },
            || async { true },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_auto_refresh_skips_retry() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_auth_retries: 1,
            auto_refresh_token: false,
        };
        let (result, _) = execute(
            &config,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProxyError::AuthError("401".into())) }
            },
            || async { true },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
