use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Backoff policy for provider calls. Only wrap operations the provider
/// treats as idempotent (order creation, capture); never wallet mutations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay_ms: 250,
        }
    }
}

/// Runs `op` up to `1 + retries` times with exponential backoff
/// (`base_delay_ms * 2^attempt`), re-raising the last error once exhausted.
pub async fn with_retries<T, F, Fut>(label: &str, policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..=policy.retries {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < policy.retries {
                    let delay = policy.base_delay_ms * (1u64 << attempt);
                    tracing::warn!(
                        "[with_retries] {} attempt {} failed, retrying in {}ms: {}",
                        label,
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                } else {
                    tracing::error!(
                        "[with_retries] {} exhausted after {} attempts: {}",
                        label,
                        policy.retries + 1,
                        e
                    );
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("retry loop ran zero attempts")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            retries: 2,
            base_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let out = with_retries("test", fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(42)
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let out = with_retries("test", fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow!("transient"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reraises_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let err = with_retries("test", fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(anyhow!("failure {}", n)) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.to_string(), "failure 2");
    }
}
