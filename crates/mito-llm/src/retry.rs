//! Retry logic with configurable backoff policies for LLM calls.

use std::time::Duration;

use mito_types::MitoError;

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = base.as_millis() as u64 * 2u64.saturating_pow(attempt as u32);
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// Call `f` up to `max_retries + 1` times, retrying only errors for which
/// [`MitoError::is_retryable`] holds. Rate-limit hints override the policy delay.
pub async fn execute_with_retry<T, F, Fut>(
    f: F,
    max_retries: usize,
    policy: &BackoffPolicy,
    label: &str,
) -> Result<T, MitoError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, MitoError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let delay = match &e {
                    MitoError::RateLimited { retry_after_ms, .. } => {
                        Duration::from_millis(*retry_after_ms)
                    }
                    _ => policy.delay_for_attempt(attempt),
                };
                tracing::warn!(call = %label, attempt, delay_ms = %delay.as_millis(), error = %e, "Retryable error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn success_on_first_try() {
        let result = execute_with_retry(|| async { Ok(7) }, 3, &BackoffPolicy::None, "t").await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retry_on_retryable_error_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();

        let result = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    if cc.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(MitoError::SchemaMismatch("missing key".into()))
                    } else {
                        Ok("recovered")
                    }
                }
            },
            3,
            &BackoffPolicy::None,
            "t",
        )
        .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn max_retries_exhausted_returns_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();
        let result: Result<(), _> = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(MitoError::RateLimited {
                        provider: "test".into(),
                        retry_after_ms: 0,
                    })
                }
            },
            2,
            &BackoffPolicy::None,
            "t",
        )
        .await;

        assert!(matches!(result.unwrap_err(), MitoError::RateLimited { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_no_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();
        let result: Result<(), _> = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(MitoError::AuthError {
                        provider: "test".into(),
                    })
                }
            },
            5,
            &BackoffPolicy::None,
            "t",
        )
        .await;

        assert!(matches!(result.unwrap_err(), MitoError::AuthError { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn fixed_and_none_backoff() {
        let fixed = BackoffPolicy::Fixed(Duration::from_millis(200));
        assert_eq!(fixed.delay_for_attempt(9), Duration::from_millis(200));
        assert_eq!(BackoffPolicy::None.delay_for_attempt(9), Duration::ZERO);
    }
}
