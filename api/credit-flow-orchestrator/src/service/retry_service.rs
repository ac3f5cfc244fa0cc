use crate::errors::FlowError;
use crate::service::metrics_service;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
        }
    }
}

impl RetryPolicy {
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

/// Errors that can tell the executor whether they are a rate-limit signal.
pub trait RetrySignal {
    fn is_rate_limited(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
}

impl RetrySignal for FlowError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, FlowError::RateLimited(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FlowError::RateLimited(failure) => failure.retry_after,
            _ => None,
        }
    }
}

/// `min(base * 2^(attempt-1), max)`, overridden by a server-provided Retry-After.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(server_delay) = retry_after {
        return server_delay;
    }
    let exponent = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << exponent;
    policy
        .base_delay
        .checked_mul(factor)
        .unwrap_or(policy.max_delay)
        .min(policy.max_delay)
}

/// Runs `operation` up to `policy.max_attempts` times, sleeping between attempts
/// only when the failure is a rate-limit signal. Any other failure, or a rate
/// limit on the last attempt, is returned unchanged.
pub async fn execute_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: RetrySignal,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_rate_limited() && attempt < max_attempts => {
                let delay = backoff_delay(policy, attempt, err.retry_after());
                warn!(
                    label = %label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "partner rate limit; backing off"
                );
                metrics_service::inc_rate_limit_retries();
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Throttled(Option<Duration>),
        Fatal(&'static str),
    }

    impl RetrySignal for TestError {
        fn is_rate_limited(&self) -> bool {
            matches!(self, TestError::Throttled(_))
        }

        fn retry_after(&self) -> Option<Duration> {
            match self {
                TestError::Throttled(d) => *d,
                TestError::Fatal(_) => None,
            }
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(backoff_delay(&policy, 1, None), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&policy, 2, None), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&policy, 4, None), Duration::from_millis(8000));
        assert_eq!(backoff_delay(&policy, 10, None), Duration::from_millis(60_000));
        assert_eq!(backoff_delay(&policy, 40, None), Duration::from_millis(60_000));
    }

    #[test]
    fn retry_after_overrides_computed_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(
            backoff_delay(&policy, 3, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_rate_limits() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(&RetryPolicy::default(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 2 {
                    Err(TestError::Throttled(None))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_rate_limit_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> =
            execute_with_retry(&RetryPolicy::default(), "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal("boom")) }
            })
            .await;

        assert_eq!(result, Err(TestError::Fatal("boom")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_return_last_failure_unchanged() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let result: Result<(), TestError> = execute_with_retry(&policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Throttled(Some(Duration::from_secs(1)))) }
        })
        .await;

        assert_eq!(result, Err(TestError::Throttled(Some(Duration::from_secs(1)))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_the_backoff_between_attempts() {
        let start = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);
        let _ = execute_with_retry(&RetryPolicy::default(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 2 {
                    Err(TestError::Throttled(None))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        // 1s after the first attempt, 2s after the second
        assert!(start.elapsed() >= Duration::from_millis(3000));
    }
}
