use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::HandlerError;

/// Bounded retry with exponential backoff for handler invocations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(raw.min(self.max_delay.as_secs_f64())).unwrap_or(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of attempts.
pub async fn retry_with_backoff<F, Fut, R>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<R, HandlerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, HandlerError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= max_attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    ?delay,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_with_backoff(&fast(), "flaky", || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(HandlerError::retryable("not yet"))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry_with_backoff(&fast(), "broken", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::retryable("still down"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry_with_backoff(&fast(), "bad input", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::permanent("malformed"))
        })
        .await;

        assert_eq!(result, Err(HandlerError::permanent("malformed")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
