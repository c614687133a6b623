//! Bounded timeout and retry policy for gateway calls.
//!
//! Every payment-gateway round trip runs through [`with_retry`]: a per-call
//! deadline plus exponential backoff on transient failures. When the budget
//! is exhausted the caller's local rows stay `pending` and are reconciled
//! later by polling or webhook.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on the backoff delay
    pub max_delay: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay_ms =
            (self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32)) as u64;
        self.max_delay.min(Duration::from_millis(delay_ms))
    }
}

/// Whether an error is worth retrying. Only transport-level gateway failures
/// are; domain errors come back identical on every attempt.
const fn is_transient(error: &Error) -> bool {
    matches!(error, Error::Gateway(_))
}

/// Run `op` under `timeout` per attempt, retrying transient failures per
/// `policy`.
///
/// # Errors
///
/// Returns the last error once the retry budget is exhausted; a timeout
/// surfaces as [`Error::Gateway`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Gateway(format!(
                "gateway call timed out after {timeout:?}"
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(error) if !is_transient(&error) => return Err(error),
            Err(error) => {
                if attempt >= policy.max_retries {
                    return Err(error);
                }
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(%error, attempt, ?delay, "retrying gateway call");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let result = with_retry(&policy(), Duration::from_secs(1), || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(&policy(), Duration::from_secs(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Gateway("flaky".to_string()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_domain_errors() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retry(&policy(), Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::validation("bad input")) }
        })
        .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retry(&policy(), Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Gateway("down".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Gateway(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn timeouts_surface_as_gateway_errors() {
        let result: Result<()> = with_retry(
            &RetryPolicy {
                max_retries: 0,
                ..policy()
            },
            Duration::from_millis(5),
            || async {
                sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Gateway(_))));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = policy();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(4));
    }
}
