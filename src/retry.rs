use crate::errors::{AppError, AppResult};
use crate::models::EngineSettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Bounded retry for remote calls: per-attempt timeout, exponential backoff with jitter,
/// and only transient failures are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            max_attempts: settings.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_delay: Duration::from_millis(settings.retry_max_delay_ms),
            call_timeout: Duration::from_secs(settings.call_timeout_secs.max(1)),
        }
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let millis = (self.base_delay.as_millis() as u64).saturating_mul(1_u64 << shift);
        Duration::from_millis(millis).min(self.max_delay)
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(AppError::RemoteTransient(format!(
                    "{} timed out after {}s",
                    operation,
                    self.call_timeout.as_secs()
                ))),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.max_attempts => {
                    let delay = with_jitter(self.backoff(attempt));
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "remote call failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn with_jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis == 0 {
        return delay;
    }
    let spread = millis / 4;
    let jitter = rand::rng().random_range(0..=spread);
    Duration::from_millis(millis - spread / 2 + jitter)
}

#[cfg(test)]
mod tests {
    use super::RetryPolicy;
    use crate::errors::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            call_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            call_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .run("create_campaign", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::RemoteTransient("503".to_string()))
                } else {
                    Ok("cmp-1")
                }
            })
            .await;
        assert_eq!(result.expect("eventually succeeds"), "cmp-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn policy_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(5)
            .run("create_ad", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::RemotePolicy("ad rejected".to_string()))
            })
            .await;
        assert!(matches!(result, Err(AppError::RemotePolicy(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(2)
            .run("get_insights", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::RemoteTransient("429".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn hung_call_becomes_transient_timeout() {
        let result: Result<(), _> = policy(1)
            .run("update_status", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(AppError::RemoteTransient(_))));
    }
}
