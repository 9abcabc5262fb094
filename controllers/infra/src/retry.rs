//! Bounded retry with exponential backoff and jitter.
//!
//! Used for provider calls that commonly race with eventual consistency on the
//! provider side (tagging a freshly created floating IP is the main one).

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Retry parameters.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Delay multiplier per attempt
    pub factor: f64,
    /// Relative jitter applied to every delay (0.1 = up to +10%)
    pub jitter: f64,
}

impl RetryConfig {
    /// Four attempts, 10ms, x5, 10% jitter
    pub fn provider_tagging() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(10),
            factor: 5.0,
            jitter: 0.1,
        }
    }

    /// Delay before attempt `attempt + 1`, without jitter
    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        Duration::from_secs_f64(self.initial_delay.as_secs_f64() * self.factor.powi(exponent))
    }
}

/// Run `operation` until it succeeds or `max_attempts` is exhausted.
///
/// Returns the last error when every attempt failed.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let base = config.base_delay(attempt);
                let jitter = rand::thread_rng().gen_range(0.0..=config.jitter);
                let delay = Duration::from_secs_f64(base.as_secs_f64() * (1.0 + jitter));

                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delays_grow_by_factor() {
        let config = RetryConfig::provider_tagging();
        assert_eq!(config.base_delay(1), Duration::from_millis(10));
        assert_eq!(config.base_delay(2), Duration::from_millis(50));
        assert_eq!(config.base_delay(3), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<u32, String> =
            retry_with_backoff(&RetryConfig::provider_tagging(), "tag", || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err(format!("attempt {n}")) } else { Ok(n) }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), String> =
            retry_with_backoff(&RetryConfig::provider_tagging(), "tag", || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("still failing".to_string())
                }
            })
            .await;

        assert_eq!(result, Err("still failing".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
