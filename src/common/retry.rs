//! Bounded retry around exchange calls

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::errors::{Result, TraderError};
use crate::config::types::RetryConfig;

/// Fixed-delay retry policy with a per-attempt timeout
///
/// Transient failures (network, timeout, rate limit) are retried up to
/// `attempts` times in total, sleeping `delay` between attempts. Fatal
/// failures are returned on the first occurrence. An attempt that outlives
/// `timeout` is dropped and counts as a transient timeout.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration, timeout: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
            timeout,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.attempts,
            Duration::from_millis(config.delay_ms),
            Duration::from_secs(config.connection_timeout_secs),
        )
    }

    /// Run `operation` under the policy.
    ///
    /// Returns the first success, the first fatal error unchanged, or
    /// [`TraderError::RetriesExhausted`] once every attempt failed transiently.
    pub async fn call<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(TraderError::Timeout(format!(
                    "{} exceeded {:?}",
                    name, self.timeout
                ))),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = name, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_transient() => {
                    debug!(operation = name, kind = err.kind(), "Fatal error, not retrying");
                    return Err(err);
                }
                Err(err) if attempt >= self.attempts => {
                    warn!(
                        operation = name,
                        attempts = attempt,
                        "Retries exhausted: {}", err
                    );
                    return Err(TraderError::RetriesExhausted {
                        operation: name.to_string(),
                        attempts: attempt,
                        last_error: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!(
                        operation = name,
                        attempt,
                        max_attempts = self.attempts,
                        "Transient error, retrying in {:?}: {}", self.delay, err
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
