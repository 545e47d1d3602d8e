//! Per-fragment retry loop with bounded attempts and exponential backoff

use fv_core::config::DownloadConfig;
use fv_core::{FragmentFailure, FvError, FvResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: DownloadConfig,
}

impl RetryPolicy {
    pub fn new(config: &DownloadConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.config.attempt_timeout_secs)
    }

    /// Run `attempt` until it succeeds, fails with a non-transient error, or
    /// the attempt budget is spent. Each call is bounded by the attempt timeout.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, fragment: u32, mut attempt: F) -> Result<T, FragmentFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = FvResult<T>>,
    {
        let max_attempts = self.max_attempts();
        let timeout = self.attempt_timeout();
        let mut n = 1;

        loop {
            let result = match tokio::time::timeout(timeout, attempt(n)).await {
                Ok(result) => result,
                Err(_) => Err(FvError::Timeout(format!(
                    "attempt exceeded {}s",
                    timeout.as_secs()
                ))),
            };

            match result {
                Ok(value) => {
                    if n > 1 {
                        debug!(fragment, attempt = n, "fragment recovered after retry");
                    }
                    return Ok(value);
                }
                Err(e) if n < max_attempts && e.is_transient() => {
                    let backoff = self.config.backoff_for(n);
                    warn!(
                        fragment,
                        attempt = n,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "fragment attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    n += 1;
                }
                Err(e) => {
                    warn!(fragment, attempt = n, error = %e, "fragment failed");
                    return Err(FragmentFailure {
                        fragment_number: fragment,
                        attempts: n,
                        last_error: e.to_string(),
                    });
                }
            }
        }
    }
}
