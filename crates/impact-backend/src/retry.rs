//! Bounded retry with exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use impact_core::config::RetryConfig;
use impact_providers::{ProviderError, ProviderResult};

/// How a provider call is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total calls, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for a single call.
    pub call_timeout: Duration,
}

/// Result of a retried call plus the number of calls made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: ProviderResult<T>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig, call_timeout: Duration) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            call_timeout,
        }
    }

    /// Delay after the `attempt`-th failed call (1-based).
    pub fn backoff(&self, attempt: u32, err: &ProviderError) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let delay = match err.retry_after() {
            Some(hint) => exp.max(hint),
            None => exp,
        };
        delay.min(self.max_delay)
    }

    /// Call `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Each call is bounded by `call_timeout`; an elapsed call counts as
    /// `Unavailable`. Shutdown is raced against every call and every backoff
    /// sleep, and returns the last error (or `Unavailable`) immediately.
    pub async fn run<T, F, Fut>(
        &self,
        provider: &str,
        shutdown: &watch::Receiver<bool>,
        mut op: F,
    ) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut shutdown = shutdown.clone();
        let mut attempts = 0;
        let mut last_err = None;
        loop {
            attempts += 1;
            let result = tokio::select! {
                timed = tokio::time::timeout(self.call_timeout, op()) => match timed {
                    Ok(r) => r,
                    Err(_) => Err(ProviderError::unavailable(
                        provider,
                        format!("timed out after {:?}", self.call_timeout),
                    )),
                },
                () = shutdown_requested(&mut shutdown) => {
                    warn!(%provider, attempts, "shutdown during provider call");
                    return Attempted {
                        result: Err(last_err
                            .unwrap_or_else(|| ProviderError::unavailable(provider, "shutdown"))),
                        attempts,
                    };
                }
            };

            let err = match result {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(e) => e,
            };

            if !err.is_retryable() || attempts >= self.max_attempts || *shutdown.borrow() {
                return Attempted {
                    result: Err(err),
                    attempts,
                };
            }

            let delay = self.backoff(attempts, &err);
            debug!(%provider, attempts, ?delay, error = %err, "retrying provider call");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                () = shutdown_requested(&mut shutdown) => {
                    warn!(%provider, "shutdown during retry backoff");
                    return Attempted {
                        result: Err(err),
                        attempts,
                    };
                }
            }
            last_err = Some(err);
        }
    }
}

/// Resolves once shutdown is signalled. A dropped sender never resolves.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
