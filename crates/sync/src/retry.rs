//! Exponential backoff for distributor requests.

use std::future::Future;
use std::time::Duration;

use collector_distributor::DistributorError;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// Retry budget and backoff for one kind of request.
///
/// Only errors for which [`DistributorError::is_transient`] holds are
/// retried. The delay before retry `n` (zero based) is `base_delay * 2^n`,
/// so with the defaults a request is tried six times over roughly 31 seconds
/// of waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first call.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl RetryPolicy {
    /// Create a policy with an explicit budget.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// The policy configured in `config`.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_base_delay)
    }

    /// Delay before retry number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `request` until it succeeds, fails permanently or the budget is
    /// spent.
    ///
    /// A non-transient error is returned immediately as
    /// [`SyncError::Distributor`]. A transient error that survives every
    /// retry becomes [`SyncError::RetriesExhausted`].
    pub async fn run<T, F, Fut>(&self, operation: &str, mut request: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, DistributorError>>,
    {
        let mut attempt = 0u32;
        loop {
            match request().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => {
                    warn!(operation, error = %e, "Request failed with permanent error");
                    return Err(SyncError::Distributor(e));
                }
                Err(e) if attempt >= self.max_retries => {
                    warn!(
                        operation,
                        attempts = attempt + 1,
                        error = %e,
                        "Request failed, retry budget exhausted"
                    );
                    return Err(SyncError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt + 1,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient request failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
