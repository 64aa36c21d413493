//! Sync engine configuration.

use std::time::Duration;

use collector_common::RecordKind;

use crate::error::{Result, SyncError};

/// Default number of cycles per batch.
pub const DEFAULT_CYCLES_PER_BATCH: u64 = 10;

/// Default number of batches in flight.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default pause between dispatch windows.
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Default page size for cycle, receipt and original transaction requests.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Default number of retries after the first failed call.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

/// Default base delay for exponential backoff.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default number of recent cycles checked before resuming.
pub const DEFAULT_ANOMALY_LOOKBACK_CYCLES: u64 = 15;

/// Default number of cycles per tally request during verification.
pub const DEFAULT_VERIFY_CHUNK_CYCLES: u64 = 1000;

/// Default interval between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Tuning for batch planning, the worker pool, paging and retries.
///
/// Passed explicitly into the orchestrator, planner and executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Cycles per [`CycleBatch`](crate::CycleBatch).
    pub cycles_per_batch: u64,
    /// Maximum batches in flight, also the size of a dispatch window.
    pub concurrency: usize,
    /// Minimum time between dispatch windows.
    pub dispatch_interval: Duration,
    /// Page size for cycle metadata requests.
    pub cycles_per_request: u32,
    /// Page size for receipt requests.
    pub receipts_per_request: u32,
    /// Page size for original transaction requests.
    pub original_txs_per_request: u32,
    /// Retries after the first failed call; `retry_attempts + 1` calls total.
    pub retry_attempts: u32,
    /// Backoff base; the delay before retry `n` is `base * 2^n`.
    pub retry_base_delay: Duration,
    /// Number of most recent local cycles compared before resuming.
    pub anomaly_lookback_cycles: u64,
    /// Cycles per tally request during verification.
    pub verify_chunk_cycles: u64,
    /// Interval between progress log lines while syncing.
    pub progress_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cycles_per_batch: DEFAULT_CYCLES_PER_BATCH,
            concurrency: DEFAULT_CONCURRENCY,
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            cycles_per_request: DEFAULT_PAGE_SIZE,
            receipts_per_request: DEFAULT_PAGE_SIZE,
            original_txs_per_request: DEFAULT_PAGE_SIZE,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            anomaly_lookback_cycles: DEFAULT_ANOMALY_LOOKBACK_CYCLES,
            verify_chunk_cycles: DEFAULT_VERIFY_CHUNK_CYCLES,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl SyncConfig {
    /// How far before a gap the verifier looks for drift.
    ///
    /// One interrupted pass touches at most `concurrency` batches of
    /// `cycles_per_batch` cycles.
    pub fn lookback_cycles(&self) -> u64 {
        self.cycles_per_batch.saturating_mul(self.concurrency as u64)
    }

    /// Page size for records of `kind`.
    pub fn page_size(&self, kind: RecordKind) -> u32 {
        match kind {
            RecordKind::Receipt => self.receipts_per_request,
            RecordKind::OriginalTx => self.original_txs_per_request,
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("cycles_per_batch", self.cycles_per_batch == 0),
            ("concurrency", self.concurrency == 0),
            ("cycles_per_request", self.cycles_per_request == 0),
            ("receipts_per_request", self.receipts_per_request == 0),
            ("original_txs_per_request", self.original_txs_per_request == 0),
            ("anomaly_lookback_cycles", self.anomaly_lookback_cycles == 0),
            ("verify_chunk_cycles", self.verify_chunk_cycles == 0),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(SyncError::InvalidConfig(format!("{name} must be greater than zero")));
        }
        if self.progress_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "progress_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
