//! Error types for the sync engine.

use collector_db::DbError;
use collector_distributor::DistributorError;
use thiserror::Error;

use crate::anomaly::AnomalyReport;
use crate::batch::CycleBatch;

/// Errors that can occur while syncing or recovering.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A distributor request failed with a non-retryable error.
    #[error("distributor error: {0}")]
    Distributor(#[from] DistributorError),

    /// The local store failed.
    #[error("store error: {0}")]
    Store(#[from] DbError),

    /// A transient failure persisted past the retry budget.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// What was being requested.
        operation: String,
        /// Total number of calls made, including the first.
        attempts: u32,
        /// The last error observed.
        #[source]
        source: DistributorError,
    },

    /// The local store disagrees with the distributor in a way that syncing
    /// on top of it could make worse.
    #[error("anomaly detected: {0}")]
    Anomaly(AnomalyReport),

    /// A batch could not be completed.
    #[error("batch {batch} failed: {source}")]
    BatchFailed {
        /// The failed batch.
        batch: CycleBatch,
        /// Why it failed.
        #[source]
        source: Box<SyncError>,
    },

    /// A sync worker task panicked or was cancelled.
    #[error("sync worker panicked: {0}")]
    WorkerPanicked(String),

    /// The sync configuration is unusable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Wrap `self` as the cause of a failed batch.
    pub fn in_batch(self, batch: CycleBatch) -> Self {
        match self {
            already @ SyncError::BatchFailed { .. } => already,
            other => SyncError::BatchFailed {
                batch,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, unwrapping any batch context.
    pub fn root(&self) -> &SyncError {
        match self {
            SyncError::BatchFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error is a fatal anomaly report.
    pub fn is_anomaly(&self) -> bool {
        matches!(self.root(), SyncError::Anomaly(_))
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
