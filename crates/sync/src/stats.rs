//! Running counters for a sync pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use collector_common::RecordKind;
use serde::Serialize;
use tokio::time::Instant;

/// Counters shared by every worker of one orchestrator.
#[derive(Debug)]
pub struct SyncStats {
    cycles: AtomicU64,
    receipts: AtomicU64,
    original_txs: AtomicU64,
    errors: AtomicU64,
    batches_completed: AtomicU64,
    batches_total: AtomicU64,
    started: Instant,
}

impl Default for SyncStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStats {
    /// Fresh counters, with the clock starting now.
    pub fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            receipts: AtomicU64::new(0),
            original_txs: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            batches_completed: AtomicU64::new(0),
            batches_total: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn add_cycles(&self, n: u64) {
        self.cycles.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_records(&self, kind: RecordKind, n: u64) {
        let counter = match kind {
            RecordKind::Receipt => &self.receipts,
            RecordKind::OriginalTx => &self.original_txs,
        };
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Count one failed distributor call, retried or not.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_batches_total(&self, n: u64) {
        self.batches_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn batch_completed(&self) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles_synced: self.cycles.load(Ordering::Relaxed),
            receipts_synced: self.receipts.load(Ordering::Relaxed),
            original_txs_synced: self.original_txs.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            batches_total: self.batches_total.load(Ordering::Relaxed),
            elapsed_secs: self.elapsed().as_secs_f64(),
        }
    }
}

/// Serializable view of [`SyncStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub cycles_synced: u64,
    pub receipts_synced: u64,
    pub original_txs_synced: u64,
    pub errors: u64,
    pub batches_completed: u64,
    pub batches_total: u64,
    pub elapsed_secs: f64,
}

impl StatsSnapshot {
    /// Completed batches as a percentage, 100 when there was nothing to do.
    pub fn percent_complete(&self) -> f64 {
        if self.batches_total == 0 {
            100.0
        } else {
            self.batches_completed as f64 / self.batches_total as f64 * 100.0
        }
    }

    /// Records of both kinds per second since the pass started.
    pub fn records_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            0.0
        } else {
            (self.receipts_synced + self.original_txs_synced) as f64 / self.elapsed_secs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_counters_and_snapshot() {
        let stats = SyncStats::new();
        stats.add_batches_total(4);
        stats.add_cycles(10);
        stats.add_records(RecordKind::Receipt, 30);
        stats.add_records(RecordKind::OriginalTx, 10);
        stats.record_error();
        stats.batch_completed();
        tokio::time::advance(Duration::from_secs(2)).await;

        let snap = stats.snapshot();
        assert_eq!(snap.cycles_synced, 10);
        assert_eq!(snap.receipts_synced, 30);
        assert_eq!(snap.original_txs_synced, 10);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.percent_complete(), 25.0);
        assert_eq!(snap.elapsed_secs, 2.0);
        assert_eq!(snap.records_per_sec(), 20.0);
    }

    #[test]
    fn test_empty_pass_is_complete() {
        assert_eq!(StatsSnapshot::default().percent_complete(), 100.0);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_value(StatsSnapshot::default()).unwrap();
        assert!(json.get("originalTxsSynced").is_some());
    }
}
