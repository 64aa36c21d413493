//! Resume points for record paging.
//!
//! Cursors are never stored on their own. The latest record already
//! persisted for a batch is the checkpoint, so a restart resumes right after
//! it and the worst case after a lost write is a small re-fetch.

use std::sync::Arc;

use collector_common::{CompositeCursor, RecordKind};
use tracing::{debug, warn};

use crate::batch::CycleBatch;
use crate::store::LocalStore;

/// Derives the [`CompositeCursor`] a record loop starts from.
#[derive(Clone)]
pub struct CheckpointResolver {
    store: Arc<dyn LocalStore>,
}

impl CheckpointResolver {
    /// Create a resolver over `store`.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Cursor after the latest stored `kind` record in `batch`, or a fresh
    /// cursor at `fallback_timestamp`.
    ///
    /// Never fails: a store error is logged and the fallback is used.
    pub async fn resolve(
        &self,
        kind: RecordKind,
        batch: CycleBatch,
        fallback_timestamp: i64,
    ) -> CompositeCursor {
        match self
            .store
            .last_record(kind, batch.start_cycle, batch.end_cycle)
            .await
        {
            Ok(Some(record)) => {
                debug!(
                    kind = %kind,
                    batch = %batch,
                    cursor = %record.cursor(),
                    "Resuming from stored record"
                );
                record.cursor()
            }
            Ok(None) => CompositeCursor::starting_at(fallback_timestamp),
            Err(e) => {
                warn!(
                    kind = %kind,
                    batch = %batch,
                    error = %e,
                    "Checkpoint lookup failed, starting from cycle start"
                );
                CompositeCursor::starting_at(fallback_timestamp)
            }
        }
    }

    /// Start of `cycle` in unix milliseconds when it is stored locally, else 0.
    pub async fn fallback_timestamp(&self, cycle: u64) -> i64 {
        match self.store.cycles_in_range(cycle, cycle).await {
            Ok(cycles) => cycles.first().map(|c| c.start_millis()).unwrap_or(0),
            Err(e) => {
                warn!(cycle, error = %e, "Cycle lookup failed, using zero fallback timestamp");
                0
            }
        }
    }

    /// [`resolve`](Self::resolve) with the fallback derived from the batch's
    /// first cycle. A [`refetch`](CycleBatch::refetch) batch always starts
    /// from the fallback.
    pub async fn resolve_for_batch(&self, kind: RecordKind, batch: CycleBatch) -> CompositeCursor {
        let fallback = self.fallback_timestamp(batch.start_cycle).await;
        if batch.refetch {
            debug!(kind = %kind, batch = %batch, "Refetching batch from cycle start");
            return CompositeCursor::starting_at(fallback);
        }
        self.resolve(kind, batch, fallback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreResult;
    use async_trait::async_trait;
    use collector_common::{Cycle, CycleCount, CycleGap, TxRecord};
    use collector_db::{Database, DbError};
    use serde_json::json;

    fn record(id: &str, cycle: u64, timestamp: i64) -> TxRecord {
        TxRecord {
            id: id.to_string(),
            cycle,
            timestamp,
            payload: json!(null),
        }
    }

    #[tokio::test]
    async fn test_resolves_latest_record_in_batch() {
        let db = Database::open_in_memory().unwrap();
        db.bulk_upsert_records(
            RecordKind::Receipt,
            &[
                record("a", 10, 5_000),
                record("c", 11, 6_000),
                record("b", 11, 6_000),
                record("z", 25, 9_000),
            ],
        )
        .unwrap();
        let resolver = CheckpointResolver::new(Arc::new(db));

        let cursor = resolver
            .resolve(RecordKind::Receipt, CycleBatch::new(10, 19), 0)
            .await;
        assert_eq!(cursor, CompositeCursor::new(6_000, "c"));
    }

    #[tokio::test]
    async fn test_refetch_batch_ignores_stored_records() {
        let db = Database::open_in_memory().unwrap();
        db.bulk_upsert_cycles(&[Cycle {
            counter: 10,
            marker: "m10".into(),
            start: 4,
            duration_seconds: 60,
            record: json!({}),
        }])
        .unwrap();
        db.bulk_upsert_records(RecordKind::Receipt, &[record("c", 11, 6_000)])
            .unwrap();
        let resolver = CheckpointResolver::new(Arc::new(db));

        let batch = CycleBatch::new(10, 19);
        let resumed = resolver.resolve_for_batch(RecordKind::Receipt, batch).await;
        assert_eq!(resumed, CompositeCursor::new(6_000, "c"));

        let refetched = resolver
            .resolve_for_batch(RecordKind::Receipt, batch.refetching())
            .await;
        assert_eq!(refetched, CompositeCursor::starting_at(4_000));
    }

    #[tokio::test]
    async fn test_fallback_uses_cycle_start() {
        let db = Database::open_in_memory().unwrap();
        db.bulk_upsert_cycles(&[Cycle {
            counter: 20,
            marker: "m20".into(),
            start: 1_700,
            duration_seconds: 60,
            record: json!({}),
        }])
        .unwrap();
        let resolver = CheckpointResolver::new(Arc::new(db));

        let cursor = resolver
            .resolve_for_batch(RecordKind::OriginalTx, CycleBatch::new(20, 29))
            .await;
        assert_eq!(cursor, CompositeCursor::starting_at(1_700_000));
        assert!(cursor.is_fresh());

        let cursor = resolver
            .resolve_for_batch(RecordKind::OriginalTx, CycleBatch::new(30, 39))
            .await;
        assert_eq!(cursor, CompositeCursor::starting_at(0));
    }

    struct BrokenStore;

    #[async_trait]
    impl LocalStore for BrokenStore {
        async fn latest_cycle(&self) -> StoreResult<Option<Cycle>> {
            Err(DbError::Integrity("broken".into()))
        }
        async fn cycle_count(&self) -> StoreResult<u64> {
            Err(DbError::Integrity("broken".into()))
        }
        async fn cycles_in_range(&self, _: u64, _: u64) -> StoreResult<Vec<Cycle>> {
            Err(DbError::Integrity("broken".into()))
        }
        async fn recent_cycles(&self, _: u64) -> StoreResult<Vec<Cycle>> {
            Err(DbError::Integrity("broken".into()))
        }
        async fn upsert_cycles(&self, _: Vec<Cycle>) -> StoreResult<usize> {
            Err(DbError::Integrity("broken".into()))
        }
        async fn upsert_records(&self, _: RecordKind, _: Vec<TxRecord>) -> StoreResult<usize> {
            Err(DbError::Integrity("broken".into()))
        }
        async fn count_by_cycle_range(
            &self,
            _: RecordKind,
            _: u64,
            _: u64,
        ) -> StoreResult<Vec<CycleCount>> {
            Err(DbError::Integrity("broken".into()))
        }
        async fn count_by_cycle_list(
            &self,
            _: RecordKind,
            _: Vec<u64>,
        ) -> StoreResult<Vec<CycleCount>> {
            Err(DbError::Integrity("broken".into()))
        }
        async fn total_records(&self, _: RecordKind) -> StoreResult<u64> {
            Err(DbError::Integrity("broken".into()))
        }
        async fn last_record(
            &self,
            _: RecordKind,
            _: u64,
            _: u64,
        ) -> StoreResult<Option<TxRecord>> {
            Err(DbError::Integrity("broken".into()))
        }
        async fn missing_ranges(&self, _: u64) -> StoreResult<Vec<CycleGap>> {
            Err(DbError::Integrity("broken".into()))
        }
    }

    #[tokio::test]
    async fn test_store_error_falls_back() {
        let resolver = CheckpointResolver::new(Arc::new(BrokenStore));
        let cursor = resolver
            .resolve(RecordKind::Receipt, CycleBatch::new(0, 9), 42)
            .await;
        assert_eq!(cursor, CompositeCursor::starting_at(42));
        assert_eq!(resolver.fallback_timestamp(0).await, 0);
    }
}
