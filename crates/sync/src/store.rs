//! Async gateway to the local store.
//!
//! [`LocalStore`] is the only state shared between sync workers. Every write
//! is an idempotent upsert, so concurrent callers need no coordination beyond
//! what the store itself provides.

use async_trait::async_trait;
use collector_common::{Cycle, CycleCount, CycleGap, RecordKind, TxRecord};
use collector_db::{Database, DbError};

/// Result type for store calls.
pub type StoreResult<T> = std::result::Result<T, DbError>;

/// The local store operations the sync engine depends on.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Stored cycle with the highest counter.
    async fn latest_cycle(&self) -> StoreResult<Option<Cycle>>;

    /// Number of stored cycles.
    async fn cycle_count(&self) -> StoreResult<u64>;

    /// Stored cycles in `[start, end]`, ascending.
    async fn cycles_in_range(&self, start: u64, end: u64) -> StoreResult<Vec<Cycle>>;

    /// The `limit` stored cycles with the highest counters, ascending.
    async fn recent_cycles(&self, limit: u64) -> StoreResult<Vec<Cycle>>;

    /// Idempotent upsert keyed by counter.
    async fn upsert_cycles(&self, cycles: Vec<Cycle>) -> StoreResult<usize>;

    /// Idempotent upsert keyed by record id.
    async fn upsert_records(&self, kind: RecordKind, records: Vec<TxRecord>) -> StoreResult<usize>;

    /// Per-cycle record counts in `[start, end]`; cycles without records are omitted.
    async fn count_by_cycle_range(
        &self,
        kind: RecordKind,
        start: u64,
        end: u64,
    ) -> StoreResult<Vec<CycleCount>>;

    /// Per-cycle record counts for the given cycles.
    async fn count_by_cycle_list(
        &self,
        kind: RecordKind,
        cycles: Vec<u64>,
    ) -> StoreResult<Vec<CycleCount>>;

    /// Total stored records of `kind`.
    async fn total_records(&self, kind: RecordKind) -> StoreResult<u64>;

    /// Greatest `(timestamp, id)` record whose cycle is in `[start, end]`.
    async fn last_record(
        &self,
        kind: RecordKind,
        start: u64,
        end: u64,
    ) -> StoreResult<Option<TxRecord>>;

    /// Maximal cycle ranges within `[0, target]` with no stored cycle.
    async fn missing_ranges(&self, target: u64) -> StoreResult<Vec<CycleGap>>;
}

/// Run a blocking database call off the async runtime.
async fn blocking<T, F>(db: &Database, f: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| DbError::Task(e.to_string()))?
}

#[async_trait]
impl LocalStore for Database {
    async fn latest_cycle(&self) -> StoreResult<Option<Cycle>> {
        blocking(self, |db| db.latest_cycle()).await
    }

    async fn cycle_count(&self) -> StoreResult<u64> {
        blocking(self, |db| db.cycle_count()).await
    }

    async fn cycles_in_range(&self, start: u64, end: u64) -> StoreResult<Vec<Cycle>> {
        blocking(self, move |db| db.cycles_in_range(start, end)).await
    }

    async fn recent_cycles(&self, limit: u64) -> StoreResult<Vec<Cycle>> {
        blocking(self, move |db| db.recent_cycles(limit)).await
    }

    async fn upsert_cycles(&self, cycles: Vec<Cycle>) -> StoreResult<usize> {
        blocking(self, move |db| db.bulk_upsert_cycles(&cycles)).await
    }

    async fn upsert_records(&self, kind: RecordKind, records: Vec<TxRecord>) -> StoreResult<usize> {
        blocking(self, move |db| db.bulk_upsert_records(kind, &records)).await
    }

    async fn count_by_cycle_range(
        &self,
        kind: RecordKind,
        start: u64,
        end: u64,
    ) -> StoreResult<Vec<CycleCount>> {
        blocking(self, move |db| db.count_by_cycle_range(kind, start, end)).await
    }

    async fn count_by_cycle_list(
        &self,
        kind: RecordKind,
        cycles: Vec<u64>,
    ) -> StoreResult<Vec<CycleCount>> {
        blocking(self, move |db| db.count_by_cycle_list(kind, &cycles)).await
    }

    async fn total_records(&self, kind: RecordKind) -> StoreResult<u64> {
        blocking(self, move |db| db.total_records(kind)).await
    }

    async fn last_record(
        &self,
        kind: RecordKind,
        start: u64,
        end: u64,
    ) -> StoreResult<Option<TxRecord>> {
        blocking(self, move |db| db.last_record(kind, start, end)).await
    }

    async fn missing_ranges(&self, target: u64) -> StoreResult<Vec<CycleGap>> {
        blocking(self, move |db| db.missing_ranges(target)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cycle(counter: u64) -> Cycle {
        Cycle {
            counter,
            marker: format!("marker-{counter}"),
            start: 1_000 + counter * 60,
            duration_seconds: 60,
            record: json!({}),
        }
    }

    #[tokio::test]
    async fn test_database_as_local_store() {
        let db = Database::open_in_memory().unwrap();
        let store: &dyn LocalStore = &db;

        assert!(store.latest_cycle().await.unwrap().is_none());
        let written = store
            .upsert_cycles(vec![cycle(0), cycle(1), cycle(3)])
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(store.cycle_count().await.unwrap(), 3);
        assert_eq!(store.latest_cycle().await.unwrap().map(|c| c.counter), Some(3));
        assert_eq!(
            store.missing_ranges(5).await.unwrap(),
            vec![CycleGap::new(2, 2), CycleGap::new(4, 5)]
        );

        let record = TxRecord {
            id: "r1".into(),
            cycle: 1,
            timestamp: 1_060_000,
            payload: json!({"ok": true}),
        };
        store
            .upsert_records(RecordKind::Receipt, vec![record.clone()])
            .await
            .unwrap();
        assert_eq!(store.total_records(RecordKind::Receipt).await.unwrap(), 1);
        assert_eq!(
            store.last_record(RecordKind::Receipt, 0, 3).await.unwrap(),
            Some(record)
        );
        assert!(store
            .last_record(RecordKind::Receipt, 2, 3)
            .await
            .unwrap()
            .is_none());
    }
}
