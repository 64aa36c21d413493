//! Per-batch fetch-and-persist loops.
//!
//! Record pages are fetched with a composite cursor. When a page comes back
//! full, the next page is requested while the current one is being written,
//! so network latency overlaps with store latency. Cycle metadata is dense
//! and bounded, so it is paged by counter without a cursor.

use std::sync::Arc;

use collector_common::{CompositeCursor, Cycle, CycleGap, RecordKind, TxRecord};
use collector_distributor::{DistributorClient, RecordQuery};
use tracing::{debug, trace, warn};

use crate::batch::CycleBatch;
use crate::checkpoint::CheckpointResolver;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;
use crate::stats::SyncStats;
use crate::store::LocalStore;

/// What one record loop did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSyncOutcome {
    /// Non-empty pages persisted.
    pub pages: u32,
    /// Records persisted.
    pub records: u64,
    /// Cursor after the last persisted record.
    pub last_cursor: CompositeCursor,
}

/// Runs the cycle and record loops for single batches.
#[derive(Clone)]
pub struct BatchFetcher {
    client: Arc<dyn DistributorClient>,
    store: Arc<dyn LocalStore>,
    resolver: CheckpointResolver,
    retry: RetryPolicy,
    stats: Arc<SyncStats>,
    config: SyncConfig,
}

impl BatchFetcher {
    pub fn new(
        client: Arc<dyn DistributorClient>,
        store: Arc<dyn LocalStore>,
        config: &SyncConfig,
        stats: Arc<SyncStats>,
    ) -> Self {
        Self {
            resolver: CheckpointResolver::new(Arc::clone(&store)),
            client,
            store,
            retry: RetryPolicy::from_config(config),
            stats,
            config: config.clone(),
        }
    }

    /// Fetch and persist every cycle of `batch`. Returns the cycles written.
    pub async fn sync_cycles(&self, batch: CycleBatch) -> Result<u64> {
        let range = CycleGap::try_new(batch.start_cycle, batch.end_cycle)
            .ok_or_else(|| SyncError::InvalidConfig(format!("batch {batch} starts after it ends")))?;
        let mut synced = 0u64;
        let window_size = u64::from(self.config.cycles_per_request);

        for window in range.chunks(window_size) {
            let operation = format!("cycles {window}");
            let client = &*self.client;
            let stats = &*self.stats;
            let fetched = self
                .retry
                .run(&operation, || async move {
                    let result = client.cycles(window.start_cycle, window.end_cycle).await;
                    if result.is_err() {
                        stats.record_error();
                    }
                    result
                })
                .await?;

            let cycles: Vec<Cycle> = fetched
                .into_iter()
                .filter(|c| window.contains(c.counter))
                .collect();
            if (cycles.len() as u64) < window.gap_size {
                debug!(
                    range = %window,
                    received = cycles.len(),
                    "Distributor returned fewer cycles than requested"
                );
            }

            let written = self.store.upsert_cycles(cycles).await? as u64;
            self.stats.add_cycles(written);
            synced += written;
        }

        trace!(batch = %batch, cycles = synced, "Cycle metadata synced");
        Ok(synced)
    }

    /// Fetch and persist every `kind` record of `batch`, resuming from the
    /// local checkpoint.
    ///
    /// Each request starts at the cycle of the last record seen, so one page
    /// can cover several sparse cycles. That says nothing about the cycles'
    /// own metadata, which [`sync_cycles`](Self::sync_cycles) handles.
    pub async fn sync_records(&self, kind: RecordKind, batch: CycleBatch) -> Result<RecordSyncOutcome> {
        let limit = self.config.page_size(kind);
        let mut cursor = self.resolver.resolve_for_batch(kind, batch).await;
        let mut current_cycle = batch.start_cycle;
        let mut outcome = RecordSyncOutcome::default();

        let mut page = self
            .fetch_page(kind, batch, current_cycle, &cursor, limit)
            .await?;

        loop {
            let full = page.len() >= limit as usize;
            let records = accept_page(kind, batch, &cursor, page);
            let (next_cursor, last_cycle) = match records.iter().max_by_key(|r| r.cursor()) {
                Some(last) => (last.cursor(), last.cycle),
                None => break,
            };
            let count = records.len() as u64;
            current_cycle = current_cycle.max(last_cycle);

            if full {
                let (next, persisted) = tokio::join!(
                    self.fetch_page(kind, batch, current_cycle, &next_cursor, limit),
                    self.store.upsert_records(kind, records),
                );
                persisted?;
                self.record_page(kind, count, &mut outcome);
                cursor = next_cursor;
                page = next?;
            } else {
                self.store.upsert_records(kind, records).await?;
                self.record_page(kind, count, &mut outcome);
                cursor = next_cursor;
                break;
            }
        }

        trace!(
            kind = %kind,
            batch = %batch,
            pages = outcome.pages,
            records = outcome.records,
            "Records synced"
        );
        outcome.last_cursor = cursor;
        Ok(outcome)
    }

    fn record_page(&self, kind: RecordKind, count: u64, outcome: &mut RecordSyncOutcome) {
        self.stats.add_records(kind, count);
        outcome.pages += 1;
        outcome.records += count;
    }

    async fn fetch_page(
        &self,
        kind: RecordKind,
        batch: CycleBatch,
        start_cycle: u64,
        cursor: &CompositeCursor,
        limit: u32,
    ) -> Result<Vec<TxRecord>> {
        let query = RecordQuery {
            start_cycle,
            end_cycle: batch.end_cycle,
            after: cursor.clone(),
            limit,
        };
        let operation = format!("{kind} page {batch} after {cursor}");
        let client = &*self.client;
        let stats = &*self.stats;
        let query = &query;
        self.retry
            .run(&operation, || async move {
                let result = client.records(kind, query).await;
                if result.is_err() {
                    stats.record_error();
                }
                result
            })
            .await
    }
}

/// Keep only records inside `batch` that sort strictly after `cursor`.
///
/// A distributor that repeats or strays outside the requested window would
/// otherwise stall the loop or advance it past records it never saw.
fn accept_page(
    kind: RecordKind,
    batch: CycleBatch,
    cursor: &CompositeCursor,
    page: Vec<TxRecord>,
) -> Vec<TxRecord> {
    let received = page.len();
    let accepted: Vec<TxRecord> = page
        .into_iter()
        .filter(|r| batch.contains(r.cycle) && cursor.precedes(r))
        .collect();
    if accepted.len() < received {
        warn!(
            kind = %kind,
            batch = %batch,
            cursor = %cursor,
            dropped = received - accepted.len(),
            "Dropped records outside the requested window"
        );
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, cycle: u64, timestamp: i64) -> TxRecord {
        TxRecord {
            id: id.to_string(),
            cycle,
            timestamp,
            payload: json!(null),
        }
    }

    #[test]
    fn test_accept_page_filters_window_and_cursor() {
        let batch = CycleBatch::new(10, 19);
        let cursor = CompositeCursor::new(100, "b");
        let page = vec![
            record("a", 10, 100),
            record("b", 10, 100),
            record("c", 10, 100),
            record("d", 20, 200),
            record("e", 9, 300),
            record("f", 12, 150),
        ];
        let ids: Vec<String> = accept_page(RecordKind::Receipt, batch, &cursor, page)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["c", "f"]);
    }

    #[test]
    fn test_accept_page_fresh_cursor_keeps_equal_timestamp() {
        let batch = CycleBatch::new(0, 0);
        let cursor = CompositeCursor::starting_at(100);
        let page = vec![record("a", 0, 100)];
        assert_eq!(accept_page(RecordKind::OriginalTx, batch, &cursor, page).len(), 1);
    }
}
