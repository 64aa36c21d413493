//! Parallel sync of cycle batches.

use std::sync::Arc;

use collector_common::RecordKind;
use collector_distributor::DistributorClient;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::batch::CycleBatch;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::fetch::BatchFetcher;
use crate::pool::WorkerPool;
use crate::stats::{StatsSnapshot, SyncStats};
use crate::store::LocalStore;

/// Syncs batches of cycles through a bounded [`WorkerPool`].
///
/// Each batch runs three loops concurrently: cycle metadata, receipts and
/// original transactions. Batches complete in any order; every write is an
/// idempotent upsert, so re-running a batch or finishing batches out of
/// order leaves the store in the same state.
pub struct SyncOrchestrator {
    fetcher: BatchFetcher,
    pool: WorkerPool,
    stats: Arc<SyncStats>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    /// Create an orchestrator, rejecting an unusable `config`.
    pub fn new(
        client: Arc<dyn DistributorClient>,
        store: Arc<dyn LocalStore>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        let stats = Arc::new(SyncStats::new());
        Ok(Self {
            fetcher: BatchFetcher::new(client, store, &config, Arc::clone(&stats)),
            pool: WorkerPool::new(config.concurrency, config.dispatch_interval),
            stats,
            config,
        })
    }

    /// Counters accumulated across every call to
    /// [`start_syncing`](Self::start_syncing).
    pub fn stats(&self) -> &Arc<SyncStats> {
        &self.stats
    }

    /// Sync every batch. The first batch that fails aborts the rest and its
    /// error is returned.
    pub async fn start_syncing(&self, batches: Vec<CycleBatch>) -> Result<StatsSnapshot> {
        if let Some(batch) = batches.iter().find(|b| !b.is_valid()) {
            return Err(SyncError::InvalidConfig(format!(
                "batch {batch} starts after it ends"
            )));
        }

        let total = batches.len();
        if total == 0 {
            info!("Nothing to sync");
            return Ok(self.stats.snapshot());
        }

        let first = batches.first().map(|b| b.start_cycle).unwrap_or_default();
        let last = batches.last().map(|b| b.end_cycle).unwrap_or_default();
        info!(
            batches = total,
            start_cycle = first,
            end_cycle = last,
            concurrency = self.pool.concurrency(),
            "Starting sync"
        );
        self.stats.add_batches_total(total as u64);

        let work = self.pool.run(batches, |batch| {
            let fetcher = self.fetcher.clone();
            let stats = Arc::clone(&self.stats);
            async move {
                sync_batch(&fetcher, batch).await.map_err(|e| e.in_batch(batch))?;
                stats.batch_completed();
                Ok(())
            }
        });
        tokio::pin!(work);

        let mut progress = interval(self.config.progress_interval);
        progress.set_missed_tick_behavior(MissedTickBehavior::Delay);
        progress.tick().await;

        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                _ = progress.tick() => log_progress(&self.stats.snapshot()),
            }
        };

        let snapshot = self.stats.snapshot();
        match result {
            Ok(completed) => {
                info!(
                    batches = completed,
                    cycles = snapshot.cycles_synced,
                    receipts = snapshot.receipts_synced,
                    original_txs = snapshot.original_txs_synced,
                    errors = snapshot.errors,
                    elapsed_secs = snapshot.elapsed_secs,
                    "Sync complete"
                );
                Ok(snapshot)
            }
            Err(e) => {
                error!(
                    error = %e,
                    batches_completed = snapshot.batches_completed,
                    batches_total = snapshot.batches_total,
                    "Sync failed"
                );
                Err(e)
            }
        }
    }
}

async fn sync_batch(fetcher: &BatchFetcher, batch: CycleBatch) -> Result<()> {
    let (cycles, receipts, original_txs) = tokio::try_join!(
        fetcher.sync_cycles(batch),
        fetcher.sync_records(RecordKind::Receipt, batch),
        fetcher.sync_records(RecordKind::OriginalTx, batch),
    )?;
    debug!(
        batch = %batch,
        cycles,
        receipts = receipts.records,
        original_txs = original_txs.records,
        "Batch synced"
    );
    Ok(())
}

fn log_progress(snapshot: &StatsSnapshot) {
    info!(
        batches_completed = snapshot.batches_completed,
        batches_total = snapshot.batches_total,
        percent = snapshot.percent_complete(),
        cycles = snapshot.cycles_synced,
        receipts = snapshot.receipts_synced,
        original_txs = snapshot.original_txs_synced,
        errors = snapshot.errors,
        records_per_sec = snapshot.records_per_sec(),
        "Sync progress"
    );
}
