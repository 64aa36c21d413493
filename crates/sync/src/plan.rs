//! Recovery planning: what must be re-synced to reach consistency.

use std::sync::Arc;

use collector_common::{group_consecutive, merge_ranges, CycleGap};
use collector_distributor::DistributorClient;
use serde::Serialize;
use tracing::info;

use crate::batch::{plan_ranges, CycleBatch};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::gaps::GapDetector;
use crate::store::LocalStore;
use crate::verify::{lookback_windows, ConsistencyVerifier, MismatchedCycle};

/// Everything one recovery pass found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPlan {
    pub current_distributor_cycle: u64,
    /// `None` when the local store has no cycles.
    pub last_local_cycle: Option<u64>,
    pub missing_cycle_ranges: Vec<CycleGap>,
    pub mismatched_cycles: Vec<MismatchedCycle>,
    /// Ranges whose counts were compared.
    pub lookback_verification_ranges: Vec<CycleGap>,
    pub recovery_needed: bool,
}

impl RecoveryPlan {
    /// Missing ranges and mismatched cycles as one merged list of ranges.
    ///
    /// A mismatch is repaired by re-syncing its cycles like any other range.
    pub fn sync_ranges(&self) -> Vec<CycleGap> {
        let cycles: Vec<u64> = self.mismatched_cycles.iter().map(|m| m.cycle).collect();
        let mut ranges = group_consecutive(&cycles);
        ranges.extend(self.missing_cycle_ranges.iter().copied());
        merge_ranges(ranges)
    }

    /// [`sync_ranges`](Self::sync_ranges) split into batches.
    ///
    /// Batches holding a mismatched cycle are marked
    /// [`refetch`](CycleBatch::refetch): a mismatch can be a hole below the
    /// stored checkpoint, which resuming would never revisit.
    pub fn batches(&self, cycles_per_batch: u64) -> Vec<CycleBatch> {
        plan_ranges(&self.sync_ranges(), cycles_per_batch)
            .into_iter()
            .map(|batch| {
                if self.mismatched_cycles.iter().any(|m| batch.contains(m.cycle)) {
                    batch.refetching()
                } else {
                    batch
                }
            })
            .collect()
    }

    /// Cycles the plan would re-sync.
    pub fn cycles_to_sync(&self) -> u64 {
        self.sync_ranges().iter().map(|r| r.gap_size).sum()
    }
}

/// Combines gap detection with count verification.
#[derive(Clone)]
pub struct RecoveryPlanner {
    store: Arc<dyn LocalStore>,
    gaps: GapDetector,
    verifier: ConsistencyVerifier,
}

impl RecoveryPlanner {
    pub fn new(
        client: Arc<dyn DistributorClient>,
        store: Arc<dyn LocalStore>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            gaps: GapDetector::new(Arc::clone(&store)),
            verifier: ConsistencyVerifier::new(client, Arc::clone(&store), config),
            store,
        }
    }

    /// Build a plan against a distributor at `current_distributor_cycle`.
    ///
    /// With `full_verify` every cycle in `[0, current_distributor_cycle]` is
    /// count-checked, which catches partial writes where no gap exists.
    /// Otherwise only the lookback windows before each gap are checked.
    pub async fn generate_plan(
        &self,
        current_distributor_cycle: u64,
        full_verify: bool,
    ) -> Result<RecoveryPlan> {
        let last_local_cycle = self.store.latest_cycle().await?.map(|c| c.counter);
        let missing_cycle_ranges = self.gaps.find_missing_ranges(current_distributor_cycle).await?;

        let lookback_verification_ranges = if full_verify {
            vec![CycleGap::new(0, current_distributor_cycle)]
        } else {
            lookback_windows(&missing_cycle_ranges, self.verifier.lookback_cycles())
        };
        let mismatched_cycles = self
            .verifier
            .verify_ranges(&lookback_verification_ranges)
            .await?;

        let recovery_needed = !missing_cycle_ranges.is_empty() || !mismatched_cycles.is_empty();
        let plan = RecoveryPlan {
            current_distributor_cycle,
            last_local_cycle,
            missing_cycle_ranges,
            mismatched_cycles,
            lookback_verification_ranges,
            recovery_needed,
        };

        info!(
            current_distributor_cycle,
            last_local_cycle = ?plan.last_local_cycle,
            missing_ranges = plan.missing_cycle_ranges.len(),
            mismatched_cycles = plan.mismatched_cycles.len(),
            full_verify,
            recovery_needed,
            "Recovery plan generated"
        );
        Ok(plan)
    }
}
