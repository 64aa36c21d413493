//! Count comparison between the distributor and the local store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use collector_common::{merge_ranges, CycleCount, CycleGap, RecordKind};
use collector_distributor::DistributorClient;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::store::LocalStore;

/// A cycle whose local record counts differ from the distributor's tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchedCycle {
    pub cycle: u64,
    pub local_receipts: u64,
    pub distributor_receipts: u64,
    pub local_original_txs: u64,
    pub distributor_original_txs: u64,
    pub receipts_mismatch: bool,
    pub original_txs_mismatch: bool,
}

impl MismatchedCycle {
    fn compare(cycle: u64, counts: &CycleCounts) -> Option<Self> {
        let receipts_mismatch = counts.local_receipts != counts.distributor_receipts;
        let original_txs_mismatch = counts.local_original_txs != counts.distributor_original_txs;
        (receipts_mismatch || original_txs_mismatch).then_some(Self {
            cycle,
            local_receipts: counts.local_receipts,
            distributor_receipts: counts.distributor_receipts,
            local_original_txs: counts.local_original_txs,
            distributor_original_txs: counts.distributor_original_txs,
            receipts_mismatch,
            original_txs_mismatch,
        })
    }
}

#[derive(Debug, Default)]
struct CycleCounts {
    local_receipts: u64,
    distributor_receipts: u64,
    local_original_txs: u64,
    distributor_original_txs: u64,
}

/// Lookback windows preceding each gap, merged.
///
/// The window for a gap starting at `s > 0` is
/// `[s.saturating_sub(lookback), s - 1]`; a gap starting at cycle 0 has
/// nothing before it and is checked itself.
pub fn lookback_windows(gaps: &[CycleGap], lookback: u64) -> Vec<CycleGap> {
    let windows = gaps
        .iter()
        .map(|gap| {
            if gap.start_cycle == 0 {
                *gap
            } else {
                CycleGap::new(
                    gap.start_cycle.saturating_sub(lookback),
                    gap.start_cycle - 1,
                )
            }
        })
        .collect();
    merge_ranges(windows)
}

/// Compares per-cycle tallies from the distributor with local counts.
#[derive(Clone)]
pub struct ConsistencyVerifier {
    client: Arc<dyn DistributorClient>,
    store: Arc<dyn LocalStore>,
    retry: RetryPolicy,
    lookback_cycles: u64,
    chunk_cycles: u64,
    concurrency: usize,
}

impl ConsistencyVerifier {
    pub fn new(
        client: Arc<dyn DistributorClient>,
        store: Arc<dyn LocalStore>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            client,
            store,
            retry: RetryPolicy::from_config(config),
            lookback_cycles: config.lookback_cycles(),
            chunk_cycles: config.verify_chunk_cycles,
            concurrency: config.concurrency,
        }
    }

    pub fn lookback_cycles(&self) -> u64 {
        self.lookback_cycles
    }

    /// Check the lookback window before each gap.
    ///
    /// Returns mismatched cycles in ascending order.
    pub async fn verify(&self, gaps: &[CycleGap]) -> Result<Vec<MismatchedCycle>> {
        let windows = lookback_windows(gaps, self.lookback_cycles);
        self.verify_ranges(&windows).await
    }

    /// Check exactly the given ranges, after merging them.
    pub async fn verify_ranges(&self, ranges: &[CycleGap]) -> Result<Vec<MismatchedCycle>> {
        let merged = merge_ranges(ranges.to_vec());
        let chunks: Vec<CycleGap> = merged
            .iter()
            .flat_map(|range| range.chunks(self.chunk_cycles))
            .collect();
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        debug!(ranges = merged.len(), chunks = chunks.len(), "Verifying cycle counts");

        let per_chunk: Vec<Vec<MismatchedCycle>> = stream::iter(chunks)
            .map(|chunk| self.verify_chunk(chunk))
            .buffer_unordered(self.concurrency.max(1))
            .try_collect()
            .await?;

        let mut mismatched: Vec<MismatchedCycle> = per_chunk.into_iter().flatten().collect();
        mismatched.sort_by_key(|m| m.cycle);
        if mismatched.is_empty() {
            info!(ranges = merged.len(), "Verified ranges match the distributor");
        } else {
            warn!(
                mismatched = mismatched.len(),
                first_cycle = mismatched[0].cycle,
                "Cycles with mismatched record counts"
            );
        }
        Ok(mismatched)
    }

    async fn verify_chunk(&self, chunk: CycleGap) -> Result<Vec<MismatchedCycle>> {
        let (remote_receipts, remote_original_txs, local_receipts, local_original_txs) = tokio::try_join!(
            self.fetch_tally(RecordKind::Receipt, chunk),
            self.fetch_tally(RecordKind::OriginalTx, chunk),
            self.local_counts(RecordKind::Receipt, chunk),
            self.local_counts(RecordKind::OriginalTx, chunk),
        )?;

        let mut counts: BTreeMap<u64, CycleCounts> = BTreeMap::new();
        for c in in_range(remote_receipts, chunk) {
            counts.entry(c.cycle).or_default().distributor_receipts = c.count;
        }
        for c in in_range(remote_original_txs, chunk) {
            counts.entry(c.cycle).or_default().distributor_original_txs = c.count;
        }
        for c in in_range(local_receipts, chunk) {
            counts.entry(c.cycle).or_default().local_receipts = c.count;
        }
        for c in in_range(local_original_txs, chunk) {
            counts.entry(c.cycle).or_default().local_original_txs = c.count;
        }

        Ok(counts
            .iter()
            .filter_map(|(cycle, counts)| MismatchedCycle::compare(*cycle, counts))
            .collect())
    }

    async fn fetch_tally(&self, kind: RecordKind, chunk: CycleGap) -> Result<Vec<CycleCount>> {
        let operation = format!("{kind} tally {chunk}");
        let client = &*self.client;
        self.retry
            .run(&operation, || async move {
                client
                    .tallies(kind, chunk.start_cycle, chunk.end_cycle)
                    .await
            })
            .await
    }

    async fn local_counts(&self, kind: RecordKind, chunk: CycleGap) -> Result<Vec<CycleCount>> {
        Ok(self
            .store
            .count_by_cycle_range(kind, chunk.start_cycle, chunk.end_cycle)
            .await?)
    }
}

/// Drops counts outside `range`, and the duplicate if a cycle repeats.
fn in_range(counts: Vec<CycleCount>, range: CycleGap) -> impl Iterator<Item = CycleCount> {
    let mut seen = BTreeSet::new();
    counts
        .into_iter()
        .filter(move |c| range.contains(c.cycle) && seen.insert(c.cycle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookback_window_before_gap() {
        let gaps = [CycleGap::new(500, 600)];
        assert_eq!(lookback_windows(&gaps, 100), vec![CycleGap::new(400, 499)]);
    }

    #[test]
    fn test_lookback_window_clamped_at_zero() {
        let gaps = [CycleGap::new(30, 40)];
        assert_eq!(lookback_windows(&gaps, 100), vec![CycleGap::new(0, 29)]);
    }

    #[test]
    fn test_gap_at_zero_checks_itself() {
        let gaps = [CycleGap::new(0, 9)];
        assert_eq!(lookback_windows(&gaps, 100), vec![CycleGap::new(0, 9)]);
    }

    #[test]
    fn test_overlapping_windows_are_merged() {
        let gaps = [CycleGap::new(150, 160), CycleGap::new(200, 210), CycleGap::new(1000, 1000)];
        assert_eq!(
            lookback_windows(&gaps, 100),
            vec![CycleGap::new(50, 199), CycleGap::new(900, 999)]
        );
    }

    #[test]
    fn test_compare_only_reports_differences() {
        let equal = CycleCounts {
            local_receipts: 3,
            distributor_receipts: 3,
            local_original_txs: 1,
            distributor_original_txs: 1,
        };
        assert!(MismatchedCycle::compare(1, &equal).is_none());

        let differs = CycleCounts {
            local_receipts: 5,
            distributor_receipts: 7,
            ..Default::default()
        };
        let m = MismatchedCycle::compare(42, &differs).unwrap();
        assert_eq!(m.cycle, 42);
        assert!(m.receipts_mismatch);
        assert!(!m.original_txs_mismatch);
    }

    #[test]
    fn test_in_range_dedups() {
        let counts = vec![
            CycleCount { cycle: 1, count: 2 },
            CycleCount { cycle: 1, count: 9 },
            CycleCount { cycle: 5, count: 1 },
        ];
        let kept: Vec<CycleCount> = in_range(counts, CycleGap::new(0, 3)).collect();
        assert_eq!(kept, vec![CycleCount { cycle: 1, count: 2 }]);
    }
}
