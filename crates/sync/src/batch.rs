//! Partitioning of cycle ranges into sync batches.

use std::fmt;

use collector_common::CycleGap;
use serde::{Deserialize, Serialize};

/// A contiguous inclusive range of cycles synced by one worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleBatch {
    /// First cycle of the batch.
    pub start_cycle: u64,
    /// Last cycle of the batch (inclusive).
    pub end_cycle: u64,
    /// Page records from the start of the batch instead of the last stored
    /// record, so holes below the checkpoint are filled.
    #[serde(default)]
    pub refetch: bool,
}

impl CycleBatch {
    /// Create the batch `[start_cycle, end_cycle]`.
    pub fn new(start_cycle: u64, end_cycle: u64) -> Self {
        Self {
            start_cycle,
            end_cycle,
            refetch: false,
        }
    }

    /// The same cycles, paged from the batch start.
    pub fn refetching(self) -> Self {
        Self {
            refetch: true,
            ..self
        }
    }

    /// Whether the bounds describe a non-empty range.
    pub fn is_valid(&self) -> bool {
        self.start_cycle <= self.end_cycle
    }

    /// Number of cycles covered.
    pub fn len(&self) -> u64 {
        self.end_cycle.saturating_sub(self.start_cycle).saturating_add(1)
    }

    /// Always false; a batch covers at least one cycle.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `cycle` belongs to this batch.
    pub fn contains(&self, cycle: u64) -> bool {
        self.start_cycle <= cycle && cycle <= self.end_cycle
    }
}

impl fmt::Display for CycleBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start_cycle, self.end_cycle)
    }
}

impl From<CycleGap> for CycleBatch {
    fn from(gap: CycleGap) -> Self {
        Self::new(gap.start_cycle, gap.end_cycle)
    }
}

/// Split `[start_cycle, end_cycle]` into batches of `batch_size` cycles.
///
/// Batches are contiguous, non-overlapping and cover the range exactly; the
/// last one may be shorter. Returns nothing when `start_cycle > end_cycle`.
/// A `batch_size` of zero is treated as one.
pub fn plan(start_cycle: u64, end_cycle: u64, batch_size: u64) -> Vec<CycleBatch> {
    let mut batches = Vec::new();
    if start_cycle > end_cycle {
        return batches;
    }

    let size = batch_size.max(1);
    let mut start = start_cycle;
    loop {
        let end = start.saturating_add(size - 1).min(end_cycle);
        batches.push(CycleBatch::new(start, end));
        if end >= end_cycle {
            break;
        }
        start = end + 1;
    }
    batches
}

/// Plan batches for each range in turn.
pub fn plan_ranges(ranges: &[CycleGap], batch_size: u64) -> Vec<CycleBatch> {
    ranges
        .iter()
        .flat_map(|range| plan(range.start_cycle, range.end_cycle, batch_size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_last_batch_shorter() {
        assert_eq!(
            plan(100, 125, 10),
            vec![
                CycleBatch::new(100, 109),
                CycleBatch::new(110, 119),
                CycleBatch::new(120, 125),
            ]
        );
    }

    #[test]
    fn test_plan_exact_multiple() {
        let batches = plan(0, 29, 10);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2], CycleBatch::new(20, 29));
    }

    #[test]
    fn test_plan_single_cycle() {
        assert_eq!(plan(5, 5, 10), vec![CycleBatch::new(5, 5)]);
    }

    #[test]
    fn test_plan_inverted_range_is_empty() {
        assert!(plan(10, 9, 10).is_empty());
    }

    #[test]
    fn test_plan_zero_size_treated_as_one() {
        assert_eq!(
            plan(3, 5, 0),
            vec![
                CycleBatch::new(3, 3),
                CycleBatch::new(4, 4),
                CycleBatch::new(5, 5),
            ]
        );
    }

    #[test]
    fn test_plan_near_u64_max() {
        let batches = plan(u64::MAX - 4, u64::MAX, 3);
        assert_eq!(
            batches,
            vec![
                CycleBatch::new(u64::MAX - 4, u64::MAX - 2),
                CycleBatch::new(u64::MAX - 1, u64::MAX),
            ]
        );
    }

    #[test]
    fn test_plan_covers_range_contiguously() {
        let batches = plan(7, 1003, 13);
        assert_eq!(batches.first().map(|b| b.start_cycle), Some(7));
        assert_eq!(batches.last().map(|b| b.end_cycle), Some(1003));
        for pair in batches.windows(2) {
            assert_eq!(pair[0].end_cycle + 1, pair[1].start_cycle);
        }
        let covered: u64 = batches.iter().map(CycleBatch::len).sum();
        assert_eq!(covered, 1003 - 7 + 1);
    }

    #[test]
    fn test_refetching_keeps_bounds() {
        let batch = CycleBatch::new(3, 7).refetching();
        assert!(batch.refetch);
        assert_eq!((batch.start_cycle, batch.end_cycle), (3, 7));
        assert!(!CycleBatch::new(3, 7).refetch);
        assert!(batch.is_valid());
        assert!(!CycleBatch::new(8, 7).is_valid());
    }

    #[test]
    fn test_plan_ranges() {
        let ranges = [CycleGap::new(0, 4), CycleGap::new(20, 22)];
        assert_eq!(
            plan_ranges(&ranges, 3),
            vec![
                CycleBatch::new(0, 2),
                CycleBatch::new(3, 4),
                CycleBatch::new(20, 22),
            ]
        );
    }
}
