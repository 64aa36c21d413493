//! Inclusive cycle ranges and per-cycle counts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An inclusive range of cycle counters `[start_cycle, end_cycle]`.
///
/// Used both for ranges missing from the local store and for verification
/// windows. `gap_size` is always `end_cycle - start_cycle + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleGap {
    /// First cycle in the range.
    pub start_cycle: u64,
    /// Last cycle in the range (inclusive).
    pub end_cycle: u64,
    /// Number of cycles in the range.
    pub gap_size: u64,
}

impl CycleGap {
    /// Build the range `[start, end]`.
    ///
    /// # Panics
    ///
    /// Panics if `start > end`.
    pub fn new(start: u64, end: u64) -> Self {
        assert!(start <= end, "invalid cycle range [{start}, {end}]");
        Self {
            start_cycle: start,
            end_cycle: end,
            gap_size: end - start + 1,
        }
    }

    /// Build the range `[start, end]`, or `None` when `start > end`.
    pub fn try_new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then(|| Self::new(start, end))
    }

    /// Whether `cycle` lies inside the range.
    pub fn contains(&self, cycle: u64) -> bool {
        self.start_cycle <= cycle && cycle <= self.end_cycle
    }

    /// Whether the two ranges overlap or touch end to end.
    pub fn touches(&self, other: &CycleGap) -> bool {
        self.start_cycle <= other.end_cycle.saturating_add(1)
            && other.start_cycle <= self.end_cycle.saturating_add(1)
    }

    /// Split into consecutive sub-ranges of at most `size` cycles.
    pub fn chunks(&self, size: u64) -> impl Iterator<Item = CycleGap> {
        let size = size.max(1);
        let end = self.end_cycle;
        let mut next = Some(self.start_cycle);
        std::iter::from_fn(move || {
            let start = next?;
            let chunk_end = start.saturating_add(size - 1).min(end);
            next = (chunk_end < end).then(|| chunk_end + 1);
            Some(CycleGap::new(start, chunk_end))
        })
    }
}

impl fmt::Display for CycleGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start_cycle, self.end_cycle)
    }
}

/// Number of records stored for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCount {
    /// Cycle counter.
    pub cycle: u64,
    /// Number of records in that cycle.
    pub count: u64,
}

/// Merge overlapping or adjacent ranges into a sorted, disjoint list.
pub fn merge_ranges(mut ranges: Vec<CycleGap>) -> Vec<CycleGap> {
    ranges.sort_unstable();
    let mut merged: Vec<CycleGap> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if last.touches(&range) => {
                let end = last.end_cycle.max(range.end_cycle);
                *last = CycleGap::new(last.start_cycle, end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Group cycle numbers into maximal runs of consecutive values.
///
/// Input order and duplicates do not matter.
pub fn group_consecutive(cycles: &[u64]) -> Vec<CycleGap> {
    let mut sorted = cycles.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut runs = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return runs;
    };
    let (mut start, mut end) = (first, first);
    for cycle in iter {
        if cycle == end + 1 {
            end = cycle;
        } else {
            runs.push(CycleGap::new(start, end));
            start = cycle;
            end = cycle;
        }
    }
    runs.push(CycleGap::new(start, end));
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_size() {
        let gap = CycleGap::new(150_000, 300_000);
        assert_eq!(gap.gap_size, 150_001);
        assert!(gap.contains(150_000));
        assert!(gap.contains(300_000));
        assert!(!gap.contains(300_001));
        assert_eq!(CycleGap::try_new(5, 4), None);
    }

    #[test]
    fn test_merge_overlapping_and_adjacent() {
        let merged = merge_ranges(vec![
            CycleGap::new(20, 25),
            CycleGap::new(0, 4),
            CycleGap::new(5, 9),
            CycleGap::new(22, 30),
            CycleGap::new(40, 40),
        ]);
        assert_eq!(
            merged,
            vec![
                CycleGap::new(0, 9),
                CycleGap::new(20, 30),
                CycleGap::new(40, 40)
            ]
        );
    }

    #[test]
    fn test_merge_contained_range() {
        let merged = merge_ranges(vec![CycleGap::new(0, 100), CycleGap::new(10, 20)]);
        assert_eq!(merged, vec![CycleGap::new(0, 100)]);
    }

    #[test]
    fn test_group_consecutive() {
        let runs = group_consecutive(&[42, 7, 8, 9, 43, 8, 100]);
        assert_eq!(
            runs,
            vec![
                CycleGap::new(7, 9),
                CycleGap::new(42, 43),
                CycleGap::new(100, 100)
            ]
        );
        assert!(group_consecutive(&[]).is_empty());
    }

    #[test]
    fn test_chunks() {
        let chunks: Vec<_> = CycleGap::new(0, 24).chunks(10).collect();
        assert_eq!(
            chunks,
            vec![
                CycleGap::new(0, 9),
                CycleGap::new(10, 19),
                CycleGap::new(20, 24)
            ]
        );
        let single: Vec<_> = CycleGap::new(u64::MAX - 1, u64::MAX).chunks(10).collect();
        assert_eq!(single, vec![CycleGap::new(u64::MAX - 1, u64::MAX)]);
    }
}
