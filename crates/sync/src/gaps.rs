//! Missing-cycle detection.

use std::sync::Arc;

use collector_common::CycleGap;
use tracing::{debug, info};

use crate::error::Result;
use crate::store::LocalStore;

/// Finds cycle ranges absent from the local store.
///
/// The store answers in one pass over stored counters, which matters
/// because targets run into the hundreds of thousands.
#[derive(Clone)]
pub struct GapDetector {
    store: Arc<dyn LocalStore>,
}

impl GapDetector {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Maximal ranges within `[0, target_cycle]` with no stored cycle.
    ///
    /// An empty store yields one range covering everything; a complete store
    /// yields nothing.
    pub async fn find_missing_ranges(&self, target_cycle: u64) -> Result<Vec<CycleGap>> {
        let gaps = self.store.missing_ranges(target_cycle).await?;
        if gaps.is_empty() {
            debug!(target_cycle, "No missing cycles");
        } else {
            let missing: u64 = gaps.iter().map(|g| g.gap_size).sum();
            info!(
                target_cycle,
                ranges = gaps.len(),
                missing_cycles = missing,
                "Missing cycle ranges detected"
            );
        }
        Ok(gaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collector_common::Cycle;
    use collector_db::Database;
    use serde_json::json;

    fn cycles(range: std::ops::RangeInclusive<u64>) -> Vec<Cycle> {
        range
            .map(|counter| Cycle {
                counter,
                marker: format!("m{counter}"),
                start: counter * 60,
                duration_seconds: 60,
                record: json!({}),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_store_is_one_gap() {
        let detector = GapDetector::new(Arc::new(Database::open_in_memory().unwrap()));
        assert_eq!(
            detector.find_missing_ranges(99).await.unwrap(),
            vec![CycleGap::new(0, 99)]
        );
    }

    #[tokio::test]
    async fn test_complete_store_has_no_gaps() {
        let db = Database::open_in_memory().unwrap();
        db.bulk_upsert_cycles(&cycles(0..=20)).unwrap();
        let detector = GapDetector::new(Arc::new(db));
        assert!(detector.find_missing_ranges(20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interior_and_trailing_gaps() {
        let db = Database::open_in_memory().unwrap();
        db.bulk_upsert_cycles(&cycles(0..=4)).unwrap();
        db.bulk_upsert_cycles(&cycles(8..=9)).unwrap();
        let detector = GapDetector::new(Arc::new(db));
        assert_eq!(
            detector.find_missing_ranges(12).await.unwrap(),
            vec![CycleGap::new(5, 7), CycleGap::new(10, 12)]
        );
    }
}
