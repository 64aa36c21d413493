//! Cycle metadata.

use serde::{Deserialize, Serialize};

/// A finalized cycle as published by the distributor.
///
/// `counter` is the primary identity and is gapless in a healthy store.
/// `marker` is content-derived and unique across cycles. A cycle never
/// changes once the distributor has finalized it, so re-storing the same
/// counter is a no-op in practice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    /// Dense cycle number.
    pub counter: u64,
    /// Content-derived unique marker.
    pub marker: String,
    /// Cycle start, unix seconds.
    pub start: u64,
    /// Cycle length in seconds.
    pub duration_seconds: u32,
    /// Raw cycle record, kept opaque.
    pub record: serde_json::Value,
}

impl Cycle {
    /// Start of the cycle in unix milliseconds, the unit records use.
    pub fn start_millis(&self) -> i64 {
        crate::time::secs_to_millis(self.start)
    }
}
