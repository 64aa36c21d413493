//! Receipts, original transactions and their pagination cursor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two cursor-paginated record streams.
///
/// Receipts and original transactions share one shape and one sync
/// algorithm; the kind only selects the table and the distributor endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    /// Transaction receipts.
    Receipt,
    /// Original (pre-execution) transactions.
    OriginalTx,
}

impl RecordKind {
    /// Both kinds, in sync order.
    pub const ALL: [RecordKind; 2] = [RecordKind::Receipt, RecordKind::OriginalTx];

    /// Short name used in logs and statistics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Receipt => "receipt",
            RecordKind::OriginalTx => "original_tx",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A receipt or an original transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    /// Unique record id.
    pub id: String,
    /// Counter of the owning cycle.
    pub cycle: u64,
    /// Unix milliseconds. Not unique on its own.
    pub timestamp: i64,
    /// Opaque record body.
    pub payload: serde_json::Value,
}

impl TxRecord {
    /// The cursor that resumes strictly after this record.
    pub fn cursor(&self) -> CompositeCursor {
        CompositeCursor::new(self.timestamp, self.id.clone())
    }
}

/// Resume point for one cycle range and record kind.
///
/// Ordering is lexicographic on `(timestamp, id)`, which is strictly
/// increasing across the records of a cycle window even when timestamps
/// collide. The cursor is never persisted: it is re-derived from the latest
/// stored record, which makes the local store the durable checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct CompositeCursor {
    /// Unix milliseconds of the last observed record.
    pub timestamp: i64,
    /// Id of the last observed record, empty for a fresh cursor.
    pub id: String,
}

impl CompositeCursor {
    /// Create a cursor positioned after `(timestamp, id)`.
    pub fn new(timestamp: i64, id: impl Into<String>) -> Self {
        Self {
            timestamp,
            id: id.into(),
        }
    }

    /// A cursor that starts at `timestamp` with no id tiebreak.
    pub fn starting_at(timestamp: i64) -> Self {
        Self::new(timestamp, String::new())
    }

    /// Whether this cursor was created fresh rather than from a record.
    pub fn is_fresh(&self) -> bool {
        self.id.is_empty()
    }

    /// Whether `record` sorts strictly after this cursor.
    pub fn precedes(&self, record: &TxRecord) -> bool {
        (self.timestamp, self.id.as_str()) < (record.timestamp, record.id.as_str())
    }
}

impl fmt::Display for CompositeCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:?})", self.timestamp, self.id)
    }
}
