//! Database schema definitions.
//!
//! # Tables
//!
//! - `storestate`: key-value store, holds the schema version
//! - `cycles`: cycle metadata keyed by `counter`
//! - `receipts`, `originaltxs`: records keyed by `id`, indexed by cycle and
//!   by the `(timestamp, id)` pagination key
//!
//! There is deliberately no foreign key from records to `cycles`: the
//! cycle and record loops of a batch persist independently and in any
//! order.

use collector_common::RecordKind;

/// Complete SQL schema for initializing a fresh database.
pub const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS storestate (
    statename TEXT PRIMARY KEY,
    state TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cycles (
    counter INTEGER PRIMARY KEY,
    marker TEXT NOT NULL UNIQUE,
    start INTEGER NOT NULL,
    duration INTEGER NOT NULL,
    record TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS receipts (
    id TEXT PRIMARY KEY,
    cycle INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS receipts_cycle ON receipts(cycle);
CREATE INDEX IF NOT EXISTS receipts_cursor ON receipts(timestamp, id);

CREATE TABLE IF NOT EXISTS originaltxs (
    id TEXT PRIMARY KEY,
    cycle INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS originaltxs_cycle ON originaltxs(cycle);
CREATE INDEX IF NOT EXISTS originaltxs_cursor ON originaltxs(timestamp, id);
"#;

/// Table holding records of the given kind.
pub fn record_table(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Receipt => "receipts",
        RecordKind::OriginalTx => "originaltxs",
    }
}

/// Key names used in the `storestate` table.
pub mod state_keys {
    /// Database schema version.
    pub const DATABASE_SCHEMA: &str = "databaseschema";
}
