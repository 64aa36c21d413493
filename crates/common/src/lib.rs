//! Shared value types for the cycle collector.
//!
//! The distributor publishes an append-only ledger partitioned by **cycle**:
//! a numbered, time-bounded epoch. Every other record (receipts and original
//! transactions) carries the counter of the cycle it belongs to. This crate
//! holds the plain data types exchanged by the store, the distributor client
//! and the sync engine:
//!
//! - [`Cycle`]: cycle metadata keyed by its dense `counter`
//! - [`TxRecord`] and [`RecordKind`]: receipts and original transactions
//! - [`CompositeCursor`]: the `(timestamp, id)` pagination key
//! - [`CycleGap`] and [`CycleCount`]: range bookkeeping
//!
//! None of these types are shared mutably; they are moved or cloned between
//! components.

pub mod cycle;
pub mod range;
pub mod record;
pub mod time;

pub use cycle::Cycle;
pub use range::{group_consecutive, merge_ranges, CycleCount, CycleGap};
pub use record::{CompositeCursor, RecordKind, TxRecord};
