//! Typed query traits.
//!
//! Each trait extends [`rusqlite::Connection`] (and therefore
//! [`rusqlite::Transaction`]) with the operations for one table family.

mod cycles;
mod records;

pub use cycles::CycleQueries;
pub use records::RecordQueries;

use crate::error::DbError;

/// Convert a counter to SQLite's signed integer domain.
pub(crate) fn to_sql_int(value: u64) -> Result<i64, DbError> {
    i64::try_from(value)
        .map_err(|_| DbError::Integrity(format!("value {} exceeds SQLite integer range", value)))
}

/// Convert a stored integer back to an unsigned counter.
pub(crate) fn from_sql_int(value: i64, column: &str) -> Result<u64, DbError> {
    u64::try_from(value)
        .map_err(|_| DbError::Integrity(format!("negative {} value {}", column, value)))
}
