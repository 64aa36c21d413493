//! Database error types.
//!
//! All errors from the storage layer are consolidated into [`DbError`],
//! which converts automatically from the underlying SQLite, pool, I/O and
//! JSON errors.

use thiserror::Error;

/// Errors that can occur during database operations.
///
/// # Error Categories
///
/// - **Infrastructure errors**: [`Sqlite`](DbError::Sqlite), [`Pool`](DbError::Pool),
///   [`Io`](DbError::Io), [`Task`](DbError::Task)
/// - **Data errors**: [`Json`](DbError::Json), [`Integrity`](DbError::Integrity)
/// - **Schema errors**: [`Migration`](DbError::Migration)
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite database error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    ///
    /// Occurs when a connection cannot be obtained from the pool,
    /// typically due to pool exhaustion or configuration issues.
    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored payload could not be encoded or decoded as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Data integrity violation.
    ///
    /// Raised when a stored value is outside its domain, for example a
    /// negative cycle counter read back from a column.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Schema migration error.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A blocking database task could not be joined.
    #[error("database task failed: {0}")]
    Task(String),
}
