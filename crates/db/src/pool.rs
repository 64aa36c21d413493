//! Connection pool management.
//!
//! This module provides the [`Database`] struct which wraps an r2d2 connection
//! pool for SQLite. The pool allows the sync workers to write concurrently
//! while SQLite serializes the actual commits.
//!
//! # Thread Safety
//!
//! The [`Database`] type is `Clone` and can be shared across threads. Each
//! call to [`connection`](Database::connection) returns a connection from
//! the pool, which is returned to the pool when dropped.
//!
//! # Transactions
//!
//! For operations that require atomicity, use [`transaction`](Database::transaction)
//! which ensures the closure runs within a database transaction.

use crate::error::DbError;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, TransactionBehavior};

/// A pooled SQLite connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Database handle with connection pooling.
///
/// # Example
///
/// ```no_run
/// use collector_db::Database;
///
/// let db = Database::open("collector.db")?;
///
/// db.with_connection(|conn| {
///     // Use rusqlite connection methods here
///     Ok(())
/// })?;
///
/// db.transaction(|tx| {
///     // Operations here are atomic
///     Ok(())
/// })?;
/// # Ok::<(), collector_db::DbError>(())
/// ```
#[derive(Clone)]
pub struct Database {
    /// The underlying r2d2 connection pool.
    pub(crate) pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Obtains a connection from the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is exhausted or a connection cannot
    /// be established.
    pub fn connection(&self) -> Result<PooledConnection, DbError> {
        self.pool.get().map_err(DbError::from)
    }

    /// Executes a closure within a database transaction.
    ///
    /// If the closure returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back.
    ///
    /// The transaction takes the write lock up front (`BEGIN IMMEDIATE`) so
    /// that concurrent writers wait on the busy timeout instead of failing
    /// on lock upgrade.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<T, DbError>,
    {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Executes a closure with a database connection.
    ///
    /// ```no_run
    /// # use collector_db::Database;
    /// # let db = Database::open_in_memory()?;
    /// let count: i64 = db.with_connection(|conn| {
    ///     conn.query_row("SELECT COUNT(*) FROM cycles", [], |row| row.get(0))
    ///         .map_err(Into::into)
    /// })?;
    /// # Ok::<(), collector_db::DbError>(())
    /// ```
    pub fn with_connection<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        let conn = self.connection()?;
        f(&conn)
    }
}
