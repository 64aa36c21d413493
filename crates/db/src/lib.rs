//! SQLite storage for the cycle collector.
//!
//! This crate is the local durable copy of the distributor's ledger:
//!
//! - **Cycles**: cycle metadata keyed by counter
//! - **Receipts** and **original transactions**: records keyed by id
//! - **Operational state**: schema version
//!
//! # Architecture
//!
//! - [`pool`]: Connection pool management using r2d2
//! - [`schema`]: Database schema definitions and table layouts
//! - [`migrations`]: Schema versioning and migration system
//! - [`queries`]: Typed query traits for each table family
//! - [`error`]: Error types for database operations
//!
//! # Write contract
//!
//! Every write is an upsert keyed by the natural identity (cycle counter or
//! record id). Writers can therefore replay pages or run concurrently
//! without any application-level locking: applying the same batch twice
//! yields the same store state.
//!
//! # Usage
//!
//! ```no_run
//! use collector_db::Database;
//!
//! let db = Database::open("path/to/collector.db")?;
//! if let Some(cycle) = db.latest_cycle()? {
//!     println!("Latest cycle: {}", cycle.counter);
//! }
//! # Ok::<(), collector_db::DbError>(())
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod queries;
pub mod schema;

pub use error::DbError;
pub use migrations::{needs_migration, run_migrations, CURRENT_VERSION};
pub use pool::{Database, PooledConnection};
pub use queries::*;

use collector_common::{Cycle, CycleCount, CycleGap, RecordKind, TxRecord};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DbError>;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of pooled connections for file-backed databases.
pub const DEFAULT_POOL_SIZE: u32 = 10;

impl Database {
    /// Opens a database file, creating it (and its parent directory) if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_pool_size(path, DEFAULT_POOL_SIZE)
    }

    /// Opens a database file with an explicit connection pool size.
    pub fn open_with_pool_size(path: impl AsRef<Path>, pool_size: u32) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = r2d2_sqlite::SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch(
                r#"
                PRAGMA synchronous = NORMAL;
                PRAGMA temp_store = MEMORY;
                "#,
            )
        });
        let pool = r2d2::Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)?;

        let db = Self { pool };
        db.initialize()?;
        info!(path = %path.display(), "Opened collector database");
        Ok(db)
    }

    /// Opens an in-memory database, primarily for testing.
    ///
    /// The pool size is limited to 1 since in-memory databases are
    /// connection-specific.
    pub fn open_in_memory() -> Result<Self> {
        let manager = r2d2_sqlite::SqliteConnectionManager::memory();
        let pool = r2d2::Pool::builder().max_size(1).build(manager)?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.connection()?;

        // journal_mode is persistent for file databases and ignored for
        // in-memory ones.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA cache_size = -64000;
        "#,
        )?;

        let tables_exist: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='storestate'",
            [],
            |row| row.get(0),
        )?;

        if tables_exist {
            if migrations::needs_migration(&conn)? {
                migrations::run_migrations(&conn)?;
            }
        } else {
            conn.execute_batch(schema::CREATE_SCHEMA)?;
            migrations::set_schema_version(&conn, CURRENT_VERSION)?;
        }
        Ok(())
    }

    // Cycle operations.

    /// Returns the stored cycle with the highest counter.
    pub fn latest_cycle(&self) -> Result<Option<Cycle>> {
        self.with_connection(|conn| conn.latest_cycle())
    }

    /// Returns the number of stored cycles.
    pub fn cycle_count(&self) -> Result<u64> {
        self.with_connection(|conn| conn.cycle_count())
    }

    /// Loads stored cycles in `[start, end]`.
    pub fn cycles_in_range(&self, start: u64, end: u64) -> Result<Vec<Cycle>> {
        self.with_connection(|conn| conn.cycles_in_range(start, end))
    }

    /// Loads the `limit` most recent stored cycles, ascending.
    pub fn recent_cycles(&self, limit: u64) -> Result<Vec<Cycle>> {
        self.with_connection(|conn| conn.recent_cycles(limit))
    }

    /// Upserts a page of cycles in one transaction.
    pub fn bulk_upsert_cycles(&self, cycles: &[Cycle]) -> Result<usize> {
        if cycles.is_empty() {
            return Ok(0);
        }
        self.transaction(|tx| tx.upsert_cycles(cycles))
    }

    /// Maximal ranges within `[0, target]` with no stored cycle.
    pub fn missing_ranges(&self, target: u64) -> Result<Vec<CycleGap>> {
        self.with_connection(|conn| conn.missing_cycle_ranges(target))
    }

    // Record operations.

    /// Upserts a page of records in one transaction.
    pub fn bulk_upsert_records(&self, kind: RecordKind, records: &[TxRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.transaction(|tx| tx.upsert_records(kind, records))
    }

    /// Per-cycle record counts in `[start, end]`.
    pub fn count_by_cycle_range(
        &self,
        kind: RecordKind,
        start: u64,
        end: u64,
    ) -> Result<Vec<CycleCount>> {
        self.with_connection(|conn| conn.count_by_cycle_range(kind, start, end))
    }

    /// Per-cycle record counts for an explicit list of cycles.
    pub fn count_by_cycle_list(&self, kind: RecordKind, cycles: &[u64]) -> Result<Vec<CycleCount>> {
        self.with_connection(|conn| conn.count_by_cycle_list(kind, cycles))
    }

    /// Total stored records of one kind.
    pub fn total_records(&self, kind: RecordKind) -> Result<u64> {
        self.with_connection(|conn| conn.total_records(kind))
    }

    /// Latest stored record (by `(timestamp, id)`) in `[start, end]`.
    pub fn last_record(&self, kind: RecordKind, start: u64, end: u64) -> Result<Option<TxRecord>> {
        self.with_connection(|conn| conn.last_record(kind, start, end))
    }

    /// All stored records in `[start, end]`, in cursor order.
    pub fn records_in_cycle_range(
        &self,
        kind: RecordKind,
        start: u64,
        end: u64,
    ) -> Result<Vec<TxRecord>> {
        self.with_connection(|conn| conn.records_in_cycle_range(kind, start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cycle(counter: u64) -> Cycle {
        Cycle {
            counter,
            marker: format!("m{counter}"),
            start: 1_000 + counter,
            duration_seconds: 60,
            record: json!({}),
        }
    }

    #[test]
    fn test_open_in_memory_initializes_schema() {
        let db = Database::open_in_memory().unwrap();
        let version = db
            .with_connection(|conn| migrations::get_schema_version(conn))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
        assert!(db.latest_cycle().unwrap().is_none());
    }

    #[test]
    fn test_open_file_reopens_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("collector.db");
        {
            let db = Database::open(&path).unwrap();
            db.bulk_upsert_cycles(&[cycle(0), cycle(1)]).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.cycle_count().unwrap(), 2);
        assert_eq!(db.latest_cycle().unwrap().unwrap().counter, 1);
    }

    #[test]
    fn test_empty_bulk_upserts_are_noops() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.bulk_upsert_cycles(&[]).unwrap(), 0);
        assert_eq!(db.bulk_upsert_records(RecordKind::Receipt, &[]).unwrap(), 0);
    }
}
