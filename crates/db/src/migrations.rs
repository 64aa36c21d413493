//! Database schema migrations.
//!
//! Migrations are applied sequentially, one version at a time, each inside
//! its own transaction. If a migration fails, the database is left in its
//! previous state.
//!
//! # Adding New Migrations
//!
//! 1. Increment [`CURRENT_VERSION`]
//! 2. Add a new `Migration` entry to the `MIGRATIONS` array
//! 3. The `from_version` should be the previous `CURRENT_VERSION`
//! 4. Provide idempotent SQL (use `IF NOT EXISTS`, `IF EXISTS`, etc.)
//!
//! The migration system refuses to open a database with a schema version
//! newer than [`CURRENT_VERSION`].

use crate::schema::state_keys;
use crate::{DbError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

/// Current database schema version.
pub const CURRENT_VERSION: i32 = 2;

struct Migration {
    from_version: i32,
    to_version: i32,
    upgrade_sql: &'static str,
    description: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    from_version: 1,
    to_version: 2,
    upgrade_sql: r#"
        CREATE INDEX IF NOT EXISTS receipts_cursor ON receipts(timestamp, id);
        CREATE INDEX IF NOT EXISTS originaltxs_cursor ON originaltxs(timestamp, id);
    "#,
    description: "Add (timestamp, id) cursor indexes to record tables",
}];

/// Retrieves the current schema version from the database.
///
/// Returns version 1 if no version is recorded.
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT state FROM storestate WHERE statename = ?1",
            params![state_keys::DATABASE_SCHEMA],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        Some(version_str) => version_str
            .parse()
            .map_err(|_| DbError::Migration(format!("Invalid schema version: {}", version_str))),
        None => Ok(1),
    }
}

/// Records the schema version in the database.
pub fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO storestate (statename, state) VALUES (?1, ?2)",
        params![state_keys::DATABASE_SCHEMA, version.to_string()],
    )?;
    Ok(())
}

/// Checks if the database requires migration.
pub fn needs_migration(conn: &Connection) -> Result<bool> {
    Ok(get_schema_version(conn)? < CURRENT_VERSION)
}

/// Runs all necessary migrations to bring the database up to date.
///
/// # Errors
///
/// Returns an error if the database version is newer than
/// [`CURRENT_VERSION`], a required migration is missing, or a migration
/// fails to execute.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let mut current_version = get_schema_version(conn)?;

    if current_version == CURRENT_VERSION {
        return Ok(());
    }

    if current_version > CURRENT_VERSION {
        return Err(DbError::Migration(format!(
            "Database version {} is newer than supported version {}",
            current_version, CURRENT_VERSION
        )));
    }

    while current_version < CURRENT_VERSION {
        let migration = MIGRATIONS
            .iter()
            .find(|m| m.from_version == current_version)
            .ok_or_else(|| {
                DbError::Migration(format!(
                    "No migration found from version {}",
                    current_version
                ))
            })?;

        info!(
            "Applying migration {} -> {}: {}",
            migration.from_version, migration.to_version, migration.description
        );

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.upgrade_sql)?;
        set_schema_version(&tx, migration.to_version)?;
        tx.commit()?;

        current_version = migration.to_version;
    }

    info!("Database at schema version {}", CURRENT_VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CREATE_SCHEMA;

    #[test]
    fn test_fresh_schema_defaults_to_version_one() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
        assert!(needs_migration(&conn).unwrap());
    }

    #[test]
    fn test_run_migrations_reaches_current() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_VERSION);
        // Second run is a no-op.
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();
        set_schema_version(&conn, CURRENT_VERSION + 1).unwrap();
        assert!(matches!(run_migrations(&conn), Err(DbError::Migration(_))));
    }
}
