//! Receipt and original-transaction queries.
//!
//! Both record kinds share one table layout (see [`record_table`]); every
//! method takes the [`RecordKind`] that selects the table. Writes are
//! upserts keyed by record id, so replaying a page is harmless.

use collector_common::{CycleCount, RecordKind, TxRecord};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{from_sql_int, to_sql_int};
use crate::error::DbError;
use crate::schema::record_table;

/// SQLite's default host parameter limit is 999; stay well below it.
const MAX_IN_LIST: usize = 500;

/// Query trait for the record tables.
pub trait RecordQueries {
    /// Upserts records keyed by id.
    fn upsert_records(&self, kind: RecordKind, records: &[TxRecord]) -> Result<usize, DbError>;

    /// Per-cycle record counts for cycles in `[start, end]`.
    ///
    /// Cycles without records are omitted.
    fn count_by_cycle_range(
        &self,
        kind: RecordKind,
        start: u64,
        end: u64,
    ) -> Result<Vec<CycleCount>, DbError>;

    /// Per-cycle record counts for an explicit list of cycles.
    ///
    /// Cycles without records are omitted.
    fn count_by_cycle_list(
        &self,
        kind: RecordKind,
        cycles: &[u64],
    ) -> Result<Vec<CycleCount>, DbError>;

    /// Total number of stored records of this kind.
    fn total_records(&self, kind: RecordKind) -> Result<u64, DbError>;

    /// The record with the greatest `(timestamp, id)` whose cycle lies in
    /// `[start, end]`.
    fn last_record(
        &self,
        kind: RecordKind,
        start: u64,
        end: u64,
    ) -> Result<Option<TxRecord>, DbError>;

    /// All records in `[start, end]`, ordered by `(timestamp, id)`.
    fn records_in_cycle_range(
        &self,
        kind: RecordKind,
        start: u64,
        end: u64,
    ) -> Result<Vec<TxRecord>, DbError>;
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<(String, i64, i64, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_record(raw: (String, i64, i64, String)) -> Result<TxRecord, DbError> {
    let (id, cycle, timestamp, payload) = raw;
    Ok(TxRecord {
        id,
        cycle: from_sql_int(cycle, "cycle")?,
        timestamp,
        payload: serde_json::from_str(&payload)?,
    })
}

fn read_count(row: &Row<'_>) -> rusqlite::Result<(i64, i64)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn decode_count(raw: (i64, i64)) -> Result<CycleCount, DbError> {
    Ok(CycleCount {
        cycle: from_sql_int(raw.0, "cycle")?,
        count: from_sql_int(raw.1, "count")?,
    })
}

impl RecordQueries for Connection {
    fn upsert_records(&self, kind: RecordKind, records: &[TxRecord]) -> Result<usize, DbError> {
        let table = record_table(kind);
        let mut stmt = self.prepare_cached(&format!(
            r#"
            INSERT INTO {table} (id, cycle, timestamp, payload)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                cycle = excluded.cycle,
                timestamp = excluded.timestamp,
                payload = excluded.payload
            "#
        ))?;
        for record in records {
            stmt.execute(params![
                record.id,
                to_sql_int(record.cycle)?,
                record.timestamp,
                serde_json::to_string(&record.payload)?,
            ])?;
        }
        Ok(records.len())
    }

    fn count_by_cycle_range(
        &self,
        kind: RecordKind,
        start: u64,
        end: u64,
    ) -> Result<Vec<CycleCount>, DbError> {
        let table = record_table(kind);
        let mut stmt = self.prepare_cached(&format!(
            "SELECT cycle, COUNT(*) FROM {table} WHERE cycle BETWEEN ?1 AND ?2 \
             GROUP BY cycle ORDER BY cycle"
        ))?;
        let rows = stmt.query_map(params![to_sql_int(start)?, to_sql_int(end)?], read_count)?;
        let mut counts = Vec::new();
        for raw in rows {
            counts.push(decode_count(raw?)?);
        }
        Ok(counts)
    }

    fn count_by_cycle_list(
        &self,
        kind: RecordKind,
        cycles: &[u64],
    ) -> Result<Vec<CycleCount>, DbError> {
        let table = record_table(kind);
        let mut counts = Vec::new();
        for chunk in cycles.chunks(MAX_IN_LIST) {
            let values = chunk
                .iter()
                .map(|c| to_sql_int(*c))
                .collect::<Result<Vec<_>, _>>()?;
            let placeholders = vec!["?"; values.len()].join(", ");
            let mut stmt = self.prepare(&format!(
                "SELECT cycle, COUNT(*) FROM {table} WHERE cycle IN ({placeholders}) \
                 GROUP BY cycle ORDER BY cycle"
            ))?;
            let rows = stmt.query_map(params_from_iter(values.iter()), read_count)?;
            for raw in rows {
                counts.push(decode_count(raw?)?);
            }
        }
        counts.sort_by_key(|c| c.cycle);
        counts.dedup_by_key(|c| c.cycle);
        Ok(counts)
    }

    fn total_records(&self, kind: RecordKind) -> Result<u64, DbError> {
        let table = record_table(kind);
        let count: i64 =
            self.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        from_sql_int(count, "count")
    }

    fn last_record(
        &self,
        kind: RecordKind,
        start: u64,
        end: u64,
    ) -> Result<Option<TxRecord>, DbError> {
        let table = record_table(kind);
        let raw = self
            .query_row(
                &format!(
                    "SELECT id, cycle, timestamp, payload FROM {table} \
                     WHERE cycle BETWEEN ?1 AND ?2 \
                     ORDER BY timestamp DESC, id DESC LIMIT 1"
                ),
                params![to_sql_int(start)?, to_sql_int(end)?],
                read_record,
            )
            .optional()?;
        raw.map(decode_record).transpose()
    }

    fn records_in_cycle_range(
        &self,
        kind: RecordKind,
        start: u64,
        end: u64,
    ) -> Result<Vec<TxRecord>, DbError> {
        let table = record_table(kind);
        let mut stmt = self.prepare_cached(&format!(
            "SELECT id, cycle, timestamp, payload FROM {table} \
             WHERE cycle BETWEEN ?1 AND ?2 ORDER BY timestamp, id"
        ))?;
        let rows = stmt.query_map(params![to_sql_int(start)?, to_sql_int(end)?], read_record)?;
        let mut records = Vec::new();
        for raw in rows {
            records.push(decode_record(raw?)?);
        }
        Ok(records)
    }
}
