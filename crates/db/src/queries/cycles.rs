//! Cycle metadata queries.
//!
//! Cycles are keyed by their dense `counter`. Besides point and range
//! lookups this module owns the gap query used by recovery planning.

use collector_common::{Cycle, CycleGap};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{from_sql_int, to_sql_int};
use crate::error::DbError;

/// Query trait for the `cycles` table.
pub trait CycleQueries {
    /// Upserts cycles keyed by counter. Storing the same cycle twice leaves
    /// the table unchanged.
    fn upsert_cycles(&self, cycles: &[Cycle]) -> Result<usize, DbError>;

    /// Returns the cycle with the highest counter, if any.
    fn latest_cycle(&self) -> Result<Option<Cycle>, DbError>;

    /// Returns the number of stored cycles.
    fn cycle_count(&self) -> Result<u64, DbError>;

    /// Loads the stored cycles in `[start, end]`, ordered by counter.
    fn cycles_in_range(&self, start: u64, end: u64) -> Result<Vec<Cycle>, DbError>;

    /// Loads the `limit` stored cycles with the highest counters, ascending.
    fn recent_cycles(&self, limit: u64) -> Result<Vec<Cycle>, DbError>;

    /// Returns the maximal ranges within `[0, target]` with no stored cycle.
    ///
    /// Computed with a single ordered scan over the stored counters
    /// (`LEAD` window), never by probing individual cycle numbers.
    fn missing_cycle_ranges(&self, target: u64) -> Result<Vec<CycleGap>, DbError>;
}

const CYCLE_COLUMNS: &str = "counter, marker, start, duration, record";

fn read_cycle(row: &Row<'_>) -> rusqlite::Result<(i64, String, i64, i64, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_cycle(raw: (i64, String, i64, i64, String)) -> Result<Cycle, DbError> {
    let (counter, marker, start, duration, record) = raw;
    Ok(Cycle {
        counter: from_sql_int(counter, "counter")?,
        marker,
        start: from_sql_int(start, "start")?,
        duration_seconds: u32::try_from(duration)
            .map_err(|_| DbError::Integrity(format!("invalid cycle duration {}", duration)))?,
        record: serde_json::from_str(&record)?,
    })
}

impl CycleQueries for Connection {
    fn upsert_cycles(&self, cycles: &[Cycle]) -> Result<usize, DbError> {
        let mut stmt = self.prepare_cached(
            r#"
            INSERT INTO cycles (counter, marker, start, duration, record)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(counter) DO UPDATE SET
                marker = excluded.marker,
                start = excluded.start,
                duration = excluded.duration,
                record = excluded.record
            "#,
        )?;
        for cycle in cycles {
            stmt.execute(params![
                to_sql_int(cycle.counter)?,
                cycle.marker,
                to_sql_int(cycle.start)?,
                cycle.duration_seconds,
                serde_json::to_string(&cycle.record)?,
            ])?;
        }
        Ok(cycles.len())
    }

    fn latest_cycle(&self) -> Result<Option<Cycle>, DbError> {
        let raw = self
            .query_row(
                &format!("SELECT {CYCLE_COLUMNS} FROM cycles ORDER BY counter DESC LIMIT 1"),
                [],
                read_cycle,
            )
            .optional()?;
        raw.map(decode_cycle).transpose()
    }

    fn cycle_count(&self) -> Result<u64, DbError> {
        let count: i64 = self.query_row("SELECT COUNT(*) FROM cycles", [], |row| row.get(0))?;
        from_sql_int(count, "count")
    }

    fn cycles_in_range(&self, start: u64, end: u64) -> Result<Vec<Cycle>, DbError> {
        let mut stmt = self.prepare_cached(&format!(
            "SELECT {CYCLE_COLUMNS} FROM cycles WHERE counter BETWEEN ?1 AND ?2 ORDER BY counter"
        ))?;
        let rows = stmt.query_map(params![to_sql_int(start)?, to_sql_int(end)?], read_cycle)?;
        let mut cycles = Vec::new();
        for raw in rows {
            cycles.push(decode_cycle(raw?)?);
        }
        Ok(cycles)
    }

    fn recent_cycles(&self, limit: u64) -> Result<Vec<Cycle>, DbError> {
        let mut stmt = self.prepare_cached(&format!(
            "SELECT {CYCLE_COLUMNS} FROM cycles ORDER BY counter DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![to_sql_int(limit)?], read_cycle)?;
        let mut cycles = Vec::new();
        for raw in rows {
            cycles.push(decode_cycle(raw?)?);
        }
        cycles.reverse();
        Ok(cycles)
    }

    fn missing_cycle_ranges(&self, target: u64) -> Result<Vec<CycleGap>, DbError> {
        let target_sql = to_sql_int(target)?;

        let (min, max): (Option<i64>, Option<i64>) = self.query_row(
            "SELECT MIN(counter), MAX(counter) FROM cycles WHERE counter <= ?1",
            params![target_sql],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (Some(min), Some(max)) = (min, max) else {
            return Ok(vec![CycleGap::new(0, target)]);
        };
        let min = from_sql_int(min, "counter")?;
        let max = from_sql_int(max, "counter")?;

        let mut gaps = Vec::new();
        if min > 0 {
            gaps.push(CycleGap::new(0, min - 1));
        }

        let mut stmt = self.prepare_cached(
            r#"
            SELECT counter, next_counter FROM (
                SELECT counter, LEAD(counter) OVER (ORDER BY counter) AS next_counter
                FROM cycles
                WHERE counter <= ?1
            )
            WHERE next_counter IS NOT NULL AND next_counter > counter + 1
            ORDER BY counter
            "#,
        )?;
        let rows = stmt.query_map(params![target_sql], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (present, next) = row?;
            let present = from_sql_int(present, "counter")?;
            let next = from_sql_int(next, "counter")?;
            gaps.push(CycleGap::new(present + 1, next - 1));
        }

        if max < target {
            gaps.push(CycleGap::new(max + 1, target));
        }
        Ok(gaps)
    }
}
