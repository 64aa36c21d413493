//! Scripted in-memory distributor shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use collector_common::{Cycle, CycleCount, RecordKind, TxRecord};
use collector_db::Database;
use collector_distributor::{DistributorClient, DistributorError, RecordQuery, Result};
use collector_sync::SyncConfig;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A request the fake received.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    LatestCycle,
    Cycles { start: u64, end: u64 },
    Records { kind: RecordKind, query: RecordQuery },
    Tallies { kind: RecordKind, start: u64, end: u64 },
    Total { kind: RecordKind },
}

/// Distributor backed by in-memory data, with scriptable failures.
#[derive(Default)]
pub struct FakeDistributor {
    cycles: BTreeMap<u64, Cycle>,
    records: BTreeMap<RecordKindKey, Vec<TxRecord>>,
    tally_overrides: Mutex<BTreeMap<(RecordKindKey, u64), u64>>,
    failures: Mutex<VecDeque<DistributorError>>,
    always_fail: Mutex<Option<io::ErrorKind>>,
    calls: Mutex<Vec<(Instant, Call)>>,
    record_signal: Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordKindKey(u8);

impl From<RecordKind> for RecordKindKey {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Receipt => RecordKindKey(0),
            RecordKind::OriginalTx => RecordKindKey(1),
        }
    }
}

impl FakeDistributor {
    /// Cycles `0..=latest`, with `per_cycle` receipts and original
    /// transactions in each. Several records share a timestamp so paging
    /// has to rely on the id tiebreak.
    pub fn with_cycles(latest: u64, per_cycle: usize) -> Self {
        let mut fake = Self::default();
        for counter in 0..=latest {
            fake.cycles.insert(counter, cycle(counter));
            for kind in RecordKind::ALL {
                let list = fake.records.entry(kind.into()).or_default();
                for i in 0..per_cycle {
                    list.push(record(kind, counter, i));
                }
            }
        }
        fake.sort();
        fake
    }

    fn sort(&mut self) {
        for list in self.records.values_mut() {
            list.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));
        }
    }

    /// Add records to one cycle.
    pub fn add_records(&mut self, kind: RecordKind, cycle: u64, count: usize) {
        let list = self.records.entry(kind.into()).or_default();
        let existing = list.iter().filter(|r| r.cycle == cycle).count();
        for i in existing..existing + count {
            list.push(record(kind, cycle, i));
        }
        self.sort();
    }

    /// Replace one cycle's marker.
    pub fn set_marker(&mut self, counter: u64, marker: &str) {
        if let Some(c) = self.cycles.get_mut(&counter) {
            c.marker = marker.to_string();
        }
    }

    /// Report `count` in tallies for `cycle`, regardless of the stored records.
    pub fn override_tally(&self, kind: RecordKind, cycle: u64, count: u64) {
        self.tally_overrides
            .lock()
            .unwrap()
            .insert((kind.into(), cycle), count);
    }

    /// Fail the next calls, in order, with these errors.
    pub fn fail_next(&self, errors: Vec<DistributorError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    /// Fail every call with a transport error of `kind`.
    pub fn fail_always(&self, kind: io::ErrorKind) {
        *self.always_fail.lock().unwrap() = Some(kind);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, Call)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn record_queries(&self, kind: RecordKind) -> Vec<RecordQuery> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Records { kind: k, query } if k == kind => Some(query),
                _ => None,
            })
            .collect()
    }

    /// Wait until at least `count` record requests of `kind` have arrived.
    pub async fn wait_for_record_calls(&self, kind: RecordKind, count: usize) {
        loop {
            let notified = self.record_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.record_queries(kind).len() >= count {
                return;
            }
            notified.await;
        }
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn records_of(&self, kind: RecordKind) -> &[TxRecord] {
        self.records
            .get(&kind.into())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn cycle_list(&self) -> Vec<Cycle> {
        self.cycles.values().cloned().collect()
    }

    fn begin(&self, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push((Instant::now(), call));
        self.record_signal.notify_waiters();
        if let Some(kind) = *self.always_fail.lock().unwrap() {
            return Err(DistributorError::transport(kind, "scripted failure"));
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DistributorClient for FakeDistributor {
    async fn latest_cycle(&self) -> Result<Option<Cycle>> {
        self.begin(Call::LatestCycle)?;
        Ok(self.cycles.values().next_back().cloned())
    }

    async fn cycles(&self, start: u64, end: u64) -> Result<Vec<Cycle>> {
        self.begin(Call::Cycles { start, end })?;
        Ok(self.cycles.range(start..=end).map(|(_, c)| c.clone()).collect())
    }

    async fn records(&self, kind: RecordKind, query: &RecordQuery) -> Result<Vec<TxRecord>> {
        self.begin(Call::Records {
            kind,
            query: query.clone(),
        })?;
        // Yield so concurrent loops interleave as they would over the network.
        tokio::task::yield_now().await;
        Ok(self
            .records_of(kind)
            .iter()
            .filter(|r| r.cycle >= query.start_cycle && r.cycle <= query.end_cycle)
            .filter(|r| query.after.precedes(r))
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn tallies(&self, kind: RecordKind, start: u64, end: u64) -> Result<Vec<CycleCount>> {
        self.begin(Call::Tallies { kind, start, end })?;
        let mut counts: BTreeMap<u64, u64> = BTreeMap::new();
        for r in self.records_of(kind) {
            if r.cycle >= start && r.cycle <= end {
                *counts.entry(r.cycle).or_default() += 1;
            }
        }
        for ((k, cycle), count) in self.tally_overrides.lock().unwrap().iter() {
            if *k == RecordKindKey::from(kind) && *cycle >= start && *cycle <= end {
                counts.insert(*cycle, *count);
            }
        }
        Ok(counts
            .into_iter()
            .map(|(cycle, count)| CycleCount { cycle, count })
            .collect())
    }

    async fn total(&self, kind: RecordKind) -> Result<u64> {
        self.begin(Call::Total { kind })?;
        Ok(self.records_of(kind).len() as u64)
    }
}

pub fn cycle(counter: u64) -> Cycle {
    Cycle {
        counter,
        marker: format!("marker-{counter}"),
        start: 1_600_000_000 + counter * 60,
        duration_seconds: 60,
        record: json!({ "counter": counter }),
    }
}

/// Records in a cycle come in pairs sharing a timestamp.
pub fn record(kind: RecordKind, cycle: u64, index: usize) -> TxRecord {
    let base = (1_600_000_000 + cycle as i64 * 60) * 1000;
    TxRecord {
        id: format!("{}-{cycle:06}-{index:04}", kind.as_str()),
        cycle,
        timestamp: base + (index as i64 / 2) * 10,
        payload: json!({ "cycle": cycle, "index": index }),
    }
}

/// Small batches and pages so a handful of cycles exercises every path.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        cycles_per_batch: 5,
        concurrency: 3,
        dispatch_interval: Duration::from_millis(10),
        cycles_per_request: 100,
        receipts_per_request: 4,
        original_txs_per_request: 3,
        retry_attempts: 3,
        retry_base_delay: Duration::from_millis(100),
        anomaly_lookback_cycles: 15,
        verify_chunk_cycles: 7,
        progress_interval: Duration::from_secs(30),
    }
}

pub fn memory_store() -> Arc<Database> {
    Arc::new(Database::open_in_memory().expect("in-memory database"))
}

/// Copy every distributor cycle and record into `db`.
pub fn mirror_into(fake: &FakeDistributor, db: &Database) {
    db.bulk_upsert_cycles(&fake.cycle_list()).unwrap();
    for kind in RecordKind::ALL {
        db.bulk_upsert_records(kind, fake.records_of(kind)).unwrap();
    }
}

/// Copy distributor cycles and records up to and including `last_cycle`.
pub fn mirror_through(fake: &FakeDistributor, db: &Database, last_cycle: u64) {
    mirror_filtered(fake, db, |c| c <= last_cycle, |_| true);
}

/// Copy the cycles accepted by `keep_cycle`, and the records in those cycles
/// accepted by `keep_record`.
pub fn mirror_filtered(
    fake: &FakeDistributor,
    db: &Database,
    keep_cycle: impl Fn(u64) -> bool,
    keep_record: impl Fn(&TxRecord) -> bool,
) {
    let cycles: Vec<Cycle> = fake
        .cycle_list()
        .into_iter()
        .filter(|c| keep_cycle(c.counter))
        .collect();
    db.bulk_upsert_cycles(&cycles).unwrap();
    for kind in RecordKind::ALL {
        let records: Vec<TxRecord> = fake
            .records_of(kind)
            .iter()
            .filter(|r| keep_cycle(r.cycle) && keep_record(r))
            .cloned()
            .collect();
        db.bulk_upsert_records(kind, &records).unwrap();
    }
}
