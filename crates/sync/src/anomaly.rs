//! Pre-flight checks that refuse to resume on top of a corrupted store.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use collector_common::{group_consecutive, Cycle, CycleCount, RecordKind};
use collector_distributor::DistributorClient;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::store::LocalStore;

/// One disagreement between the local store and the distributor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Anomaly {
    /// The local store holds more cycles, or a later one, than the distributor.
    #[serde(rename_all = "camelCase")]
    LocalAheadOfDistributor {
        local_cycles: u64,
        local_latest: u64,
        distributor_latest: u64,
    },
    /// A recent cycle's marker differs from the distributor's.
    #[serde(rename_all = "camelCase")]
    MarkerMismatch {
        cycle: u64,
        local: String,
        distributor: String,
    },
    /// A recent local cycle is unknown to the distributor.
    #[serde(rename_all = "camelCase")]
    MissingUpstream { cycle: u64 },
    /// A recent cycle holds a different number of records locally than upstream.
    #[serde(rename_all = "camelCase")]
    CountMismatch {
        cycle: u64,
        kind: RecordKind,
        local: u64,
        distributor: u64,
    },
    /// The local store holds more records of a kind than upstream in total.
    #[serde(rename_all = "camelCase")]
    TotalExceedsDistributor {
        kind: RecordKind,
        local: u64,
        distributor: u64,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::LocalAheadOfDistributor {
                local_cycles,
                local_latest,
                distributor_latest,
            } => write!(
                f,
                "local store is ahead of the distributor ({local_cycles} cycles, latest {local_latest}; distributor latest {distributor_latest})"
            ),
            Anomaly::MarkerMismatch {
                cycle,
                local,
                distributor,
            } => write!(f, "cycle {cycle} marker {local} != distributor {distributor}"),
            Anomaly::MissingUpstream { cycle } => {
                write!(f, "cycle {cycle} is stored locally but unknown upstream")
            }
            Anomaly::CountMismatch {
                cycle,
                kind,
                local,
                distributor,
            } => write!(
                f,
                "cycle {cycle} has {local} local {kind} records, distributor has {distributor}"
            ),
            Anomaly::TotalExceedsDistributor {
                kind,
                local,
                distributor,
            } => write!(
                f,
                "{local} local {kind} records in total, distributor has {distributor}"
            ),
        }
    }
}

/// Result of a pre-flight anomaly check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    /// Latest distributor cycle at the time of the check.
    pub distributor_latest: u64,
    /// Latest local cycle, if any.
    pub local_latest: Option<u64>,
    /// Recent cycles compared one by one.
    pub checked_cycles: u64,
    /// Everything found; empty means the store is safe to resume.
    pub anomalies: Vec<Anomaly>,
}

impl AnomalyReport {
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

impl fmt::Display for AnomalyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.anomalies.is_empty() {
            return write!(f, "no anomalies in {} recent cycles", self.checked_cycles);
        }
        write!(f, "{} anomalies", self.anomalies.len())?;
        for anomaly in self.anomalies.iter().take(5) {
            write!(f, "; {anomaly}")?;
        }
        if self.anomalies.len() > 5 {
            write!(f, "; and {} more", self.anomalies.len() - 5)?;
        }
        Ok(())
    }
}

/// Compares recent local history and totals against the distributor.
#[derive(Clone)]
pub struct AnomalyDetector {
    client: Arc<dyn DistributorClient>,
    store: Arc<dyn LocalStore>,
    retry: RetryPolicy,
    lookback_cycles: u64,
}

impl AnomalyDetector {
    pub fn new(
        client: Arc<dyn DistributorClient>,
        store: Arc<dyn LocalStore>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            client,
            store,
            retry: RetryPolicy::from_config(config),
            lookback_cycles: config.anomaly_lookback_cycles,
        }
    }

    /// Check the local store against a distributor whose latest cycle is
    /// `distributor_latest`.
    ///
    /// The most recent `anomaly_lookback_cycles` stored cycles must match
    /// upstream exactly: marker, receipt count and original-tx count.
    pub async fn detect(&self, distributor_latest: u64) -> Result<AnomalyReport> {
        let mut report = AnomalyReport {
            distributor_latest,
            ..Default::default()
        };

        let Some(local_latest) = self.store.latest_cycle().await?.map(|c| c.counter) else {
            info!("Local store is empty, nothing to check");
            return Ok(report);
        };
        report.local_latest = Some(local_latest);

        let local_cycles = self.store.cycle_count().await?;
        if local_latest > distributor_latest || local_cycles > distributor_latest.saturating_add(1) {
            report.anomalies.push(Anomaly::LocalAheadOfDistributor {
                local_cycles,
                local_latest,
                distributor_latest,
            });
        }

        // Cycles past the distributor's tip are already reported above.
        let recent: Vec<Cycle> = self
            .store
            .recent_cycles(self.lookback_cycles.max(1))
            .await?
            .into_iter()
            .filter(|c| c.counter <= distributor_latest)
            .collect();
        if !recent.is_empty() {
            self.check_recent(&recent, &mut report).await?;
        }
        self.check_totals(&mut report).await?;

        if report.is_clean() {
            info!(
                checked_cycles = report.checked_cycles,
                local_latest, distributor_latest, "No anomalies detected"
            );
        } else {
            for anomaly in &report.anomalies {
                warn!(anomaly = %anomaly, "Anomaly detected");
            }
        }
        Ok(report)
    }

    /// Compare `local` (ascending, possibly with gaps) against upstream, one
    /// request per run of consecutive counters.
    async fn check_recent(&self, local: &[Cycle], report: &mut AnomalyReport) -> Result<()> {
        let counters: Vec<u64> = local.iter().map(|c| c.counter).collect();
        let runs = group_consecutive(&counters);
        let client = &*self.client;

        let mut remote: HashMap<u64, Cycle> = HashMap::new();
        for run in &runs {
            let (start, end) = (run.start_cycle, run.end_cycle);
            let operation = format!("cycles {run}");
            let cycles = self
                .retry
                .run(&operation, || async move { client.cycles(start, end).await })
                .await?;
            remote.extend(cycles.into_iter().map(|c| (c.counter, c)));
        }

        let mut present = Vec::with_capacity(local.len());
        for cycle in local {
            match remote.get(&cycle.counter) {
                None => report.anomalies.push(Anomaly::MissingUpstream {
                    cycle: cycle.counter,
                }),
                Some(upstream) if upstream.marker != cycle.marker => {
                    report.anomalies.push(Anomaly::MarkerMismatch {
                        cycle: cycle.counter,
                        local: cycle.marker.clone(),
                        distributor: upstream.marker.clone(),
                    })
                }
                Some(_) => present.push(cycle.counter),
            }
        }
        report.checked_cycles = local.len() as u64;

        for kind in RecordKind::ALL {
            let mut upstream = HashMap::new();
            for run in &runs {
                let (start, end) = (run.start_cycle, run.end_cycle);
                let operation = format!("{kind} tally {run}");
                let counts = self
                    .retry
                    .run(&operation, || async move { client.tallies(kind, start, end).await })
                    .await?;
                upstream.extend(to_map(counts));
            }
            let local_counts = to_map(self.store.count_by_cycle_list(kind, present.clone()).await?);

            for cycle in &present {
                let local = local_counts.get(cycle).copied().unwrap_or(0);
                let distributor = upstream.get(cycle).copied().unwrap_or(0);
                if local != distributor {
                    report.anomalies.push(Anomaly::CountMismatch {
                        cycle: *cycle,
                        kind,
                        local,
                        distributor,
                    });
                }
            }
        }
        Ok(())
    }

    async fn check_totals(&self, report: &mut AnomalyReport) -> Result<()> {
        let client = &*self.client;
        for kind in RecordKind::ALL {
            let local = self.store.total_records(kind).await?;
            let operation = format!("{kind} total");
            let distributor = self
                .retry
                .run(&operation, || async move { client.total(kind).await })
                .await?;
            if local > distributor {
                report.anomalies.push(Anomaly::TotalExceedsDistributor {
                    kind,
                    local,
                    distributor,
                });
            }
        }
        Ok(())
    }
}

fn to_map(counts: Vec<CycleCount>) -> HashMap<u64, u64> {
    counts.into_iter().map(|c| (c.cycle, c.count)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display_truncates() {
        let report = AnomalyReport {
            anomalies: (0..7).map(|cycle| Anomaly::MissingUpstream { cycle }).collect(),
            ..Default::default()
        };
        let text = report.to_string();
        assert!(text.starts_with("7 anomalies"), "{text}");
        assert!(text.ends_with("and 2 more"), "{text}");
        assert!(!report.is_clean());
    }

    #[test]
    fn test_count_mismatch_display() {
        let anomaly = Anomaly::CountMismatch {
            cycle: 19,
            kind: RecordKind::OriginalTx,
            local: 1,
            distributor: 3,
        };
        assert_eq!(
            anomaly.to_string(),
            format!("cycle 19 has 1 local {} records, distributor has 3", RecordKind::OriginalTx)
        );
    }

    #[test]
    fn test_anomaly_serializes_tagged() {
        let json = serde_json::to_value(Anomaly::TotalExceedsDistributor {
            kind: RecordKind::Receipt,
            local: 10,
            distributor: 9,
        })
        .unwrap();
        assert_eq!(json["type"], "totalExceedsDistributor");
        assert_eq!(json["kind"], "receipt");
    }
}
