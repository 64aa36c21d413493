//! Top-level sync entry point: fresh start or recovery.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use collector_distributor::DistributorClient;
use serde::Serialize;
use tracing::{info, warn};

use crate::anomaly::{AnomalyDetector, AnomalyReport};
use crate::batch::{plan, CycleBatch};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::orchestrator::SyncOrchestrator;
use crate::plan::{RecoveryPlan, RecoveryPlanner};
use crate::retry::RetryPolicy;
use crate::stats::StatsSnapshot;
use crate::store::LocalStore;

/// One-time sync of network genesis data, run before the first cycle sync.
#[async_trait]
pub trait GenesisSync: Send + Sync {
    async fn sync_genesis(&self) -> Result<()>;
}

/// A [`GenesisSync`] that has nothing to do.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGenesis;

#[async_trait]
impl GenesisSync for NoGenesis {
    async fn sync_genesis(&self) -> Result<()> {
        Ok(())
    }
}

/// Where the executor is in a [`sync_data`](RecoveryExecutor::sync_data) pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutorState {
    Uninitialized,
    FreshStart,
    RecoveryAnalysis,
    Syncing,
    Idle,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorState::Uninitialized => "uninitialized",
            ExecutorState::FreshStart => "fresh-start",
            ExecutorState::RecoveryAnalysis => "recovery-analysis",
            ExecutorState::Syncing => "syncing",
            ExecutorState::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// Which path a pass took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncRoute {
    /// The distributor has no cycles yet.
    NothingUpstream,
    /// No local cycles; everything was synced from cycle 0.
    FreshStart,
    /// Local data existed; anomalies were checked and a recovery plan run.
    Recovery,
}

/// Outcome of a successful [`sync_data`](RecoveryExecutor::sync_data) pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub route: SyncRoute,
    pub distributor_latest: Option<u64>,
    pub batches: usize,
    /// The plan that was executed, on the recovery route.
    pub plan: Option<RecoveryPlan>,
    pub stats: StatsSnapshot,
}

/// Decides between a fresh start and recovery, then drives the
/// [`SyncOrchestrator`].
///
/// ```text
/// Uninitialized --(no local cycles)--> FreshStart ------------> Syncing --> Idle
///       |                                                         ^
///       +--(local cycles)--> RecoveryAnalysis --(no anomalies)----+
/// ```
///
/// An anomaly, or any unrecovered batch error, ends the pass with an error.
pub struct RecoveryExecutor {
    client: Arc<dyn DistributorClient>,
    store: Arc<dyn LocalStore>,
    config: SyncConfig,
    retry: RetryPolicy,
    orchestrator: SyncOrchestrator,
    planner: RecoveryPlanner,
    anomalies: AnomalyDetector,
    genesis: Arc<dyn GenesisSync>,
    state: ExecutorState,
}

impl RecoveryExecutor {
    /// Create an executor with no genesis step.
    pub fn new(
        client: Arc<dyn DistributorClient>,
        store: Arc<dyn LocalStore>,
        config: SyncConfig,
    ) -> Result<Self> {
        Self::with_genesis(client, store, config, Arc::new(NoGenesis))
    }

    /// Create an executor that runs `genesis` once on a fresh start.
    pub fn with_genesis(
        client: Arc<dyn DistributorClient>,
        store: Arc<dyn LocalStore>,
        config: SyncConfig,
        genesis: Arc<dyn GenesisSync>,
    ) -> Result<Self> {
        let orchestrator =
            SyncOrchestrator::new(Arc::clone(&client), Arc::clone(&store), config.clone())?;
        Ok(Self {
            planner: RecoveryPlanner::new(Arc::clone(&client), Arc::clone(&store), &config),
            anomalies: AnomalyDetector::new(Arc::clone(&client), Arc::clone(&store), &config),
            retry: RetryPolicy::from_config(&config),
            orchestrator,
            client,
            store,
            config,
            genesis,
            state: ExecutorState::Uninitialized,
        })
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    fn transition(&mut self, next: ExecutorState) {
        info!(from = %self.state, to = %next, "Executor state change");
        self.state = next;
    }

    /// Bring the local store level with the distributor.
    pub async fn sync_data(&mut self) -> Result<SyncReport> {
        if self.state != ExecutorState::Uninitialized {
            self.transition(ExecutorState::Uninitialized);
        }

        let Some(distributor_latest) = self.distributor_latest().await? else {
            warn!("Distributor has no cycles yet");
            self.transition(ExecutorState::Idle);
            return Ok(SyncReport {
                route: SyncRoute::NothingUpstream,
                distributor_latest: None,
                batches: 0,
                plan: None,
                stats: self.orchestrator.stats().snapshot(),
            });
        };
        let local_latest = self.store.latest_cycle().await?.map(|c| c.counter);
        info!(distributor_latest, local_latest = ?local_latest, "Sync starting");

        let result = match local_latest {
            None | Some(0) => self.fresh_start(distributor_latest).await,
            Some(_) => self.recover(distributor_latest).await,
        };
        if result.is_ok() {
            self.transition(ExecutorState::Idle);
        }
        result
    }

    async fn fresh_start(&mut self, distributor_latest: u64) -> Result<SyncReport> {
        self.transition(ExecutorState::FreshStart);
        self.genesis.sync_genesis().await?;

        let batches = plan(0, distributor_latest, self.config.cycles_per_batch);
        let stats = self.run_batches(batches.clone()).await?;
        Ok(SyncReport {
            route: SyncRoute::FreshStart,
            distributor_latest: Some(distributor_latest),
            batches: batches.len(),
            plan: None,
            stats,
        })
    }

    async fn recover(&mut self, distributor_latest: u64) -> Result<SyncReport> {
        self.transition(ExecutorState::RecoveryAnalysis);
        let report = self.anomalies.detect(distributor_latest).await?;
        if !report.is_clean() {
            return Err(SyncError::Anomaly(report));
        }

        let recovery = self.planner.generate_plan(distributor_latest, true).await?;
        let batches = recovery.batches(self.config.cycles_per_batch);
        if batches.is_empty() {
            info!("Local store is consistent with the distributor");
        }
        let stats = self.run_batches(batches.clone()).await?;
        Ok(SyncReport {
            route: SyncRoute::Recovery,
            distributor_latest: Some(distributor_latest),
            batches: batches.len(),
            plan: Some(recovery),
            stats,
        })
    }

    async fn run_batches(&mut self, batches: Vec<CycleBatch>) -> Result<StatsSnapshot> {
        self.transition(ExecutorState::Syncing);
        self.orchestrator.start_syncing(batches).await
    }

    /// Run the pre-flight anomaly check on its own.
    pub async fn check_anomalies(&self) -> Result<AnomalyReport> {
        match self.distributor_latest().await? {
            Some(latest) => self.anomalies.detect(latest).await,
            None => Ok(AnomalyReport::default()),
        }
    }

    /// Build the recovery plan without syncing anything. Returns `None`
    /// when the distributor has no cycles.
    pub async fn plan(&self, full_verify: bool) -> Result<Option<RecoveryPlan>> {
        match self.distributor_latest().await? {
            Some(latest) => Ok(Some(self.planner.generate_plan(latest, full_verify).await?)),
            None => Ok(None),
        }
    }

    async fn distributor_latest(&self) -> Result<Option<u64>> {
        let client = &*self.client;
        let latest = self
            .retry
            .run("latest cycle", || async move { client.latest_cycle().await })
            .await?;
        Ok(latest.map(|c| c.counter))
    }
}
