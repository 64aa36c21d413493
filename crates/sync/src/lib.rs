//! Synchronization and recovery engine for the cycle collector.
//!
//! This crate keeps a local store complete, ordered and consistent with the
//! distributor across network failures, partial downloads and restarts.
//!
//! # Overview
//!
//! A sync pass is driven by the [`RecoveryExecutor`]:
//!
//! 1. **Routing**: with no local cycles the whole range `[0, latest]` is
//!    synced from scratch; otherwise the store is checked for anomalies
//!    first and a [`RecoveryPlan`] decides what to re-sync.
//! 2. **Planning**: the [`GapDetector`] finds missing cycle ranges and the
//!    [`ConsistencyVerifier`] compares per-cycle record counts against
//!    distributor tallies. Mismatched cycles and gaps are merged into ranges.
//! 3. **Syncing**: ranges are split into [`CycleBatch`]es by [`batch::plan`] and
//!    handed to the [`SyncOrchestrator`], which runs them on a bounded,
//!    rate-limited [`WorkerPool`].
//!
//! Within a batch, cycle metadata, receipts and original transactions are
//! synced concurrently. Record loops page with a
//! [`CompositeCursor`](collector_common::CompositeCursor) resolved from the
//! latest stored record, prefetch the next page while persisting the current
//! one, and retry transient distributor errors with exponential backoff.
//!
//! # Consistency model
//!
//! Every write is an idempotent upsert keyed by cycle counter or record id.
//! Batches may finish in any order and may be re-run; the store converges to
//! the same state. No in-memory de-duplication is kept.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use collector_db::Database;
//! use collector_distributor::{Ed25519Signer, HttpDistributor, HttpDistributorConfig};
//! use collector_sync::{RecoveryExecutor, SyncConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(Database::open("collector.db")?);
//! let signer = Arc::new(Ed25519Signer::from_seed(&[1u8; 32]));
//! let client = Arc::new(HttpDistributor::new(&HttpDistributorConfig::default(), signer)?);
//!
//! let mut executor = RecoveryExecutor::new(client, store, SyncConfig::default())?;
//! let report = executor.sync_data().await?;
//! println!("synced {} batches", report.batches);
//! # Ok(())
//! # }
//! ```

pub mod anomaly;
pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gaps;
pub mod orchestrator;
pub mod plan;
pub mod pool;
pub mod recovery;
pub mod retry;
pub mod stats;
pub mod store;
pub mod verify;

pub use anomaly::{Anomaly, AnomalyDetector, AnomalyReport};
pub use batch::{plan, plan_ranges, CycleBatch};
pub use checkpoint::CheckpointResolver;
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use fetch::{BatchFetcher, RecordSyncOutcome};
pub use gaps::GapDetector;
pub use orchestrator::SyncOrchestrator;
pub use plan::{RecoveryPlan, RecoveryPlanner};
pub use pool::WorkerPool;
pub use recovery::{ExecutorState, GenesisSync, NoGenesis, RecoveryExecutor, SyncReport, SyncRoute};
pub use retry::RetryPolicy;
pub use stats::{StatsSnapshot, SyncStats};
pub use store::LocalStore;
pub use verify::{lookback_windows, ConsistencyVerifier, MismatchedCycle};
