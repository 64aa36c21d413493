//! Application layer for the cycle collector.
//!
//! - [`config`]: TOML configuration with `COLLECTOR_*` environment overrides
//! - [`logging`]: `tracing` subscriber setup
//! - [`Collector`]: opens the store, builds the signed distributor client
//!   and runs the sync engine

pub mod collector;
pub mod config;
pub mod logging;

pub use collector::Collector;
pub use config::AppConfig;
