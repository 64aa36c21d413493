//! Client for the distributor, the authoritative source of ledger data.
//!
//! The distributor serves three record streams partitioned by cycle:
//! cycle metadata, receipts and original transactions. Requests are signed
//! JSON bodies; responses are JSON envelopes that this crate validates at
//! the boundary into typed values.
//!
//! # Key Types
//!
//! - [`DistributorClient`]: the async trait the sync engine consumes
//! - [`HttpDistributor`]: the `reqwest` implementation
//! - [`RequestSigner`] / [`Ed25519Signer`]: request signing seam
//! - [`DistributorResponse`]: tagged, validated response variants
//! - [`DistributorError`]: errors, with [`DistributorError::is_transient`]
//!   deciding retry eligibility
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use collector_distributor::{
//!     DistributorClient, Ed25519Signer, HttpDistributor, HttpDistributorConfig,
//! };
//!
//! # async fn example() -> collector_distributor::Result<()> {
//! let signer = Arc::new(Ed25519Signer::from_seed(&[1u8; 32]));
//! let client = HttpDistributor::new(&HttpDistributorConfig::default(), signer)?;
//! if let Some(cycle) = client.latest_cycle().await? {
//!     println!("distributor is at cycle {}", cycle.counter);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod query;
pub mod response;
pub mod signer;

pub use client::{create_client, DistributorClient, HttpDistributor, HttpDistributorConfig};
pub use error::DistributorError;
pub use query::{DistributorRequest, QueryType, RecordQuery};
pub use response::{DistributorResponse, ResponseKind};
pub use signer::{verify_signed_request, Ed25519Signer, RequestSigner, SignedRequest};

/// Result type for distributor operations.
pub type Result<T> = std::result::Result<T, DistributorError>;
