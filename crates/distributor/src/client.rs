//! Distributor client trait and its HTTP implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use collector_common::{Cycle, CycleCount, RecordKind, TxRecord};
use reqwest::Client;
use tracing::{debug, trace};
use url::Url;

use crate::error::DistributorError;
use crate::query::{record_endpoint, DistributorRequest, RecordQuery, CYCLE_ENDPOINT};
use crate::response::{DistributorResponse, ResponseKind};
use crate::signer::RequestSigner;
use crate::Result;

/// Default timeout for a single distributor request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Typed access to the distributor's ledger data.
///
/// Implementations perform exactly one request per call and never retry;
/// retry policy belongs to the caller, which uses
/// [`DistributorError::is_transient`] to decide.
#[async_trait]
pub trait DistributorClient: Send + Sync {
    /// The newest finalized cycle, if the distributor has any.
    async fn latest_cycle(&self) -> Result<Option<Cycle>>;

    /// Cycles in `[start, end]`.
    async fn cycles(&self, start: u64, end: u64) -> Result<Vec<Cycle>>;

    /// One cursor page of records of `kind`.
    async fn records(&self, kind: RecordKind, query: &RecordQuery) -> Result<Vec<TxRecord>>;

    /// Per-cycle record counts in `[start, end]`.
    async fn tallies(&self, kind: RecordKind, start: u64, end: u64) -> Result<Vec<CycleCount>>;

    /// Total number of records of `kind`.
    async fn total(&self, kind: RecordKind) -> Result<u64>;
}

/// Configuration for [`HttpDistributor`].
#[derive(Debug, Clone)]
pub struct HttpDistributorConfig {
    /// Base URL, e.g. `http://127.0.0.1:6100`.
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpDistributorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:6100".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Create an HTTP client configured for distributor access.
///
/// The timeout applies to every request; a timed-out request surfaces as a
/// transient error.
pub fn create_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(DistributorError::Http)
}

/// [`DistributorClient`] over signed JSON `POST` requests.
pub struct HttpDistributor {
    client: Client,
    base_url: Url,
    signer: Arc<dyn RequestSigner>,
}

impl HttpDistributor {
    /// Create a client for the distributor at `config.url`.
    pub fn new(config: &HttpDistributorConfig, signer: Arc<dyn RequestSigner>) -> Result<Self> {
        let mut base_url = Url::parse(&config.url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client: create_client(config.timeout)?,
            base_url,
            signer,
        })
    }

    /// The distributor base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn post(
        &self,
        endpoint: &str,
        body: DistributorRequest,
        kind: ResponseKind,
    ) -> Result<DistributorResponse> {
        let url = self.base_url.join(endpoint)?;
        let signed = self.signer.sign(body)?;

        trace!(url = %url, "Sending distributor request");
        let response = self.client.post(url.clone()).json(&signed).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DistributorError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        debug!(endpoint, bytes = bytes.len(), "Distributor response received");
        DistributorResponse::parse(kind, endpoint, &bytes)
    }
}

#[async_trait]
impl DistributorClient for HttpDistributor {
    async fn latest_cycle(&self) -> Result<Option<Cycle>> {
        let cycles = self
            .post(
                CYCLE_ENDPOINT,
                DistributorRequest::latest_cycles(1),
                ResponseKind::Cycles,
            )
            .await?
            .into_cycles()?;
        Ok(cycles.into_iter().max_by_key(|c| c.counter))
    }

    async fn cycles(&self, start: u64, end: u64) -> Result<Vec<Cycle>> {
        self.post(
            CYCLE_ENDPOINT,
            DistributorRequest::cycle_range(start, end),
            ResponseKind::Cycles,
        )
        .await?
        .into_cycles()
    }

    async fn records(&self, kind: RecordKind, query: &RecordQuery) -> Result<Vec<TxRecord>> {
        self.post(
            record_endpoint(kind),
            DistributorRequest::record_page(query),
            ResponseKind::Records(kind),
        )
        .await?
        .into_records()
    }

    async fn tallies(&self, kind: RecordKind, start: u64, end: u64) -> Result<Vec<CycleCount>> {
        self.post(
            record_endpoint(kind),
            DistributorRequest::tally(start, end),
            ResponseKind::Tally,
        )
        .await?
        .into_tally()
    }

    async fn total(&self, kind: RecordKind) -> Result<u64> {
        self.post(
            record_endpoint(kind),
            DistributorRequest::total(),
            ResponseKind::Total,
        )
        .await?
        .into_total()
    }
}
