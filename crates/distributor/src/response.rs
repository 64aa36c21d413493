//! Typed, validated distributor responses.
//!
//! Responses arrive as JSON envelopes (`{"cycleInfo": [...]}`,
//! `{"receipts": [...]}`, `{"originalTxs": [...]}`, `{"tally": [...]}`,
//! `{"total": n}`). They are decoded here, at the boundary, into
//! [`DistributorResponse`]. Individual malformed entries (a cycle without
//! a marker, a negative counter, a record without an id) are dropped with
//! a warning; the rest of the page is kept.

use collector_common::{Cycle, CycleCount, RecordKind, TxRecord};
use serde_json::Value;
use tracing::warn;

use crate::error::DistributorError;
use crate::Result;

/// What the caller expects a response to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Cycle metadata.
    Cycles,
    /// A page of records.
    Records(RecordKind),
    /// Per-cycle counts.
    Tally,
    /// One total count.
    Total,
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq)]
pub enum DistributorResponse {
    /// Cycle metadata, in the order received.
    CycleBatch(Vec<Cycle>),
    /// A page of receipts.
    ReceiptPage(Vec<TxRecord>),
    /// A page of original transactions.
    OriginalTxPage(Vec<TxRecord>),
    /// Per-cycle counts.
    Tally(Vec<CycleCount>),
    /// A total count.
    Total(u64),
}

impl DistributorResponse {
    /// Decode a raw body into the variant selected by `kind`.
    ///
    /// An empty or `null` body is [`DistributorError::EmptyResponse`].
    pub fn parse(kind: ResponseKind, endpoint: &str, body: &[u8]) -> Result<Self> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(empty(endpoint));
        }
        let value: Value = serde_json::from_slice(body)?;
        if value.is_null() {
            return Err(empty(endpoint));
        }

        match kind {
            ResponseKind::Cycles => {
                let entries = envelope_array(&value, "cycleInfo")?;
                Ok(Self::CycleBatch(
                    entries.iter().filter_map(validate_cycle).collect(),
                ))
            }
            ResponseKind::Records(record_kind) => {
                let key = match record_kind {
                    RecordKind::Receipt => "receipts",
                    RecordKind::OriginalTx => "originalTxs",
                };
                let records = envelope_array(&value, key)?
                    .iter()
                    .filter_map(|entry| validate_record(record_kind, entry))
                    .collect();
                Ok(match record_kind {
                    RecordKind::Receipt => Self::ReceiptPage(records),
                    RecordKind::OriginalTx => Self::OriginalTxPage(records),
                })
            }
            ResponseKind::Tally => {
                let entries = envelope_array(&value, "tally")?;
                Ok(Self::Tally(entries.iter().filter_map(validate_count).collect()))
            }
            ResponseKind::Total => value
                .get("total")
                .and_then(Value::as_u64)
                .map(Self::Total)
                .ok_or_else(|| {
                    DistributorError::InvalidResponse("missing or invalid `total`".to_string())
                }),
        }
    }

    /// Unwrap a cycle batch.
    pub fn into_cycles(self) -> Result<Vec<Cycle>> {
        match self {
            Self::CycleBatch(cycles) => Ok(cycles),
            other => Err(unexpected("cycle batch", &other)),
        }
    }

    /// Unwrap a record page of either kind.
    pub fn into_records(self) -> Result<Vec<TxRecord>> {
        match self {
            Self::ReceiptPage(records) | Self::OriginalTxPage(records) => Ok(records),
            other => Err(unexpected("record page", &other)),
        }
    }

    /// Unwrap a tally.
    pub fn into_tally(self) -> Result<Vec<CycleCount>> {
        match self {
            Self::Tally(counts) => Ok(counts),
            other => Err(unexpected("tally", &other)),
        }
    }

    /// Unwrap a total.
    pub fn into_total(self) -> Result<u64> {
        match self {
            Self::Total(total) => Ok(total),
            other => Err(unexpected("total", &other)),
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Self::CycleBatch(_) => "cycle batch",
            Self::ReceiptPage(_) => "receipt page",
            Self::OriginalTxPage(_) => "original tx page",
            Self::Tally(_) => "tally",
            Self::Total(_) => "total",
        }
    }
}

fn empty(endpoint: &str) -> DistributorError {
    DistributorError::EmptyResponse {
        endpoint: endpoint.to_string(),
    }
}

fn unexpected(wanted: &str, got: &DistributorResponse) -> DistributorError {
    DistributorError::InvalidResponse(format!(
        "expected {wanted}, got {}",
        got.variant_name()
    ))
}

fn envelope_array<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>> {
    value
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| DistributorError::InvalidResponse(format!("missing `{key}` array")))
}

/// Validate one cycle entry. The whole entry is kept as the opaque record.
fn validate_cycle(entry: &Value) -> Option<Cycle> {
    let counter = match entry.get("counter") {
        Some(v) if v.as_u64().is_some() => v.as_u64(),
        Some(v) if v.as_i64().is_some() => {
            warn!(counter = %v, "Skipping cycle with negative counter");
            return None;
        }
        _ => {
            warn!("Skipping cycle without counter");
            return None;
        }
    }?;

    let marker = match entry.get("marker").and_then(Value::as_str) {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => {
            warn!(cycle = counter, "Skipping cycle without marker");
            return None;
        }
    };

    let Some(start) = entry.get("start").and_then(Value::as_u64) else {
        warn!(cycle = counter, "Skipping cycle without start time");
        return None;
    };

    let duration_seconds = entry
        .get("duration")
        .and_then(Value::as_u64)
        .and_then(|d| u32::try_from(d).ok());
    let Some(duration_seconds) = duration_seconds else {
        warn!(cycle = counter, "Skipping cycle without valid duration");
        return None;
    };

    Some(Cycle {
        counter,
        marker,
        start,
        duration_seconds,
        record: entry.clone(),
    })
}

/// Validate one record entry. The whole entry is kept as the payload.
fn validate_record(kind: RecordKind, entry: &Value) -> Option<TxRecord> {
    let alias = match kind {
        RecordKind::Receipt => "receiptId",
        RecordKind::OriginalTx => "txId",
    };
    let id = entry
        .get("id")
        .or_else(|| entry.get(alias))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty());
    let Some(id) = id else {
        warn!(kind = %kind, "Skipping record without id");
        return None;
    };

    let Some(cycle) = entry.get("cycle").and_then(Value::as_u64) else {
        warn!(kind = %kind, id, "Skipping record with missing or negative cycle");
        return None;
    };

    let Some(timestamp) = entry.get("timestamp").and_then(Value::as_i64) else {
        warn!(kind = %kind, id, "Skipping record without timestamp");
        return None;
    };

    Some(TxRecord {
        id: id.to_string(),
        cycle,
        timestamp,
        payload: entry.clone(),
    })
}

fn validate_count(entry: &Value) -> Option<CycleCount> {
    let cycle = entry.get("cycle").and_then(Value::as_u64);
    let count = entry.get("count").and_then(Value::as_u64);
    match (cycle, count) {
        (Some(cycle), Some(count)) => Some(CycleCount { cycle, count }),
        _ => {
            warn!(entry = %entry, "Skipping malformed tally entry");
            None
        }
    }
}
