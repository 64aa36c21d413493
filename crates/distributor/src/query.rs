//! Request bodies sent to the distributor.

use collector_common::{CompositeCursor, RecordKind};
use serde::{Deserialize, Serialize};

/// Aggregation mode for record endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Per-cycle record counts instead of records.
    Tally,
    /// A single total count.
    Count,
}

/// Unsigned request body.
///
/// Field names follow the distributor's JSON conventions. Absent fields
/// are omitted from the encoded body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributorRequest {
    /// First cycle of the window (inclusive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_cycle: Option<u64>,
    /// Last cycle of the window (inclusive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_cycle: Option<u64>,
    /// Cursor timestamp; only records strictly after the cursor are returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_timestamp: Option<i64>,
    /// Cursor id tiebreak.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_tx_id: Option<String>,
    /// Maximum number of entries to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Ask for the latest `count` entries (cycle endpoint only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Aggregation mode.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryType>,
    /// Page number for page-based endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl DistributorRequest {
    /// Latest `count` cycles.
    pub fn latest_cycles(count: u32) -> Self {
        Self {
            count: Some(count),
            ..Default::default()
        }
    }

    /// Cycles in `[start, end]`.
    pub fn cycle_range(start: u64, end: u64) -> Self {
        Self {
            start_cycle: Some(start),
            end_cycle: Some(end),
            ..Default::default()
        }
    }

    /// One cursor page of records.
    pub fn record_page(query: &RecordQuery) -> Self {
        Self {
            start_cycle: Some(query.start_cycle),
            end_cycle: Some(query.end_cycle),
            after_timestamp: Some(query.after.timestamp),
            after_tx_id: Some(query.after.id.clone()),
            limit: Some(query.limit),
            ..Default::default()
        }
    }

    /// Per-cycle counts in `[start, end]`.
    pub fn tally(start: u64, end: u64) -> Self {
        Self {
            start_cycle: Some(start),
            end_cycle: Some(end),
            query_type: Some(QueryType::Tally),
            ..Default::default()
        }
    }

    /// Total record count.
    pub fn total() -> Self {
        Self {
            query_type: Some(QueryType::Count),
            ..Default::default()
        }
    }
}

/// A cursor-paginated record fetch for one cycle window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    /// First cycle of the window.
    pub start_cycle: u64,
    /// Last cycle of the window.
    pub end_cycle: u64,
    /// Only records strictly after this cursor.
    pub after: CompositeCursor,
    /// Page size.
    pub limit: u32,
}

/// Endpoint path serving records of `kind`.
pub fn record_endpoint(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Receipt => "receipt",
        RecordKind::OriginalTx => "originalTx",
    }
}

/// Endpoint path serving cycle metadata.
pub const CYCLE_ENDPOINT: &str = "cycleinfo";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_page_body() {
        let query = RecordQuery {
            start_cycle: 100,
            end_cycle: 109,
            after: CompositeCursor::new(1_700_000_000_000, "abc"),
            limit: 100,
        };
        let body = serde_json::to_value(DistributorRequest::record_page(&query)).unwrap();
        assert_eq!(
            body,
            json!({
                "startCycle": 100,
                "endCycle": 109,
                "afterTimestamp": 1_700_000_000_000i64,
                "afterTxId": "abc",
                "limit": 100
            })
        );
    }

    #[test]
    fn test_tally_and_total_bodies() {
        assert_eq!(
            serde_json::to_value(DistributorRequest::tally(1, 2)).unwrap(),
            json!({ "startCycle": 1, "endCycle": 2, "type": "tally" })
        );
        assert_eq!(
            serde_json::to_value(DistributorRequest::total()).unwrap(),
            json!({ "type": "count" })
        );
    }
}
