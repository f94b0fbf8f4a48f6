//! Stock movement trace ledger model

use serde::{Deserialize, Serialize};

/// Stock operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceOperation {
    Inbound,
    Outbound,
    Transfer,
    Scrap,
}

impl TraceOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceOperation::Inbound => "INBOUND",
            TraceOperation::Outbound => "OUTBOUND",
            TraceOperation::Transfer => "TRANSFER",
            TraceOperation::Scrap => "SCRAP",
        }
    }

    /// Display name (入库/出库/移库/报废)
    pub fn display_name(&self) -> &'static str {
        match self {
            TraceOperation::Inbound => "入库",
            TraceOperation::Outbound => "出库",
            TraceOperation::Transfer => "移库",
            TraceOperation::Scrap => "报废",
        }
    }
}

impl std::fmt::Display for TraceOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only trace record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Global, monotonically increasing
    pub sequence: u64,
    pub trace_code: String,
    pub inventory_id: u64,
    pub batch_no: String,
    pub operation: TraceOperation,
    pub from_location: Option<String>,
    pub to_location: Option<String>,
    pub temperature: Option<f64>,
    pub operator_id: Option<String>,
    pub remark: Option<String>,
    pub operated_at: i64,
}
