//! Inventory unit model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Inventory status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryStatus {
    InStock,
    OutOfStock,
    Scrapped,
}

/// One stored batch-quantity record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryUnit {
    pub id: u64,
    pub vaccine_id: u64,
    pub batch_no: String,
    /// Globally unique
    pub trace_code: String,
    pub production_date: Option<NaiveDate>,
    pub expiry_date: NaiveDate,
    pub channel_id: Option<u64>,
    pub quantity: u32,
    pub status: InventoryStatus,
    pub version: u64,
    pub inbound_time: i64,
    pub outbound_time: Option<i64>,
    pub inbound_temp: Option<f64>,
    pub operator_id: Option<String>,
    pub supplier: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl InventoryUnit {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// A unit expires at the start of its expiry date
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date <= today
    }

    pub fn is_in_stock(&self) -> bool {
        !self.is_deleted() && self.status == InventoryStatus::InStock && self.quantity > 0
    }
}

/// Inbound request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundRequest {
    pub vaccine_id: u64,
    pub batch_no: String,
    /// Scanned code; assigned by the trace recorder when absent
    pub trace_code: Option<String>,
    pub production_date: Option<NaiveDate>,
    pub expiry_date: NaiveDate,
    pub channel_id: u64,
    pub quantity: u32,
    pub temperature: Option<f64>,
    pub operator_id: Option<String>,
    pub supplier: Option<String>,
}

/// Per-vaccine stock summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventorySummary {
    pub vaccine_id: u64,
    pub in_stock: u32,
    pub near_expiry: u32,
    pub expired_in_stock: u32,
}
