//! Order and order item models

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Where the order came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSource {
    Manual,
    His,
}

/// Dispatch priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderPriority {
    Normal,
    Urgent,
}

/// Order lifecycle status
///
/// ```text
/// Pending ──▶ Processing ──▶ Completed
///    │            │    └────▶ Exception ──(resume)──▶ Processing
///    └──▶ Cancelled ◀──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
    Exception,
}

impl OrderStatus {
    /// No transition leaves these states
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Legal edges of the lifecycle graph
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Exception)
                | (Processing, Cancelled)
                | (Exception, Processing)
                | (Exception, Cancelled)
        )
    }
}

/// Order entity, keyed by `order_no`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_no: String,
    pub source: OrderSource,
    pub source_order_id: Option<String>,
    pub patient_ref: Option<String>,
    pub vaccine_id: u64,
    pub quantity: u32,
    pub dose_number: u32,
    pub priority: OrderPriority,
    pub status: OrderStatus,
    pub error_message: Option<String>,
    pub receive_time: i64,
    pub start_time: Option<i64>,
    pub complete_time: Option<i64>,
    pub operator_id: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl Order {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Order intake payload (manual UI or HIS)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub vaccine_code: String,
    pub quantity: u32,
    pub priority: OrderPriority,
    pub patient_ref: Option<String>,
    pub source_order_id: Option<String>,
    pub dose_number: Option<u32>,
    pub operator_id: Option<String>,
}

/// Order item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderItemStatus {
    /// Command in flight or not yet attempted
    Pending,
    Dispensed,
    Failed,
    /// Failed attempt kept for the record after a retry replaced it
    Superseded,
}

/// Why an item failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub code: ErrorCode,
    pub reason: String,
}

/// One dispensed (or attempted) unit of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_no: String,
    /// 1-based position in dispatch order
    pub seq: u32,
    pub inventory_id: u64,
    pub channel_id: u64,
    pub trace_code: String,
    pub batch_no: String,
    pub status: OrderItemStatus,
    pub failure: Option<ItemFailure>,
    pub outbound_temperature: Option<f64>,
    pub vision_verified: bool,
    pub vision_image_ref: Option<String>,
    pub outbound_time: Option<i64>,
    pub created_at: i64,
}

impl OrderItem {
    /// Idempotency key of the dispense outcome
    pub fn dispense_key(&self) -> String {
        format!("{}:{}", self.order_no, self.seq)
    }
}
