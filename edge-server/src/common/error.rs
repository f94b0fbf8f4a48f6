//! Unified Error Handling
//!
//! Every failure surfaced by the engine maps onto a stable [`ErrorCode`].

use shared::ErrorCode;
use shared::models::OrderStatus;
use thiserror::Error;

use crate::dispatch::DeviceError;
use crate::lock::LockError;
use crate::storage::StorageError;

/// Engine-level error type
#[derive(Debug, Error)]
pub enum EngineError {
    // ========== Validation ==========
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    // ========== Orders ==========
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {order_no} cannot move from {from:?} to {to:?}")]
    InvalidOrderState {
        order_no: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Order {0} was cancelled")]
    OrderCancelled(String),

    // ========== Inventory ==========
    #[error("Unknown or deleted vaccine: {0}")]
    InvalidVaccine(String),

    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },

    #[error("Channel {0} is not available")]
    ChannelUnavailable(String),

    #[error("Channel {position} capacity {capacity} exceeded")]
    ChannelCapacityExceeded { position: String, capacity: u32 },

    #[error("Channel {0} is bound to another vaccine")]
    ChannelBoundToOtherVaccine(String),

    #[error("Stock expired: {0}")]
    StockExpired(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModificationConflict(String),

    #[error("Vaccine {0} still has stock")]
    VaccineInUse(String),

    #[error("Inventory {0} is not in stock")]
    InventoryNotInStock(u64),

    // ========== Collaborators ==========
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Vision verification failed: {0}")]
    VisionRejected(String),

    #[error("Dispense failed: {0}")]
    DispenseFailed(String),

    // ========== Monitoring ==========
    #[error("Alarm not found: {0}")]
    AlarmNotFound(u64),

    #[error("Invalid alarm transition: {0}")]
    InvalidAlarmTransition(String),

    // ========== System ==========
    #[error("System busy: {0}")]
    SystemBusy(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Stable error code for collaborators
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Validation(_) => ErrorCode::ValidationFailed,
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            EngineError::OrderNotFound(_) => ErrorCode::OrderNotFound,
            EngineError::InvalidOrderState { .. } => ErrorCode::InvalidOrderState,
            EngineError::OrderCancelled(_) => ErrorCode::OrderCancelled,
            EngineError::InvalidVaccine(_) => ErrorCode::InvalidVaccine,
            EngineError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
            EngineError::ChannelUnavailable(_) => ErrorCode::ChannelUnavailable,
            EngineError::ChannelCapacityExceeded { .. } => ErrorCode::ChannelCapacityExceeded,
            EngineError::ChannelBoundToOtherVaccine(_) => ErrorCode::ChannelBoundToOtherVaccine,
            EngineError::StockExpired(_) => ErrorCode::StockExpired,
            EngineError::ConcurrentModificationConflict(_) => {
                ErrorCode::ConcurrentModificationConflict
            }
            EngineError::VaccineInUse(_) => ErrorCode::VaccineInUse,
            EngineError::InventoryNotInStock(_) => ErrorCode::InventoryNotInStock,
            EngineError::Lock(e) => e.code(),
            EngineError::Device(e) => e.code(),
            EngineError::VisionRejected(_) => ErrorCode::VisionVerificationFailed,
            EngineError::DispenseFailed(_) => ErrorCode::DispenseFailed,
            EngineError::AlarmNotFound(_) => ErrorCode::AlarmNotFound,
            EngineError::InvalidAlarmTransition(_) => ErrorCode::InvalidAlarmTransition,
            EngineError::SystemBusy(_) => ErrorCode::SystemBusy,
            EngineError::Storage(StorageError::Duplicate { .. }) => ErrorCode::AlreadyExists,
            EngineError::Storage(_) => ErrorCode::DatabaseError,
            EngineError::Config(_) => ErrorCode::ConfigError,
            EngineError::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
