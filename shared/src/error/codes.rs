//! Unified error codes for the vaccine dispensing engine
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 4xxx: Order errors
//! - 6xxx: Inventory errors
//! - 7xxx: Hardware errors
//! - 8xxx: Monitoring errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// Represented as u16 on the wire so the publish side and the HIS
/// collaborator can match on stable numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,

    // ==================== 4xxx: Order ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Order is not in a state that allows the operation
    InvalidOrderState = 4002,
    /// Order was cancelled before the item could be dispensed
    OrderCancelled = 4003,

    // ==================== 6xxx: Inventory ====================
    /// Vaccine unknown or retired
    InvalidVaccine = 6001,
    /// Not enough eligible stock to satisfy the request
    InsufficientStock = 6002,
    /// Channel is faulted, disabled, empty or no substitute exists
    ChannelUnavailable = 6003,
    /// Channel capacity would be exceeded
    ChannelCapacityExceeded = 6004,
    /// Channel holds stock of another vaccine
    ChannelBoundToOtherVaccine = 6005,
    /// Stock is already expired
    StockExpired = 6006,
    /// Row changed since it was read
    ConcurrentModificationConflict = 6007,
    /// Vaccine is still referenced by stock
    VaccineInUse = 6008,
    /// Inventory unit is not in stock
    InventoryNotInStock = 6009,

    // ==================== 7xxx: Hardware ====================
    /// Machine lock could not be acquired within the attempt cap
    LockAcquisitionTimeout = 7001,
    /// Machine lock expired while held
    LockLost = 7002,
    /// Dispense command was not answered in time
    HardwareTimeout = 7003,
    /// Vision station rejected the dispensed unit
    VisionVerificationFailed = 7004,
    /// Mechanical dispense failure (jam, empty slot)
    DispenseFailed = 7005,
    /// Dispense device unreachable
    DeviceUnavailable = 7006,

    // ==================== 8xxx: Monitoring ====================
    /// Storage temperature out of range
    TemperatureBreach = 8001,
    /// Alarm not found
    AlarmNotFound = 8002,
    /// Alarm status transition not allowed
    InvalidAlarmTransition = 8003,

    // ==================== 9xxx: System ====================
    /// Internal error
    InternalError = 9001,
    /// Storage unreachable or failed
    DatabaseError = 9002,
    /// Configuration error
    ConfigError = 9003,
    /// Pending order queue is full
    SystemBusy = 9004,
}

impl ErrorCode {
    /// Numeric value of the code
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Whether this code represents success
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Default English message
    pub const fn message(&self) -> &'static str {
        match self {
            ErrorCode::Success => "Success",
            ErrorCode::Unknown => "Unknown error",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",
            ErrorCode::InvalidRequest => "Invalid request",

            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::InvalidOrderState => "Order state does not allow this operation",
            ErrorCode::OrderCancelled => "Order was cancelled",

            ErrorCode::InvalidVaccine => "Invalid vaccine",
            ErrorCode::InsufficientStock => "Insufficient stock",
            ErrorCode::ChannelUnavailable => "Channel unavailable",
            ErrorCode::ChannelCapacityExceeded => "Channel capacity exceeded",
            ErrorCode::ChannelBoundToOtherVaccine => "Channel holds another vaccine",
            ErrorCode::StockExpired => "Stock is expired",
            ErrorCode::ConcurrentModificationConflict => "Concurrent modification conflict",
            ErrorCode::VaccineInUse => "Vaccine is referenced by stock",
            ErrorCode::InventoryNotInStock => "Inventory unit is not in stock",

            ErrorCode::LockAcquisitionTimeout => "Machine lock acquisition timed out",
            ErrorCode::LockLost => "Machine lock lost",
            ErrorCode::HardwareTimeout => "Hardware did not respond in time",
            ErrorCode::VisionVerificationFailed => "Vision verification failed",
            ErrorCode::DispenseFailed => "Dispense failed",
            ErrorCode::DeviceUnavailable => "Dispense device unavailable",

            ErrorCode::TemperatureBreach => "Temperature out of range",
            ErrorCode::AlarmNotFound => "Alarm not found",
            ErrorCode::InvalidAlarmTransition => "Alarm status transition not allowed",

            ErrorCode::InternalError => "Internal error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::ConfigError => "Configuration error",
            ErrorCode::SystemBusy => "System busy, please retry later",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid error code: {0}")]
pub struct InvalidErrorCode(pub u16);

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::AlreadyExists),
            5 => Ok(ErrorCode::InvalidRequest),

            4001 => Ok(ErrorCode::OrderNotFound),
            4002 => Ok(ErrorCode::InvalidOrderState),
            4003 => Ok(ErrorCode::OrderCancelled),

            6001 => Ok(ErrorCode::InvalidVaccine),
            6002 => Ok(ErrorCode::InsufficientStock),
            6003 => Ok(ErrorCode::ChannelUnavailable),
            6004 => Ok(ErrorCode::ChannelCapacityExceeded),
            6005 => Ok(ErrorCode::ChannelBoundToOtherVaccine),
            6006 => Ok(ErrorCode::StockExpired),
            6007 => Ok(ErrorCode::ConcurrentModificationConflict),
            6008 => Ok(ErrorCode::VaccineInUse),
            6009 => Ok(ErrorCode::InventoryNotInStock),

            7001 => Ok(ErrorCode::LockAcquisitionTimeout),
            7002 => Ok(ErrorCode::LockLost),
            7003 => Ok(ErrorCode::HardwareTimeout),
            7004 => Ok(ErrorCode::VisionVerificationFailed),
            7005 => Ok(ErrorCode::DispenseFailed),
            7006 => Ok(ErrorCode::DeviceUnavailable),

            8001 => Ok(ErrorCode::TemperatureBreach),
            8002 => Ok(ErrorCode::AlarmNotFound),
            8003 => Ok(ErrorCode::InvalidAlarmTransition),

            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9003 => Ok(ErrorCode::ConfigError),
            9004 => Ok(ErrorCode::SystemBusy),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::InvalidOrderState.code(), 4002);
        assert_eq!(ErrorCode::InsufficientStock.code(), 6002);
        assert_eq!(ErrorCode::HardwareTimeout.code(), 7003);
        assert_eq!(ErrorCode::TemperatureBreach.code(), 8001);
        assert_eq!(ErrorCode::SystemBusy.code(), 9004);
    }

    #[test]
    fn test_try_from_invalid() {
        assert_eq!(ErrorCode::try_from(4999), Err(InvalidErrorCode(4999)));
        assert_eq!(
            InvalidErrorCode(4999).to_string(),
            "invalid error code: 4999"
        );
    }

    #[test]
    fn test_serialize_as_number() {
        let json = serde_json::to_string(&ErrorCode::VisionVerificationFailed).unwrap();
        assert_eq!(json, "7004");
        let code: ErrorCode = serde_json::from_str("6003").unwrap();
        assert_eq!(code, ErrorCode::ChannelUnavailable);
        assert!(serde_json::from_str::<ErrorCode>("6999").is_err());
    }

    #[test]
    fn test_every_code_roundtrips_through_u16() {
        let all = [
            ErrorCode::Unknown,
            ErrorCode::OrderCancelled,
            ErrorCode::ConcurrentModificationConflict,
            ErrorCode::InventoryNotInStock,
            ErrorCode::LockLost,
            ErrorCode::DeviceUnavailable,
            ErrorCode::InvalidAlarmTransition,
            ErrorCode::ConfigError,
        ];
        for code in all {
            assert_eq!(ErrorCode::try_from(code.code()), Ok(code));
        }
    }
}
