//! Unified error codes shared by the engine and its collaborators
//!
//! - [`ErrorCode`]: stable numeric codes for every failure kind
//! - [`ErrorCategory`]: classification by code range
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 4xxx: Order errors
//! - 6xxx: Inventory errors
//! - 7xxx: Hardware errors
//! - 8xxx: Monitoring errors
//! - 9xxx: System errors

mod category;
mod codes;

pub use category::ErrorCategory;
pub use codes::{ErrorCode, InvalidErrorCode};
