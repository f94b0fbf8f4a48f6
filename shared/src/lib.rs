//! Shared types for the vaccine dispensing engine
//!
//! Models, error codes and bus message types used by the engine and by the
//! processes talking to it (HIS bridge, rack controller, monitoring UI).

pub mod error;
pub mod message;
pub mod models;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use error::{ErrorCategory, ErrorCode};
pub use message::{BusMessage, EngineEvent, EventType};
