//! Data models
//!
//! Shared between the engine and its collaborators (HIS bridge, rack
//! controller, monitoring UI). All IDs are `u64`, timestamps are Unix millis.

pub mod alarm;
pub mod channel;
pub mod dispense;
pub mod inventory;
pub mod order;
pub mod temperature;
pub mod trace;
pub mod vaccine;

// Re-exports
pub use alarm::*;
pub use channel::*;
pub use dispense::*;
pub use inventory::*;
pub use order::*;
pub use temperature::*;
pub use trace::*;
pub use vaccine::*;
