//! Order lifecycle

mod service;
mod state_machine;

pub use service::{CancelOutcome, OrderService};
pub use state_machine::OrderStateMachine;
