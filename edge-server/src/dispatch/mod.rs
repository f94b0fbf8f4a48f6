//! Dispatch: lock → re-validate → dispense → verify → commit, one unit at a time

mod coordinator;
mod device;
mod worker;

pub use coordinator::{DispatchCoordinator, DispatchOutcome, DispatchSettings};
pub use device::{DeviceError, DispenseDevice, SimOutcome, SimulatedRack, TcpRackDevice};
pub use worker::{DispatchQueue, run_dispatch_worker};

use dashmap::DashSet;
use std::sync::Arc;

/// Cancel requests for orders already inside the dispatch loop
///
/// Checked between items only; an item whose command was issued always runs
/// to completion or timeout.
#[derive(Debug, Clone, Default)]
pub struct CancelRequests {
    orders: Arc<DashSet<String>>,
}

impl CancelRequests {
    pub fn request(&self, order_no: &str) {
        self.orders.insert(order_no.to_string());
    }

    pub fn is_requested(&self, order_no: &str) -> bool {
        self.orders.contains(order_no)
    }

    /// Consume a pending request
    pub fn take(&self, order_no: &str) -> bool {
        self.orders.remove(order_no).is_some()
    }
}
