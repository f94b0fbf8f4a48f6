//! Stock: FEFO planning, rack administration, expiry scanning

mod expiry;
mod planner;
mod service;

pub use expiry::ExpiryScanner;
pub use planner::{AllocationPlan, AllocationPlanner, PlanEntry, Reservations, is_eligible, select_fefo};
pub use service::{InventoryService, SCRAP_LOCATION, SUPPLIER_LOCATION};
