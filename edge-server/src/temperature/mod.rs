//! Cold-chain temperature monitoring
//!
//! - [`LiveReadings`]: latest reading per sensor, row averages
//! - [`TemperatureMonitor`]: classification + debounced breach alarms
//! - [`simulate_sensors`]: synthetic feed when no sensor bus is attached

mod monitor;
mod readings;

pub use monitor::{MonitorSettings, TemperatureMonitor, simulate_sensors};
pub use readings::{LiveReadings, classify, intersect_ranges};
