//! Alarm ledger and sink

mod service;

pub use service::{AlarmService, AlarmSink};
