//! Append-only stock movement ledger

mod recorder;

pub use recorder::{TraceEntry, TraceRecorder};
