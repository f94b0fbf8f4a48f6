use redb::WriteTransaction;
use shared::models::{TraceOperation, TraceRecord};
use shared::util::{date_stamp, now_millis};

use crate::common::EngineResult;
use crate::storage::{RackStorage, counters};

/// What to record for one stock operation
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub operation: TraceOperation,
    pub inventory_id: u64,
    pub trace_code: String,
    pub batch_no: String,
    pub from_location: Option<String>,
    pub to_location: Option<String>,
    pub temperature: Option<f64>,
    pub operator_id: Option<String>,
    pub remark: Option<String>,
}

/// Trace recorder
///
/// There is no update or delete path; a correction is a new compensating
/// record.
#[derive(Clone)]
pub struct TraceRecorder {
    storage: RackStorage,
}

impl TraceRecorder {
    pub fn new(storage: RackStorage) -> Self {
        Self { storage }
    }

    /// Allocate a fresh trace code `VT{yyyymmdd}{seq:06}`
    ///
    /// Codes come from a persisted per-day counter and are never reused.
    pub fn next_trace_code(&self, txn: &WriteTransaction) -> EngineResult<String> {
        let date = date_stamp();
        let seq = self
            .storage
            .next_counter(txn, &counters::daily("trace_code", &date))?;
        Ok(format!("VT{}{:06}", date, seq))
    }

    /// Append within the caller's transaction
    ///
    /// `idempotency_key` makes a replayed append return the stored record
    /// instead of writing a duplicate row.
    pub fn record_in(
        &self,
        txn: &WriteTransaction,
        entry: TraceEntry,
        idempotency_key: Option<&str>,
    ) -> EngineResult<TraceRecord> {
        let record = TraceRecord {
            sequence: 0,
            trace_code: entry.trace_code,
            inventory_id: entry.inventory_id,
            batch_no: entry.batch_no,
            operation: entry.operation,
            from_location: entry.from_location,
            to_location: entry.to_location,
            temperature: entry.temperature,
            operator_id: entry.operator_id,
            remark: entry.remark,
            operated_at: now_millis(),
        };
        let (stored, appended) = self.storage.append_trace(txn, record, idempotency_key)?;
        if appended {
            tracing::info!(
                target: "audit",
                sequence = stored.sequence,
                operation = %stored.operation,
                trace_code = %stored.trace_code,
                inventory_id = stored.inventory_id,
                from = ?stored.from_location,
                to = ?stored.to_location,
                "Trace recorded"
            );
        } else {
            tracing::debug!(sequence = stored.sequence, key = ?idempotency_key, "Trace replay ignored");
        }
        Ok(stored)
    }

    /// Append in its own transaction, returning the unit's trace code
    pub fn record(&self, entry: TraceEntry) -> EngineResult<String> {
        let txn = self.storage.begin_write()?;
        let stored = self.record_in(&txn, entry, None)?;
        txn.commit().map_err(crate::storage::StorageError::from)?;
        Ok(stored.trace_code)
    }

    /// Full movement history of one unit, oldest first
    pub fn traces_for_code(&self, trace_code: &str) -> EngineResult<Vec<TraceRecord>> {
        Ok(self
            .storage
            .list_traces()?
            .into_iter()
            .filter(|t| t.trace_code == trace_code)
            .collect())
    }

    pub fn traces_for_batch(&self, batch_no: &str) -> EngineResult<Vec<TraceRecord>> {
        Ok(self
            .storage
            .list_traces()?
            .into_iter()
            .filter(|t| t.batch_no == batch_no)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(code: &str, batch: &str, op: TraceOperation) -> TraceEntry {
        TraceEntry {
            operation: op,
            inventory_id: 1,
            trace_code: code.into(),
            batch_no: batch.into(),
            from_location: Some("SUPPLIER".into()),
            to_location: Some("A1".into()),
            temperature: Some(4.5),
            operator_id: Some("op".into()),
            remark: None,
        }
    }

    #[test]
    fn trace_codes_are_unique_and_increasing() {
        let storage = RackStorage::open_in_memory().unwrap();
        let recorder = TraceRecorder::new(storage.clone());
        let txn = storage.begin_write().unwrap();
        let a = recorder.next_trace_code(&txn).unwrap();
        let b = recorder.next_trace_code(&txn).unwrap();
        txn.commit().unwrap();
        assert!(a.starts_with("VT"));
        assert_eq!(a.len(), 2 + 8 + 6);
        assert!(b > a);
    }

    #[test]
    fn history_is_filtered_by_code_and_batch() {
        let storage = RackStorage::open_in_memory().unwrap();
        let recorder = TraceRecorder::new(storage);
        recorder.record(entry("T1", "B1", TraceOperation::Inbound)).unwrap();
        recorder.record(entry("T2", "B1", TraceOperation::Inbound)).unwrap();
        recorder.record(entry("T1", "B1", TraceOperation::Outbound)).unwrap();

        let t1 = recorder.traces_for_code("T1").unwrap();
        assert_eq!(t1.len(), 2);
        assert_eq!(t1[0].operation, TraceOperation::Inbound);
        assert_eq!(t1[1].operation, TraceOperation::Outbound);
        assert!(t1[0].sequence < t1[1].sequence);
        assert_eq!(recorder.traces_for_batch("B1").unwrap().len(), 3);
        assert!(recorder.traces_for_batch("B9").unwrap().is_empty());
    }

    #[test]
    fn replayed_outcome_writes_one_row() {
        let storage = RackStorage::open_in_memory().unwrap();
        let recorder = TraceRecorder::new(storage.clone());
        for _ in 0..3 {
            let txn = storage.begin_write().unwrap();
            recorder
                .record_in(&txn, entry("T1", "B1", TraceOperation::Outbound), Some("VO1:1"))
                .unwrap();
            txn.commit().unwrap();
        }
        assert_eq!(recorder.traces_for_code("T1").unwrap().len(), 1);
    }
}
