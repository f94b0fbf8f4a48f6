//! redb-based storage layer for the dispensing rack
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `vaccines` | `id` | `Vaccine` | Catalogue |
//! | `vaccine_codes` | `code` | `id` | Unique code index |
//! | `channels` | `id` | `Channel` | Rack slots |
//! | `channel_positions` | `position` | `id` | Unique position index |
//! | `inventory` | `id` | `InventoryUnit` | Stock rows |
//! | `trace_codes` | `trace_code` | `id` | Unique trace-code index |
//! | `orders` | `order_no` | `Order` | Orders |
//! | `his_orders` | `source_order_id` | `order_no` | HIS idempotency |
//! | `order_items` | `(order_no, seq)` | `OrderItem` | Dispensed/attempted units |
//! | `traces` | `sequence` | `TraceRecord` | Append-only movement ledger |
//! | `trace_keys` | `idempotency key` | `sequence` | Exactly-once trace append |
//! | `alarms` | `id` | `Alarm` | Alarm ledger |
//! | `channel_locks` | `lock key` | `LockEntry` | Persistent lock backend |
//! | `counters` | `name` | `u64` | ID and business-number counters |
//!
//! # Durability
//!
//! redb commits with `Durability::Immediate`; a stock change, its trace record
//! and the order item status land in one write transaction.

mod ledger;
mod rack;

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub(crate) const VACCINES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("vaccines");
pub(crate) const VACCINE_CODES_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("vaccine_codes");
pub(crate) const CHANNELS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("channels");
pub(crate) const CHANNEL_POSITIONS_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("channel_positions");
pub(crate) const INVENTORY_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("inventory");
pub(crate) const TRACE_CODES_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("trace_codes");
pub(crate) const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");
pub(crate) const HIS_ORDERS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("his_orders");
pub(crate) const ORDER_ITEMS_TABLE: TableDefinition<(&str, u32), &[u8]> =
    TableDefinition::new("order_items");
pub(crate) const TRACES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("traces");
pub(crate) const TRACE_KEYS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("trace_keys");
pub(crate) const ALARMS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("alarms");
pub(crate) const LOCKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("channel_locks");
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Counter names
pub mod counters {
    pub const VACCINE_ID: &str = "vaccine_id";
    pub const CHANNEL_ID: &str = "channel_id";
    pub const INVENTORY_ID: &str = "inventory_id";
    pub const ALARM_ID: &str = "alarm_id";
    pub const TRACE_SEQUENCE: &str = "trace_sequence";
    pub const LOCK_FENCE: &str = "lock_fence";

    /// Per-day counters (`order_no:20260101`)
    pub fn daily(prefix: &str, date: &str) -> String {
        format!("{}:{}", prefix, date)
    }
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unique index violated: {index}={key}")]
    Duplicate { index: &'static str, key: String },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Rack storage backed by redb
#[derive(Clone)]
pub struct RackStorage {
    db: Arc<Database>,
}

impl std::fmt::Debug for RackStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RackStorage").finish_non_exhaustive()
    }
}

impl RackStorage {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (tests and simulation runs)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(VACCINES_TABLE)?;
            let _ = write_txn.open_table(VACCINE_CODES_TABLE)?;
            let _ = write_txn.open_table(CHANNELS_TABLE)?;
            let _ = write_txn.open_table(CHANNEL_POSITIONS_TABLE)?;
            let _ = write_txn.open_table(INVENTORY_TABLE)?;
            let _ = write_txn.open_table(TRACE_CODES_TABLE)?;
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(HIS_ORDERS_TABLE)?;
            let _ = write_txn.open_table(ORDER_ITEMS_TABLE)?;
            let _ = write_txn.open_table(TRACES_TABLE)?;
            let _ = write_txn.open_table(TRACE_KEYS_TABLE)?;
            let _ = write_txn.open_table(ALARMS_TABLE)?;
            let _ = write_txn.open_table(LOCKS_TABLE)?;
            let _ = write_txn.open_table(COUNTERS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a write transaction (redb serializes writers)
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    pub fn begin_read(&self) -> StorageResult<ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    // ========== Counters ==========

    /// Increment and return a named counter (first value is 1)
    pub fn next_counter(&self, txn: &WriteTransaction, name: &str) -> StorageResult<u64> {
        let mut table = txn.open_table(COUNTERS_TABLE)?;
        let next = table.get(name)?.map(|g| g.value()).unwrap_or(0) + 1;
        table.insert(name, next)?;
        Ok(next)
    }

    /// Current counter value (read-only)
    pub fn counter(&self, name: &str) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COUNTERS_TABLE)?;
        Ok(table.get(name)?.map(|g| g.value()).unwrap_or(0))
    }
}

// ========== JSON row helpers ==========

pub(crate) fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn get_by_id<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    id: u64,
) -> StorageResult<Option<T>> {
    match table.get(id)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn get_by_key<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StorageResult<Option<T>> {
    match table.get(key)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn scan_ids<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
) -> StorageResult<Vec<T>> {
    let mut rows = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        rows.push(serde_json::from_slice(value.value())?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_one_and_increment() {
        let storage = RackStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        assert_eq!(storage.next_counter(&txn, counters::VACCINE_ID).unwrap(), 1);
        assert_eq!(storage.next_counter(&txn, counters::VACCINE_ID).unwrap(), 2);
        assert_eq!(storage.next_counter(&txn, counters::CHANNEL_ID).unwrap(), 1);
        txn.commit().unwrap();
        assert_eq!(storage.counter(counters::VACCINE_ID).unwrap(), 2);
    }

    #[test]
    fn aborted_transaction_does_not_advance_counter() {
        let storage = RackStorage::open_in_memory().unwrap();
        {
            let txn = storage.begin_write().unwrap();
            storage.next_counter(&txn, counters::ALARM_ID).unwrap();
            txn.abort().unwrap();
        }
        assert_eq!(storage.counter(counters::ALARM_ID).unwrap(), 0);
    }

    #[test]
    fn file_database_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rack.redb");
        {
            let storage = RackStorage::open(&path).unwrap();
            let txn = storage.begin_write().unwrap();
            storage.next_counter(&txn, "x").unwrap();
            txn.commit().unwrap();
        }
        let storage = RackStorage::open(&path).unwrap();
        assert_eq!(storage.counter("x").unwrap(), 1);
    }
}
