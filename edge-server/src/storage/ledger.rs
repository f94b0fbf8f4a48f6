//! Orders, order items, trace records and alarms

use redb::{ReadableTable, WriteTransaction};
use shared::models::{Alarm, Order, OrderItem, TraceRecord};

use super::{
    ALARMS_TABLE, HIS_ORDERS_TABLE, ORDER_ITEMS_TABLE, ORDERS_TABLE, RackStorage, StorageError,
    StorageResult, TRACE_KEYS_TABLE, TRACES_TABLE, counters, encode, get_by_id, get_by_key,
    scan_ids,
};

impl RackStorage {
    // ========== Orders ==========

    /// Insert a new order; a HIS source id may only map to one order
    pub fn insert_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        if let Some(source_id) = order.source_order_id.as_deref() {
            let mut his = txn.open_table(HIS_ORDERS_TABLE)?;
            if his.get(source_id)?.is_some() {
                return Err(StorageError::Duplicate {
                    index: "source_order_id",
                    key: source_id.to_string(),
                });
            }
            his.insert(source_id, order.order_no.as_str())?;
        }
        let mut table = txn.open_table(ORDERS_TABLE)?;
        table.insert(order.order_no.as_str(), encode(order)?.as_slice())?;
        Ok(())
    }

    pub fn put_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        table.insert(order.order_no.as_str(), encode(order)?.as_slice())?;
        Ok(())
    }

    pub fn order_txn(&self, txn: &WriteTransaction, order_no: &str) -> StorageResult<Option<Order>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        get_by_key(&table, order_no)
    }

    pub fn order(&self, order_no: &str) -> StorageResult<Option<Order>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        get_by_key(&table, order_no)
    }

    /// Order previously created for a HIS source id
    pub fn order_no_for_source(&self, source_order_id: &str) -> StorageResult<Option<String>> {
        let read_txn = self.begin_read()?;
        let his = read_txn.open_table(HIS_ORDERS_TABLE)?;
        Ok(his.get(source_order_id)?.map(|g| g.value().to_string()))
    }

    pub fn list_orders(&self) -> StorageResult<Vec<Order>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        let mut rows = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            rows.push(serde_json::from_slice::<Order>(value.value())?);
        }
        Ok(rows)
    }

    // ========== Order items ==========

    pub fn put_order_item(&self, txn: &WriteTransaction, item: &OrderItem) -> StorageResult<()> {
        let mut table = txn.open_table(ORDER_ITEMS_TABLE)?;
        table.insert((item.order_no.as_str(), item.seq), encode(item)?.as_slice())?;
        Ok(())
    }

    pub fn order_item_txn(
        &self,
        txn: &WriteTransaction,
        order_no: &str,
        seq: u32,
    ) -> StorageResult<Option<OrderItem>> {
        let table = txn.open_table(ORDER_ITEMS_TABLE)?;
        match table.get((order_no, seq))? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Items of one order, ordered by seq
    pub fn order_items(&self, order_no: &str) -> StorageResult<Vec<OrderItem>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ORDER_ITEMS_TABLE)?;
        let mut items = Vec::new();
        for entry in table.range((order_no, 0u32)..=(order_no, u32::MAX))? {
            let (_, value) = entry?;
            items.push(serde_json::from_slice(value.value())?);
        }
        Ok(items)
    }

    // ========== Trace ledger ==========

    /// Append a trace record, stamping the next global sequence
    ///
    /// With an idempotency key, a repeated append returns the stored record
    /// and `false`.
    pub fn append_trace(
        &self,
        txn: &WriteTransaction,
        mut record: TraceRecord,
        idempotency_key: Option<&str>,
    ) -> StorageResult<(TraceRecord, bool)> {
        if let Some(key) = idempotency_key {
            let keys = txn.open_table(TRACE_KEYS_TABLE)?;
            let existing = keys.get(key)?.map(|g| g.value());
            drop(keys);
            if let Some(sequence) = existing {
                let table = txn.open_table(TRACES_TABLE)?;
                if let Some(stored) = get_by_id::<TraceRecord>(&table, sequence)? {
                    return Ok((stored, false));
                }
            }
        }

        record.sequence = self.next_counter(txn, counters::TRACE_SEQUENCE)?;
        {
            let mut table = txn.open_table(TRACES_TABLE)?;
            table.insert(record.sequence, encode(&record)?.as_slice())?;
        }
        if let Some(key) = idempotency_key {
            let mut keys = txn.open_table(TRACE_KEYS_TABLE)?;
            keys.insert(key, record.sequence)?;
        }
        Ok((record, true))
    }

    /// Full ledger in sequence order
    pub fn list_traces(&self) -> StorageResult<Vec<TraceRecord>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TRACES_TABLE)?;
        scan_ids(&table)
    }

    // ========== Alarms ==========

    pub fn put_alarm(&self, txn: &WriteTransaction, alarm: &Alarm) -> StorageResult<()> {
        let mut table = txn.open_table(ALARMS_TABLE)?;
        table.insert(alarm.id, encode(alarm)?.as_slice())?;
        Ok(())
    }

    pub fn alarm_txn(&self, txn: &WriteTransaction, id: u64) -> StorageResult<Option<Alarm>> {
        let table = txn.open_table(ALARMS_TABLE)?;
        get_by_id(&table, id)
    }

    pub fn alarm(&self, id: u64) -> StorageResult<Option<Alarm>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ALARMS_TABLE)?;
        get_by_id(&table, id)
    }

    pub fn list_alarms(&self) -> StorageResult<Vec<Alarm>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ALARMS_TABLE)?;
        scan_ids(&table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{
        OrderItemStatus, OrderPriority, OrderSource, OrderStatus, TraceOperation,
    };

    fn order(no: &str, source_id: Option<&str>) -> Order {
        Order {
            order_no: no.into(),
            source: OrderSource::His,
            source_order_id: source_id.map(Into::into),
            patient_ref: None,
            vaccine_id: 1,
            quantity: 1,
            dose_number: 1,
            priority: OrderPriority::Normal,
            status: OrderStatus::Pending,
            error_message: None,
            receive_time: 0,
            start_time: None,
            complete_time: None,
            operator_id: None,
            deleted_at: None,
        }
    }

    fn item(no: &str, seq: u32) -> OrderItem {
        OrderItem {
            order_no: no.into(),
            seq,
            inventory_id: 1,
            channel_id: 1,
            trace_code: format!("T{}", seq),
            batch_no: "B".into(),
            status: OrderItemStatus::Pending,
            failure: None,
            outbound_temperature: None,
            vision_verified: false,
            vision_image_ref: None,
            outbound_time: None,
            created_at: 0,
        }
    }

    fn record(code: &str) -> TraceRecord {
        TraceRecord {
            sequence: 0,
            trace_code: code.into(),
            inventory_id: 1,
            batch_no: "B".into(),
            operation: TraceOperation::Outbound,
            from_location: Some("A1".into()),
            to_location: None,
            temperature: None,
            operator_id: None,
            remark: None,
            operated_at: 0,
        }
    }

    #[test]
    fn his_source_id_maps_to_single_order() {
        let storage = RackStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.insert_order(&txn, &order("VO1", Some("HIS-9"))).unwrap();
        assert!(storage.insert_order(&txn, &order("VO2", Some("HIS-9"))).is_err());
        txn.commit().unwrap();
        assert_eq!(storage.order_no_for_source("HIS-9").unwrap().as_deref(), Some("VO1"));
    }

    #[test]
    fn order_items_are_scoped_and_ordered() {
        let storage = RackStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.put_order_item(&txn, &item("VO2", 2)).unwrap();
        storage.put_order_item(&txn, &item("VO2", 1)).unwrap();
        storage.put_order_item(&txn, &item("VO1", 1)).unwrap();
        storage.put_order_item(&txn, &item("VO20", 1)).unwrap();
        txn.commit().unwrap();

        let items = storage.order_items("VO2").unwrap();
        assert_eq!(items.iter().map(|i| i.seq).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn trace_append_is_idempotent_per_key() {
        let storage = RackStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        let (first, appended) = storage.append_trace(&txn, record("T1"), Some("VO1:1")).unwrap();
        assert!(appended);
        let (again, appended) = storage.append_trace(&txn, record("T1"), Some("VO1:1")).unwrap();
        assert!(!appended);
        assert_eq!(again.sequence, first.sequence);
        let (other, _) = storage.append_trace(&txn, record("T2"), None).unwrap();
        assert!(other.sequence > first.sequence);
        txn.commit().unwrap();

        assert_eq!(storage.list_traces().unwrap().len(), 2);
    }
}
