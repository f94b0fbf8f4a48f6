//! Catalogue, channel and inventory rows

use redb::{ReadableTable, WriteTransaction};
use shared::models::{Channel, InventoryUnit, Vaccine};

use super::{
    CHANNEL_POSITIONS_TABLE, CHANNELS_TABLE, INVENTORY_TABLE, RackStorage, StorageError,
    StorageResult, TRACE_CODES_TABLE, VACCINE_CODES_TABLE, VACCINES_TABLE, encode, get_by_id,
    scan_ids,
};

impl RackStorage {
    // ========== Vaccines ==========

    /// Insert a new vaccine, enforcing code uniqueness
    pub fn insert_vaccine(&self, txn: &WriteTransaction, vaccine: &Vaccine) -> StorageResult<()> {
        let mut codes = txn.open_table(VACCINE_CODES_TABLE)?;
        if codes.get(vaccine.code.as_str())?.is_some() {
            return Err(StorageError::Duplicate {
                index: "vaccine_code",
                key: vaccine.code.clone(),
            });
        }
        codes.insert(vaccine.code.as_str(), vaccine.id)?;
        let mut table = txn.open_table(VACCINES_TABLE)?;
        table.insert(vaccine.id, encode(vaccine)?.as_slice())?;
        Ok(())
    }

    /// Overwrite an existing vaccine row (code is immutable)
    pub fn put_vaccine(&self, txn: &WriteTransaction, vaccine: &Vaccine) -> StorageResult<()> {
        let mut table = txn.open_table(VACCINES_TABLE)?;
        table.insert(vaccine.id, encode(vaccine)?.as_slice())?;
        Ok(())
    }

    pub fn vaccine_txn(&self, txn: &WriteTransaction, id: u64) -> StorageResult<Option<Vaccine>> {
        let table = txn.open_table(VACCINES_TABLE)?;
        get_by_id(&table, id)
    }

    pub fn vaccine(&self, id: u64) -> StorageResult<Option<Vaccine>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(VACCINES_TABLE)?;
        get_by_id(&table, id)
    }

    /// Lookup by business code (tombstoned rows included)
    pub fn vaccine_by_code(&self, code: &str) -> StorageResult<Option<Vaccine>> {
        let read_txn = self.begin_read()?;
        let codes = read_txn.open_table(VACCINE_CODES_TABLE)?;
        let Some(id) = codes.get(code)?.map(|g| g.value()) else {
            return Ok(None);
        };
        let table = read_txn.open_table(VACCINES_TABLE)?;
        get_by_id(&table, id)
    }

    /// All live vaccines, ordered by id
    pub fn list_vaccines(&self) -> StorageResult<Vec<Vaccine>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(VACCINES_TABLE)?;
        let rows: Vec<Vaccine> = scan_ids(&table)?;
        Ok(rows.into_iter().filter(|v| !v.is_deleted()).collect())
    }

    // ========== Channels ==========

    /// Insert a new channel, enforcing position uniqueness
    pub fn insert_channel(&self, txn: &WriteTransaction, channel: &Channel) -> StorageResult<()> {
        let mut positions = txn.open_table(CHANNEL_POSITIONS_TABLE)?;
        if positions.get(channel.position.as_str())?.is_some() {
            return Err(StorageError::Duplicate {
                index: "channel_position",
                key: channel.position.clone(),
            });
        }
        positions.insert(channel.position.as_str(), channel.id)?;
        let mut table = txn.open_table(CHANNELS_TABLE)?;
        table.insert(channel.id, encode(channel)?.as_slice())?;
        Ok(())
    }

    pub fn put_channel(&self, txn: &WriteTransaction, channel: &Channel) -> StorageResult<()> {
        let mut table = txn.open_table(CHANNELS_TABLE)?;
        table.insert(channel.id, encode(channel)?.as_slice())?;
        Ok(())
    }

    pub fn channel_txn(&self, txn: &WriteTransaction, id: u64) -> StorageResult<Option<Channel>> {
        let table = txn.open_table(CHANNELS_TABLE)?;
        get_by_id(&table, id)
    }

    pub fn channel(&self, id: u64) -> StorageResult<Option<Channel>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CHANNELS_TABLE)?;
        get_by_id(&table, id)
    }

    pub fn list_channels(&self) -> StorageResult<Vec<Channel>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CHANNELS_TABLE)?;
        scan_ids(&table)
    }

    // ========== Inventory ==========

    /// Insert a new inventory unit, enforcing trace-code uniqueness
    pub fn insert_inventory(
        &self,
        txn: &WriteTransaction,
        unit: &InventoryUnit,
    ) -> StorageResult<()> {
        let mut codes = txn.open_table(TRACE_CODES_TABLE)?;
        if codes.get(unit.trace_code.as_str())?.is_some() {
            return Err(StorageError::Duplicate {
                index: "trace_code",
                key: unit.trace_code.clone(),
            });
        }
        codes.insert(unit.trace_code.as_str(), unit.id)?;
        let mut table = txn.open_table(INVENTORY_TABLE)?;
        table.insert(unit.id, encode(unit)?.as_slice())?;
        Ok(())
    }

    pub fn put_inventory(&self, txn: &WriteTransaction, unit: &InventoryUnit) -> StorageResult<()> {
        let mut table = txn.open_table(INVENTORY_TABLE)?;
        table.insert(unit.id, encode(unit)?.as_slice())?;
        Ok(())
    }

    pub fn inventory_txn(
        &self,
        txn: &WriteTransaction,
        id: u64,
    ) -> StorageResult<Option<InventoryUnit>> {
        let table = txn.open_table(INVENTORY_TABLE)?;
        get_by_id(&table, id)
    }

    pub fn inventory(&self, id: u64) -> StorageResult<Option<InventoryUnit>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(INVENTORY_TABLE)?;
        get_by_id(&table, id)
    }

    pub fn inventory_by_trace_code(&self, trace_code: &str) -> StorageResult<Option<InventoryUnit>> {
        let read_txn = self.begin_read()?;
        let codes = read_txn.open_table(TRACE_CODES_TABLE)?;
        let Some(id) = codes.get(trace_code)?.map(|g| g.value()) else {
            return Ok(None);
        };
        let table = read_txn.open_table(INVENTORY_TABLE)?;
        get_by_id(&table, id)
    }

    /// Every inventory row, including scrapped and dispensed
    pub fn list_inventory(&self) -> StorageResult<Vec<InventoryUnit>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(INVENTORY_TABLE)?;
        scan_ids(&table)
    }

    /// In-stock rows of one vaccine (planner input snapshot)
    pub fn in_stock_for_vaccine(&self, vaccine_id: u64) -> StorageResult<Vec<InventoryUnit>> {
        Ok(self
            .list_inventory()?
            .into_iter()
            .filter(|u| u.vaccine_id == vaccine_id && u.is_in_stock())
            .collect())
    }

    /// In-stock rows of one vaccine plus every channel, from one read snapshot
    pub fn planning_snapshot(
        &self,
        vaccine_id: u64,
    ) -> StorageResult<(Vec<InventoryUnit>, Vec<Channel>)> {
        let read_txn = self.begin_read()?;
        let inventory = read_txn.open_table(INVENTORY_TABLE)?;
        let units: Vec<InventoryUnit> = scan_ids(&inventory)?;
        let channels = read_txn.open_table(CHANNELS_TABLE)?;
        let channels: Vec<Channel> = scan_ids(&channels)?;
        Ok((
            units
                .into_iter()
                .filter(|u| u.vaccine_id == vaccine_id && u.is_in_stock())
                .collect(),
            channels,
        ))
    }

    /// In-stock rows bound to one channel, within a write transaction
    pub fn in_stock_in_channel_txn(
        &self,
        txn: &WriteTransaction,
        channel_id: u64,
    ) -> StorageResult<Vec<InventoryUnit>> {
        let table = txn.open_table(INVENTORY_TABLE)?;
        let rows: Vec<InventoryUnit> = scan_ids(&table)?;
        Ok(rows
            .into_iter()
            .filter(|u| u.channel_id == Some(channel_id) && u.is_in_stock())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use shared::models::{ChannelStatus, InventoryStatus};

    fn vaccine(id: u64, code: &str) -> Vaccine {
        Vaccine {
            id,
            code: code.into(),
            name: "HepB".into(),
            common_name: None,
            manufacturer: "Kangtai".into(),
            specification: None,
            storage_temp_min: 2.0,
            storage_temp_max: 8.0,
            dose_count: 3,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        }
    }

    fn channel(id: u64, position: &str) -> Channel {
        Channel {
            id,
            position: position.into(),
            row: 'A',
            col: 1,
            vaccine_id: None,
            capacity: 10,
            quantity: 0,
            status: ChannelStatus::Normal,
            version: 0,
            last_outbound: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn unit(id: u64, trace: &str, channel_id: u64, qty: u32) -> InventoryUnit {
        InventoryUnit {
            id,
            vaccine_id: 1,
            batch_no: "B1".into(),
            trace_code: trace.into(),
            production_date: None,
            expiry_date: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
            channel_id: Some(channel_id),
            quantity: qty,
            status: InventoryStatus::InStock,
            version: 0,
            inbound_time: 0,
            outbound_time: None,
            inbound_temp: None,
            operator_id: None,
            supplier: None,
            deleted_at: None,
        }
    }

    #[test]
    fn vaccine_code_is_unique() {
        let storage = RackStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.insert_vaccine(&txn, &vaccine(1, "HEPB-10")).unwrap();
        let err = storage.insert_vaccine(&txn, &vaccine(2, "HEPB-10")).unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { index: "vaccine_code", .. }));
        txn.commit().unwrap();

        assert_eq!(storage.vaccine_by_code("HEPB-10").unwrap().unwrap().id, 1);
        assert!(storage.vaccine_by_code("NOPE").unwrap().is_none());
    }

    #[test]
    fn tombstoned_vaccines_are_hidden_from_listing() {
        let storage = RackStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.insert_vaccine(&txn, &vaccine(1, "A")).unwrap();
        let mut deleted = vaccine(2, "B");
        deleted.deleted_at = Some(5);
        storage.insert_vaccine(&txn, &deleted).unwrap();
        txn.commit().unwrap();

        let listed = storage.list_vaccines().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].code, "A");
    }

    #[test]
    fn channel_position_is_unique() {
        let storage = RackStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.insert_channel(&txn, &channel(1, "A1")).unwrap();
        assert!(storage.insert_channel(&txn, &channel(2, "A1")).is_err());
    }

    #[test]
    fn in_stock_queries_skip_empty_and_other_channels() {
        let storage = RackStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.insert_inventory(&txn, &unit(1, "T1", 1, 2)).unwrap();
        storage.insert_inventory(&txn, &unit(2, "T2", 1, 0)).unwrap();
        storage.insert_inventory(&txn, &unit(3, "T3", 2, 1)).unwrap();
        let in_c1 = storage.in_stock_in_channel_txn(&txn, 1).unwrap();
        assert_eq!(in_c1.len(), 1);
        assert_eq!(in_c1[0].id, 1);
        txn.commit().unwrap();

        assert_eq!(storage.in_stock_for_vaccine(1).unwrap().len(), 2);
        assert_eq!(storage.inventory_by_trace_code("T3").unwrap().unwrap().id, 3);
    }
}
