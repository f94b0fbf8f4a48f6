//! Catalogue, rack layout and stock movements
//!
//! Every change to a channel's quantity or status, or to a unit's status,
//! runs under the machine lease and commits together with its trace record.

use chrono::NaiveDate;
use redb::WriteTransaction;
use shared::models::{
    Channel, ChannelStatus, InboundRequest, InventoryStatus, InventorySummary, InventoryUnit,
    OrderPriority, TraceOperation, Vaccine, VaccineInput,
};
use shared::util::now_millis;
use std::collections::{BTreeMap, HashMap};

use crate::common::{EngineError, EngineResult};
use crate::lock::ChannelLockManager;
use crate::storage::{RackStorage, StorageError, counters};
use crate::temperature::LiveReadings;
use crate::trace::{TraceEntry, TraceRecorder};

/// Inbound origin recorded on `INBOUND` traces
pub const SUPPLIER_LOCATION: &str = "SUPPLIER";
/// Destination recorded on `SCRAP` traces
pub const SCRAP_LOCATION: &str = "SCRAP";

fn already_exists(e: StorageError) -> EngineError {
    match e {
        StorageError::Duplicate { index, key } => {
            EngineError::AlreadyExists(format!("{} {}", index, key))
        }
        other => other.into(),
    }
}

/// Inventory service
#[derive(Clone)]
pub struct InventoryService {
    storage: RackStorage,
    recorder: TraceRecorder,
    locks: ChannelLockManager,
    readings: LiveReadings,
    owner: String,
    expiry_warn_days: i64,
}

impl InventoryService {
    pub fn new(
        storage: RackStorage,
        recorder: TraceRecorder,
        locks: ChannelLockManager,
        readings: LiveReadings,
        machine_id: &str,
        expiry_warn_days: i64,
    ) -> Self {
        Self {
            storage,
            recorder,
            locks,
            readings,
            owner: format!("{}:inventory", machine_id),
            expiry_warn_days,
        }
    }

    /// Run one write transaction while holding the machine lease
    async fn locked_write<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let lease = self.locks.acquire(OrderPriority::Normal, &self.owner).await?;
        let result = (|| -> EngineResult<T> {
            let txn = self.storage.begin_write()?;
            let value = f(&txn)?;
            txn.commit().map_err(StorageError::from)?;
            Ok(value)
        })();
        if let Err(e) = lease.release().await {
            tracing::warn!(error = %e, "Machine lease release failed");
        }
        result
    }

    // ========== Vaccines ==========

    fn validate_vaccine(input: &VaccineInput) -> EngineResult<()> {
        if input.code.trim().is_empty() {
            return Err(EngineError::validation("vaccine code is required"));
        }
        if input.name.trim().is_empty() {
            return Err(EngineError::validation("vaccine name is required"));
        }
        let (min, max) = input.temp_range();
        if min >= max {
            return Err(EngineError::validation(format!(
                "storage range {}..{} is empty",
                min, max
            )));
        }
        if input.dose_count == Some(0) {
            return Err(EngineError::validation("dose count must be positive"));
        }
        Ok(())
    }

    pub fn register_vaccine(&self, input: VaccineInput) -> EngineResult<Vaccine> {
        Self::validate_vaccine(&input)?;
        let (min, max) = input.temp_range();
        let now = now_millis();
        let txn = self.storage.begin_write()?;
        let vaccine = Vaccine {
            id: self.storage.next_counter(&txn, counters::VACCINE_ID)?,
            code: input.code.trim().to_string(),
            name: input.name,
            common_name: input.common_name,
            manufacturer: input.manufacturer,
            specification: input.specification,
            storage_temp_min: min,
            storage_temp_max: max,
            dose_count: input.dose_count.unwrap_or(1),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.storage
            .insert_vaccine(&txn, &vaccine)
            .map_err(already_exists)?;
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(vaccine_id = vaccine.id, code = %vaccine.code, "Vaccine registered");
        Ok(vaccine)
    }

    /// Update descriptive fields; the code is immutable
    pub fn update_vaccine(&self, id: u64, input: VaccineInput) -> EngineResult<Vaccine> {
        Self::validate_vaccine(&input)?;
        let txn = self.storage.begin_write()?;
        let mut vaccine = self
            .storage
            .vaccine_txn(&txn, id)?
            .filter(|v| !v.is_deleted())
            .ok_or_else(|| EngineError::not_found(format!("vaccine {}", id)))?;
        if vaccine.code != input.code.trim() {
            return Err(EngineError::validation("vaccine code cannot change"));
        }
        let (min, max) = input.temp_range();
        vaccine.name = input.name;
        vaccine.common_name = input.common_name;
        vaccine.manufacturer = input.manufacturer;
        vaccine.specification = input.specification;
        vaccine.storage_temp_min = min;
        vaccine.storage_temp_max = max;
        vaccine.dose_count = input.dose_count.unwrap_or(vaccine.dose_count);
        vaccine.updated_at = now_millis();
        self.storage.put_vaccine(&txn, &vaccine)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(vaccine)
    }

    /// Soft delete, rejected while stock or a loaded channel references it
    pub fn delete_vaccine(&self, id: u64) -> EngineResult<()> {
        let vaccine = self.vaccine(id)?;
        let has_stock = !self.storage.in_stock_for_vaccine(id)?.is_empty()
            || self
                .storage
                .list_channels()?
                .iter()
                .any(|c| c.vaccine_id == Some(id) && c.quantity > 0);
        if has_stock {
            return Err(EngineError::VaccineInUse(vaccine.code));
        }

        let txn = self.storage.begin_write()?;
        let mut vaccine = vaccine;
        vaccine.deleted_at = Some(now_millis());
        self.storage.put_vaccine(&txn, &vaccine)?;
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(vaccine_id = id, code = %vaccine.code, "Vaccine deleted");
        Ok(())
    }

    pub fn vaccine(&self, id: u64) -> EngineResult<Vaccine> {
        self.storage
            .vaccine(id)?
            .filter(|v| !v.is_deleted())
            .ok_or_else(|| EngineError::not_found(format!("vaccine {}", id)))
    }

    pub fn list_vaccines(&self) -> EngineResult<Vec<Vaccine>> {
        Ok(self.storage.list_vaccines()?)
    }

    // ========== Channels ==========

    pub fn register_channel(&self, row: char, col: u32, capacity: u32) -> EngineResult<Channel> {
        if !row.is_ascii_uppercase() {
            return Err(EngineError::validation(format!("invalid row {:?}", row)));
        }
        if col == 0 || capacity == 0 {
            return Err(EngineError::validation("column and capacity must be positive"));
        }
        let now = now_millis();
        let txn = self.storage.begin_write()?;
        let channel = Channel {
            id: self.storage.next_counter(&txn, counters::CHANNEL_ID)?,
            position: Channel::position_of(row, col),
            row,
            col,
            vaccine_id: None,
            capacity,
            quantity: 0,
            status: ChannelStatus::Normal,
            version: 0,
            last_outbound: None,
            created_at: now,
            updated_at: now,
        };
        self.storage
            .insert_channel(&txn, &channel)
            .map_err(already_exists)?;
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(channel_id = channel.id, position = %channel.position, capacity, "Channel registered");
        Ok(channel)
    }

    pub async fn set_channel_status(
        &self,
        channel_id: u64,
        status: ChannelStatus,
        operator: &str,
    ) -> EngineResult<Channel> {
        let channel = self
            .locked_write(|txn| {
                let mut channel = self.channel_txn(txn, channel_id)?;
                channel.status = status;
                channel.version += 1;
                channel.updated_at = now_millis();
                self.storage.put_channel(txn, &channel)?;
                Ok(channel)
            })
            .await?;

        crate::audit_log!(operator, "set_channel_status", format!("channel:{}", channel.position), format!("{:?}", status));
        Ok(channel)
    }

    fn channel_txn(&self, txn: &WriteTransaction, id: u64) -> EngineResult<Channel> {
        self.storage
            .channel_txn(txn, id)?
            .ok_or_else(|| EngineError::not_found(format!("channel {}", id)))
    }

    pub fn channel(&self, id: u64) -> EngineResult<Channel> {
        self.storage
            .channel(id)?
            .ok_or_else(|| EngineError::not_found(format!("channel {}", id)))
    }

    pub fn list_channels(&self) -> EngineResult<Vec<Channel>> {
        Ok(self.storage.list_channels()?)
    }

    /// Channels grouped by row, columns ascending
    pub fn channel_matrix(&self) -> EngineResult<BTreeMap<char, Vec<Channel>>> {
        let mut matrix: BTreeMap<char, Vec<Channel>> = BTreeMap::new();
        for channel in self.storage.list_channels()? {
            matrix.entry(channel.row).or_default().push(channel);
        }
        for row in matrix.values_mut() {
            row.sort_by_key(|c| c.col);
        }
        Ok(matrix)
    }

    // ========== Stock movements ==========

    /// Load stock into a channel
    pub async fn inbound(&self, request: InboundRequest, today: NaiveDate) -> EngineResult<InventoryUnit> {
        if request.quantity == 0 {
            return Err(EngineError::validation("quantity must be positive"));
        }
        if request.batch_no.trim().is_empty() {
            return Err(EngineError::validation("batch number is required"));
        }
        if request.expiry_date <= today {
            return Err(EngineError::StockExpired(format!(
                "batch {} expired on {}",
                request.batch_no, request.expiry_date
            )));
        }
        let vaccine = self
            .storage
            .vaccine(request.vaccine_id)?
            .filter(|v| !v.is_deleted())
            .ok_or_else(|| EngineError::InvalidVaccine(request.vaccine_id.to_string()))?;
        if let Some(temp) = request.temperature
            && !vaccine.temperature_in_range(temp)
        {
            tracing::warn!(vaccine = %vaccine.code, batch_no = %request.batch_no, temperature = temp, "Inbound temperature outside storage range");
        }

        let unit = self
            .locked_write(|txn| {
                let mut channel = self.channel_txn(txn, request.channel_id)?;
                if channel.status != ChannelStatus::Normal {
                    return Err(EngineError::ChannelUnavailable(channel.position));
                }
                if !channel.can_hold(vaccine.id) {
                    return Err(EngineError::ChannelBoundToOtherVaccine(channel.position));
                }
                if channel.free_capacity() < request.quantity {
                    return Err(EngineError::ChannelCapacityExceeded {
                        position: channel.position,
                        capacity: channel.capacity,
                    });
                }

                let trace_code = match request.trace_code.as_deref().map(str::trim) {
                    Some(code) if !code.is_empty() => code.to_string(),
                    _ => self.recorder.next_trace_code(txn)?,
                };
                let now = now_millis();
                let temperature = request
                    .temperature
                    .or_else(|| self.readings.row_temperature(channel.row));
                let unit = InventoryUnit {
                    id: self.storage.next_counter(txn, counters::INVENTORY_ID)?,
                    vaccine_id: vaccine.id,
                    batch_no: request.batch_no.trim().to_string(),
                    trace_code,
                    production_date: request.production_date,
                    expiry_date: request.expiry_date,
                    channel_id: Some(channel.id),
                    quantity: request.quantity,
                    status: InventoryStatus::InStock,
                    version: 0,
                    inbound_time: now,
                    outbound_time: None,
                    inbound_temp: temperature,
                    operator_id: request.operator_id.clone(),
                    supplier: request.supplier.clone(),
                    deleted_at: None,
                };
                self.storage
                    .insert_inventory(txn, &unit)
                    .map_err(already_exists)?;

                channel.vaccine_id = Some(vaccine.id);
                channel.quantity += unit.quantity;
                channel.version += 1;
                channel.updated_at = now;
                self.storage.put_channel(txn, &channel)?;

                self.recorder.record_in(
                    txn,
                    TraceEntry {
                        operation: TraceOperation::Inbound,
                        inventory_id: unit.id,
                        trace_code: unit.trace_code.clone(),
                        batch_no: unit.batch_no.clone(),
                        from_location: Some(SUPPLIER_LOCATION.to_string()),
                        to_location: Some(channel.position.clone()),
                        temperature,
                        operator_id: request.operator_id.clone(),
                        remark: request.supplier.clone(),
                    },
                    None,
                )?;
                Ok(unit)
            })
            .await?;

        tracing::info!(
            inventory_id = unit.id,
            trace_code = %unit.trace_code,
            quantity = unit.quantity,
            "Stock received"
        );
        Ok(unit)
    }

    /// Move a unit to another channel
    pub async fn transfer(
        &self,
        inventory_id: u64,
        to_channel_id: u64,
        operator: Option<&str>,
    ) -> EngineResult<InventoryUnit> {
        self.locked_write(|txn| {
            let mut unit = self.in_stock_unit(txn, inventory_id)?;
            let from_id = unit
                .channel_id
                .ok_or_else(|| EngineError::validation(format!("inventory {} is not shelved", inventory_id)))?;
            if from_id == to_channel_id {
                return Err(EngineError::validation("source and destination are the same channel"));
            }
            let mut from = self.channel_txn(txn, from_id)?;
            let mut to = self.channel_txn(txn, to_channel_id)?;
            if to.status != ChannelStatus::Normal {
                return Err(EngineError::ChannelUnavailable(to.position));
            }
            if !to.can_hold(unit.vaccine_id) {
                return Err(EngineError::ChannelBoundToOtherVaccine(to.position));
            }
            if to.free_capacity() < unit.quantity {
                return Err(EngineError::ChannelCapacityExceeded {
                    position: to.position,
                    capacity: to.capacity,
                });
            }

            let now = now_millis();
            from.quantity = from.quantity.saturating_sub(unit.quantity);
            from.version += 1;
            from.updated_at = now;
            to.vaccine_id = Some(unit.vaccine_id);
            to.quantity += unit.quantity;
            to.version += 1;
            to.updated_at = now;
            unit.channel_id = Some(to.id);
            unit.version += 1;
            self.storage.put_channel(txn, &from)?;
            self.storage.put_channel(txn, &to)?;
            self.storage.put_inventory(txn, &unit)?;

            self.recorder.record_in(
                txn,
                TraceEntry {
                    operation: TraceOperation::Transfer,
                    inventory_id: unit.id,
                    trace_code: unit.trace_code.clone(),
                    batch_no: unit.batch_no.clone(),
                    from_location: Some(from.position.clone()),
                    to_location: Some(to.position.clone()),
                    temperature: self.readings.row_temperature(to.row),
                    operator_id: operator.map(str::to_string),
                    remark: None,
                },
                None,
            )?;
            Ok(unit)
        })
        .await
    }

    /// Take a unit out of stock without dispensing it
    pub async fn scrap(
        &self,
        inventory_id: u64,
        reason: &str,
        operator: Option<&str>,
    ) -> EngineResult<InventoryUnit> {
        self.locked_write(|txn| {
            let mut unit = self.in_stock_unit(txn, inventory_id)?;
            let mut from_location = None;
            let mut temperature = None;
            if let Some(channel_id) = unit.channel_id {
                let mut channel = self.channel_txn(txn, channel_id)?;
                channel.quantity = channel.quantity.saturating_sub(unit.quantity);
                channel.version += 1;
                channel.updated_at = now_millis();
                self.storage.put_channel(txn, &channel)?;
                temperature = self.readings.row_temperature(channel.row);
                from_location = Some(channel.position);
            }
            unit.status = InventoryStatus::Scrapped;
            unit.outbound_time = Some(now_millis());
            unit.version += 1;
            self.storage.put_inventory(txn, &unit)?;

            self.recorder.record_in(
                txn,
                TraceEntry {
                    operation: TraceOperation::Scrap,
                    inventory_id: unit.id,
                    trace_code: unit.trace_code.clone(),
                    batch_no: unit.batch_no.clone(),
                    from_location,
                    to_location: Some(SCRAP_LOCATION.to_string()),
                    temperature,
                    operator_id: operator.map(str::to_string),
                    remark: Some(reason.to_string()),
                },
                None,
            )?;
            Ok(unit)
        })
        .await
    }

    fn in_stock_unit(&self, txn: &WriteTransaction, id: u64) -> EngineResult<InventoryUnit> {
        let unit = self
            .storage
            .inventory_txn(txn, id)?
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| EngineError::not_found(format!("inventory {}", id)))?;
        if !unit.is_in_stock() {
            return Err(EngineError::InventoryNotInStock(id));
        }
        Ok(unit)
    }

    // ========== Queries ==========

    pub fn inventory(&self, id: u64) -> EngineResult<InventoryUnit> {
        self.storage
            .inventory(id)?
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| EngineError::not_found(format!("inventory {}", id)))
    }

    /// Live rows, optionally for one vaccine
    pub fn list_inventory(&self, vaccine_id: Option<u64>) -> EngineResult<Vec<InventoryUnit>> {
        Ok(self
            .storage
            .list_inventory()?
            .into_iter()
            .filter(|u| !u.is_deleted())
            .filter(|u| vaccine_id.is_none_or(|id| u.vaccine_id == id))
            .collect())
    }

    /// In-stock, near-expiry and expired quantities per live vaccine
    pub fn summary(&self, today: NaiveDate) -> EngineResult<Vec<InventorySummary>> {
        let warn_until = today + chrono::Duration::days(self.expiry_warn_days);
        let mut by_vaccine: HashMap<u64, InventorySummary> = self
            .storage
            .list_vaccines()?
            .into_iter()
            .map(|v| {
                (
                    v.id,
                    InventorySummary {
                        vaccine_id: v.id,
                        ..Default::default()
                    },
                )
            })
            .collect();

        for unit in self.storage.list_inventory()?.iter().filter(|u| u.is_in_stock()) {
            let Some(summary) = by_vaccine.get_mut(&unit.vaccine_id) else {
                continue;
            };
            if unit.is_expired(today) {
                summary.expired_in_stock += unit.quantity;
            } else {
                summary.in_stock += unit.quantity;
                if unit.expiry_date <= warn_until {
                    summary.near_expiry += unit.quantity;
                }
            }
        }

        let mut summaries: Vec<_> = by_vaccine.into_values().collect();
        summaries.sort_by_key(|s| s.vaccine_id);
        Ok(summaries)
    }
}
