//! Dispatch coordinator
//!
//! Per plan entry, in FEFO order:
//!
//! ```text
//! acquire machine lease
//!   └─ re-validate unit + channel (substitute on mismatch)
//!        └─ OrderItem(Pending) ─▶ device.dispense() bounded by hardware timeout
//!             ├─ success ─▶ one write txn: unit/channel decrement (version-checked),
//!             │             OUTBOUND trace (idempotent), OrderItem(Dispensed)
//!             └─ failure ─▶ OrderItem(Failed) + alarm, stop the order
//! release lease
//! ```
//!
//! Committed items are never rolled back. The first failed item halts the
//! order; remaining entries stay unattempted until a manual retry.

use chrono::NaiveDate;
use redb::WriteTransaction;
use shared::ErrorCode;
use shared::message::EngineEvent;
use shared::models::{
    AlarmLevel, AlarmType, Channel, DispenseRequest, DispenseResponse, InventoryStatus,
    InventoryUnit, ItemFailure, NewAlarm, Order, OrderItem, OrderItemStatus, TraceOperation,
};
use shared::util::now_millis;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use super::{CancelRequests, DeviceError, DispenseDevice};
use crate::alarms::AlarmSink;
use crate::common::{EngineError, EngineResult};
use crate::core::Config;
use crate::inventory::{AllocationPlanner, PlanEntry, Reservations, is_eligible};
use crate::lock::ChannelLockManager;
use crate::message::EventBus;
use crate::storage::{RackStorage, StorageError};
use crate::temperature::LiveReadings;
use crate::trace::{TraceEntry, TraceRecorder};

/// How an order's dispatch run ended
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Every entry dispensed
    Completed { dispensed: u32 },
    /// An item failed; `dispensed` items before it stay committed
    Failed {
        seq: u32,
        dispensed: u32,
        error: EngineError,
    },
    /// A cancel request was honored between items
    Cancelled { dispensed: u32 },
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub machine_id: String,
    pub hardware_timeout: Duration,
    pub conflict_retries: u32,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            machine_id: config.machine_id.clone(),
            hardware_timeout: config.hardware_timeout(),
            conflict_retries: config.conflict_retries,
        }
    }
}

/// Unit + channel as read during re-validation
struct Target {
    unit: InventoryUnit,
    channel: Channel,
}

pub struct DispatchCoordinator {
    storage: RackStorage,
    planner: AllocationPlanner,
    recorder: TraceRecorder,
    locks: ChannelLockManager,
    device: Arc<dyn DispenseDevice>,
    alarms: Arc<dyn AlarmSink>,
    bus: EventBus,
    readings: LiveReadings,
    cancels: CancelRequests,
    settings: DispatchSettings,
}

impl DispatchCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: RackStorage,
        planner: AllocationPlanner,
        recorder: TraceRecorder,
        locks: ChannelLockManager,
        device: Arc<dyn DispenseDevice>,
        alarms: Arc<dyn AlarmSink>,
        bus: EventBus,
        readings: LiveReadings,
        cancels: CancelRequests,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            storage,
            planner,
            recorder,
            locks,
            device,
            alarms,
            bus,
            readings,
            cancels,
            settings,
        }
    }

    /// Dispatch plan entries for an order already in `Processing`
    ///
    /// Item sequence numbers start at `first_seq`; `prior_dispensed` counts
    /// units committed by earlier runs of the same order.
    pub async fn run(
        &self,
        order: &Order,
        entries: Vec<PlanEntry>,
        first_seq: u32,
        prior_dispensed: u32,
        today: NaiveDate,
    ) -> EngineResult<DispatchOutcome> {
        let mut reservations = Reservations::from_entries(&entries);
        let mut dispensed = 0u32;

        for (offset, entry) in entries.into_iter().enumerate() {
            if self.cancels.take(&order.order_no) {
                if prior_dispensed + dispensed == 0 {
                    tracing::info!(order_no = %order.order_no, "Cancel honored between items");
                    return Ok(DispatchOutcome::Cancelled { dispensed });
                }
                tracing::warn!(
                    order_no = %order.order_no,
                    dispensed = prior_dispensed + dispensed,
                    "Cancel dropped, units already dispensed"
                );
            }

            let seq = first_seq + offset as u32;
            let cancellable = prior_dispensed + dispensed == 0;
            reservations.consume(entry.inventory_id);
            match self
                .dispatch_item(order, seq, entry, &mut reservations, today, cancellable)
                .await
            {
                Ok(()) => dispensed += 1,
                Err(EngineError::OrderCancelled(_)) => {
                    self.cancels.take(&order.order_no);
                    return Ok(DispatchOutcome::Cancelled { dispensed });
                }
                Err(error) if Self::is_item_failure(&error) => {
                    return Ok(DispatchOutcome::Failed {
                        seq,
                        dispensed,
                        error,
                    });
                }
                Err(fatal) => return Err(fatal),
            }
        }

        Ok(DispatchOutcome::Completed { dispensed })
    }

    /// Storage failures abort the run; everything else fails the item
    fn is_item_failure(error: &EngineError) -> bool {
        !matches!(error, EngineError::Storage(_))
    }

    #[instrument(skip(self, order, entry, reservations, today, cancellable), fields(order_no = %order.order_no))]
    async fn dispatch_item(
        &self,
        order: &Order,
        seq: u32,
        entry: PlanEntry,
        reservations: &mut Reservations,
        today: NaiveDate,
        cancellable: bool,
    ) -> EngineResult<()> {
        let owner = format!("{}:{}", self.settings.machine_id, order.order_no);
        let lease = match self.locks.acquire(order.priority, &owner).await {
            Ok(lease) => lease,
            Err(e) => {
                let error = EngineError::from(e);
                self.fail_item(order, seq, &entry, None, &error).await?;
                return Err(error);
            }
        };

        // a cancel that arrived while waiting for the lease, no command issued yet
        if cancellable && self.cancels.is_requested(&order.order_no) {
            if let Err(e) = lease.release().await {
                tracing::warn!(error = %e, "Machine lease release failed");
            }
            tracing::info!("Cancel honored before first command");
            return Err(EngineError::OrderCancelled(order.order_no.clone()));
        }

        let result = self
            .dispatch_locked(order, seq, &entry, reservations, today, lease.is_lost())
            .await;

        if let Err(e) = lease.release().await {
            tracing::warn!(error = %e, "Machine lease release failed");
        }

        match result {
            Ok(()) => Ok(()),
            Err((error, target)) => {
                if !matches!(error, EngineError::Storage(_)) {
                    self.fail_item(order, seq, &entry, target.as_ref(), &error)
                        .await?;
                }
                Err(error)
            }
        }
    }

    /// Runs while the machine lease is held
    async fn dispatch_locked(
        &self,
        order: &Order,
        seq: u32,
        entry: &PlanEntry,
        reservations: &mut Reservations,
        today: NaiveDate,
        lease_lost: bool,
    ) -> Result<(), (EngineError, Option<Target>)> {
        if lease_lost {
            return Err((
                EngineError::Lock(crate::lock::LockError::Lost {
                    key: self.locks.resource_key().to_string(),
                }),
                None,
            ));
        }

        let target = self
            .revalidate(order, entry, reservations, today)
            .map_err(|e| (e, None))?;

        // command in flight
        self.record_pending_item(order, seq, &target)
            .map_err(|e| (e, None))?;

        let request = DispenseRequest {
            channel_id: target.channel.id,
            position: target.channel.position.clone(),
            trace_code: target.unit.trace_code.clone(),
            timeout_ms: self.settings.hardware_timeout.as_millis() as u64,
        };
        tracing::debug!(channel = %request.position, trace_code = %request.trace_code, "Dispense command issued");

        let response =
            match tokio::time::timeout(self.settings.hardware_timeout, self.device.dispense(&request))
                .await
            {
                Err(_) => Err(EngineError::Device(DeviceError::Timeout(request.timeout_ms))),
                Ok(Err(e)) => Err(EngineError::Device(e)),
                Ok(Ok(resp)) if !resp.success => {
                    let reason = resp
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "unspecified".into());
                    if resp.vision_rejected {
                        Err(EngineError::VisionRejected(reason))
                    } else {
                        Err(EngineError::DispenseFailed(reason))
                    }
                }
                Ok(Ok(resp)) => Ok(resp),
            };

        let response = match response {
            Ok(resp) => resp,
            Err(e) => return Err((e, Some(target))),
        };

        match self.commit_with_retry(order, seq, &target, &response) {
            Ok(()) => Ok(()),
            Err(e) => Err((e, Some(target))),
        }
    }

    /// Re-read the planned unit; substitute from the same pool on mismatch
    fn revalidate(
        &self,
        order: &Order,
        entry: &PlanEntry,
        reservations: &mut Reservations,
        today: NaiveDate,
    ) -> EngineResult<Target> {
        let mut candidate = entry.clone();
        loop {
            let unit = self.storage.inventory(candidate.inventory_id)?;
            let channel = self.storage.channel(candidate.channel_id)?;
            if let (Some(unit), Some(channel)) = (unit, channel)
                && is_eligible(&unit, Some(&channel), today)
            {
                return Ok(Target { unit, channel });
            }

            tracing::info!(
                order_no = %order.order_no,
                inventory_id = candidate.inventory_id,
                channel_id = candidate.channel_id,
                "Planned unit no longer eligible, looking for substitute"
            );
            reservations.excluded.insert(candidate.inventory_id);
            match self
                .planner
                .plan_substitute(order.vaccine_id, reservations, today)?
            {
                Some(substitute) => candidate = substitute,
                None => {
                    return Err(EngineError::ChannelUnavailable(format!(
                        "no eligible unit left for vaccine {}",
                        order.vaccine_id
                    )));
                }
            }
        }
    }

    fn record_pending_item(&self, order: &Order, seq: u32, target: &Target) -> EngineResult<()> {
        let txn = self.storage.begin_write()?;
        let item = OrderItem {
            order_no: order.order_no.clone(),
            seq,
            inventory_id: target.unit.id,
            channel_id: target.channel.id,
            trace_code: target.unit.trace_code.clone(),
            batch_no: target.unit.batch_no.clone(),
            status: OrderItemStatus::Pending,
            failure: None,
            outbound_temperature: None,
            vision_verified: false,
            vision_image_ref: None,
            outbound_time: None,
            created_at: now_millis(),
        };
        self.storage.put_order_item(&txn, &item)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    /// Commit a verified dispense, retrying the read-validate step on
    /// version conflicts
    fn commit_with_retry(
        &self,
        order: &Order,
        seq: u32,
        target: &Target,
        response: &DispenseResponse,
    ) -> EngineResult<()> {
        let mut expected = (target.unit.version, target.channel.version);
        let mut attempt = 0;
        loop {
            match self.try_commit(order, seq, target, expected, response) {
                Err(EngineError::ConcurrentModificationConflict(reason))
                    if attempt < self.settings.conflict_retries =>
                {
                    attempt += 1;
                    tracing::warn!(attempt, reason = %reason, "Version conflict on commit, re-validating");
                    let unit = self.storage.inventory(target.unit.id)?;
                    let channel = self.storage.channel(target.channel.id)?;
                    match (unit, channel) {
                        (Some(u), Some(c))
                            if u.is_in_stock() && c.quantity > 0 && u.channel_id == Some(c.id) =>
                        {
                            expected = (u.version, c.version);
                        }
                        _ => return Err(EngineError::ConcurrentModificationConflict(reason)),
                    }
                }
                other => return other,
            }
        }
    }

    fn try_commit(
        &self,
        order: &Order,
        seq: u32,
        target: &Target,
        expected: (u64, u64),
        response: &DispenseResponse,
    ) -> EngineResult<()> {
        let txn = self.storage.begin_write()?;

        // replayed outcome
        if let Some(existing) = self.storage.order_item_txn(&txn, &order.order_no, seq)?
            && existing.status == OrderItemStatus::Dispensed
        {
            return Ok(());
        }

        let (mut unit, mut channel) = self.load_versioned(&txn, target, expected)?;
        let now = now_millis();

        unit.quantity -= 1;
        if unit.quantity == 0 {
            unit.status = InventoryStatus::OutOfStock;
            unit.outbound_time = Some(now);
        }
        unit.version += 1;
        channel.quantity -= 1;
        channel.last_outbound = Some(now);
        channel.updated_at = now;
        channel.version += 1;
        self.storage.put_inventory(&txn, &unit)?;
        self.storage.put_channel(&txn, &channel)?;

        let temperature = response
            .measured_temperature
            .or_else(|| self.readings.row_temperature(channel.row));

        let item = OrderItem {
            order_no: order.order_no.clone(),
            seq,
            inventory_id: unit.id,
            channel_id: channel.id,
            trace_code: unit.trace_code.clone(),
            batch_no: unit.batch_no.clone(),
            status: OrderItemStatus::Dispensed,
            failure: None,
            outbound_temperature: temperature,
            vision_verified: true,
            vision_image_ref: response.vision_image_ref.clone(),
            outbound_time: Some(now),
            created_at: now,
        };
        self.recorder.record_in(
            &txn,
            TraceEntry {
                operation: TraceOperation::Outbound,
                inventory_id: unit.id,
                trace_code: unit.trace_code.clone(),
                batch_no: unit.batch_no.clone(),
                from_location: Some(channel.position.clone()),
                to_location: Some(format!("order:{}", order.order_no)),
                temperature,
                operator_id: order.operator_id.clone(),
                remark: order.patient_ref.clone(),
            },
            Some(&item.dispense_key()),
        )?;
        self.storage.put_order_item(&txn, &item)?;
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(
            trace_code = %item.trace_code,
            channel = %channel.position,
            remaining = channel.quantity,
            "Unit dispensed"
        );
        self.bus.publish(EngineEvent::ItemDispensed {
            order_no: order.order_no.clone(),
            seq,
            trace_code: item.trace_code,
            channel_id: channel.id,
        });
        Ok(())
    }

    fn load_versioned(
        &self,
        txn: &WriteTransaction,
        target: &Target,
        expected: (u64, u64),
    ) -> EngineResult<(InventoryUnit, Channel)> {
        let unit = self
            .storage
            .inventory_txn(txn, target.unit.id)?
            .ok_or_else(|| EngineError::not_found(format!("inventory {}", target.unit.id)))?;
        let channel = self
            .storage
            .channel_txn(txn, target.channel.id)?
            .ok_or_else(|| EngineError::not_found(format!("channel {}", target.channel.id)))?;

        if unit.version != expected.0 || channel.version != expected.1 {
            return Err(EngineError::ConcurrentModificationConflict(format!(
                "inventory {} v{}→v{}, channel {} v{}→v{}",
                unit.id, expected.0, unit.version, channel.position, expected.1, channel.version
            )));
        }
        if unit.quantity == 0 || channel.quantity == 0 {
            return Err(EngineError::InventoryNotInStock(unit.id));
        }
        Ok((unit, channel))
    }

    /// Record the failed item and raise its alarm
    async fn fail_item(
        &self,
        order: &Order,
        seq: u32,
        entry: &PlanEntry,
        target: Option<&Target>,
        error: &EngineError,
    ) -> EngineResult<()> {
        let (trace_code, batch_no, inventory_id, channel_id) = match target {
            Some(t) => (
                t.unit.trace_code.clone(),
                t.unit.batch_no.clone(),
                t.unit.id,
                t.channel.id,
            ),
            None => {
                let unit = self.storage.inventory(entry.inventory_id)?;
                (
                    unit.as_ref().map(|u| u.trace_code.clone()).unwrap_or_default(),
                    unit.as_ref().map(|u| u.batch_no.clone()).unwrap_or_default(),
                    entry.inventory_id,
                    entry.channel_id,
                )
            }
        };

        let txn = self.storage.begin_write()?;
        let item = OrderItem {
            order_no: order.order_no.clone(),
            seq,
            inventory_id,
            channel_id,
            trace_code,
            batch_no,
            status: OrderItemStatus::Failed,
            failure: Some(ItemFailure {
                code: error.code(),
                reason: error.to_string(),
            }),
            outbound_temperature: None,
            vision_verified: false,
            vision_image_ref: None,
            outbound_time: None,
            created_at: now_millis(),
        };
        self.storage.put_order_item(&txn, &item)?;
        txn.commit().map_err(StorageError::from)?;

        tracing::error!(code = %error.code(), error = %error, "Order item failed");

        let (alarm_type, level) = match error.code() {
            ErrorCode::HardwareTimeout => (AlarmType::HardwareTimeout, AlarmLevel::Severe),
            ErrorCode::VisionVerificationFailed => (AlarmType::VisionRejected, AlarmLevel::Severe),
            ErrorCode::LockAcquisitionTimeout | ErrorCode::LockLost => {
                (AlarmType::LockTimeout, AlarmLevel::Warning)
            }
            ErrorCode::ChannelUnavailable => (AlarmType::ChannelUnavailable, AlarmLevel::Warning),
            _ => (AlarmType::DispenseFailed, AlarmLevel::Severe),
        };
        self.alarms
            .raise(
                NewAlarm::new(
                    alarm_type,
                    level,
                    format!("order:{}", order.order_no),
                    format!("item {} failed: {}", seq, error),
                )
                .with_source_id(format!("channel:{}", channel_id)),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::AlarmService;
    use crate::dispatch::{SimOutcome, SimulatedRack};
    use crate::inventory::InventoryService;
    use crate::lock::{BackoffPolicy, MemoryLock};
    use shared::models::{
        InboundRequest, OrderPriority, OrderSource, OrderStatus, VaccineInput,
    };

    struct Fixture {
        storage: RackStorage,
        inventory: InventoryService,
        planner: AllocationPlanner,
        coordinator: DispatchCoordinator,
        rack: Arc<SimulatedRack>,
        alarms: Arc<AlarmService>,
        cancels: CancelRequests,
        vaccine_id: u64,
    }

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        day(1, 10)
    }

    async fn fixture(hardware_timeout: Duration) -> Fixture {
        let storage = RackStorage::open_in_memory().unwrap();
        let bus = EventBus::new(64);
        let readings = LiveReadings::new();
        let locks = ChannelLockManager::new(
            Arc::new(MemoryLock::new()),
            "rack-test",
            Duration::from_secs(2),
            BackoffPolicy::default(),
        );
        let recorder = TraceRecorder::new(storage.clone());
        let planner = AllocationPlanner::new(storage.clone());
        let rack = Arc::new(SimulatedRack::new(Duration::from_millis(1)));
        let alarms = Arc::new(AlarmService::new(storage.clone(), bus.clone()));
        let cancels = CancelRequests::default();
        let coordinator = DispatchCoordinator::new(
            storage.clone(),
            planner.clone(),
            recorder.clone(),
            locks.clone(),
            rack.clone(),
            alarms.clone(),
            bus,
            readings.clone(),
            cancels.clone(),
            DispatchSettings {
                machine_id: "rack-test".into(),
                hardware_timeout,
                conflict_retries: 2,
            },
        );
        let inventory = InventoryService::new(storage.clone(), recorder, locks, readings, "rack-test", 30);
        let vaccine_id = inventory
            .register_vaccine(VaccineInput {
                code: "MMR".into(),
                name: "Measles-Mumps-Rubella".into(),
                common_name: None,
                manufacturer: "Acme Bio".into(),
                specification: None,
                storage_temp_min: None,
                storage_temp_max: None,
                dose_count: Some(2),
            })
            .unwrap()
            .id;
        Fixture {
            storage,
            inventory,
            planner,
            coordinator,
            rack,
            alarms,
            cancels,
            vaccine_id,
        }
    }

    impl Fixture {
        async fn stock(&self, row: char, col: u32, quantity: u32, expiry: NaiveDate) -> InventoryUnit {
            let channel = self.inventory.register_channel(row, col, 10).unwrap();
            self.inventory
                .inbound(
                    InboundRequest {
                        vaccine_id: self.vaccine_id,
                        batch_no: format!("B-{}{}", row, col),
                        trace_code: None,
                        production_date: None,
                        expiry_date: expiry,
                        channel_id: channel.id,
                        quantity,
                        temperature: Some(5.0),
                        operator_id: None,
                        supplier: None,
                    },
                    today(),
                )
                .await
                .unwrap()
        }

        fn order(&self, order_no: &str, quantity: u32) -> Order {
            let order = Order {
                order_no: order_no.into(),
                source: OrderSource::Manual,
                source_order_id: None,
                patient_ref: None,
                vaccine_id: self.vaccine_id,
                quantity,
                dose_number: 1,
                priority: OrderPriority::Normal,
                status: OrderStatus::Processing,
                error_message: None,
                receive_time: 0,
                start_time: Some(0),
                complete_time: None,
                operator_id: None,
                deleted_at: None,
            };
            let txn = self.storage.begin_write().unwrap();
            self.storage.insert_order(&txn, &order).unwrap();
            txn.commit().unwrap();
            order
        }

        fn outbound_traces(&self) -> usize {
            self.storage
                .list_traces()
                .unwrap()
                .iter()
                .filter(|t| t.operation == TraceOperation::Outbound)
                .count()
        }
    }

    #[tokio::test]
    async fn replayed_commit_is_idempotent() {
        let fx = fixture(Duration::from_millis(200)).await;
        let unit = fx.stock('A', 1, 2, day(6, 1)).await;
        let order = fx.order("VO1", 1);
        let channel = fx.storage.channel(unit.channel_id.unwrap()).unwrap().unwrap();
        let target = Target {
            unit: unit.clone(),
            channel: channel.clone(),
        };
        let response = DispenseResponse::ok("img://1", Some(4.0));

        fx.coordinator
            .try_commit(&order, 1, &target, (unit.version, channel.version), &response)
            .unwrap();
        fx.coordinator
            .try_commit(&order, 1, &target, (unit.version, channel.version), &response)
            .unwrap();

        assert_eq!(fx.outbound_traces(), 1);
        assert_eq!(fx.storage.channel(channel.id).unwrap().unwrap().quantity, 1);
        assert_eq!(fx.storage.inventory(unit.id).unwrap().unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let fx = fixture(Duration::from_millis(200)).await;
        let unit = fx.stock('A', 1, 2, day(6, 1)).await;
        let order = fx.order("VO1", 1);
        let channel = fx.storage.channel(unit.channel_id.unwrap()).unwrap().unwrap();
        let target = Target { unit: unit.clone(), channel: channel.clone() };

        let err = fx
            .coordinator
            .try_commit(&order, 1, &target, (unit.version + 7, channel.version), &DispenseResponse::ok("img", None))
            .unwrap_err();
        assert!(matches!(err, EngineError::ConcurrentModificationConflict(_)));

        // the retry loop re-reads and succeeds
        let stale = Target {
            unit: InventoryUnit {
                version: unit.version + 7,
                ..unit.clone()
            },
            channel,
        };
        fx.coordinator
            .commit_with_retry(&order, 1, &stale, &DispenseResponse::ok("img", None))
            .unwrap();
        assert_eq!(fx.outbound_traces(), 1);
    }

    #[tokio::test]
    async fn substitutes_unit_taken_since_planning() {
        let fx = fixture(Duration::from_millis(200)).await;
        let early = fx.stock('A', 1, 1, day(3, 1)).await;
        let late = fx.stock('A', 2, 1, day(9, 1)).await;
        let plan = fx.planner.plan(fx.vaccine_id, 1, today()).unwrap();
        assert_eq!(plan.entries[0].inventory_id, early.id);

        fx.inventory.scrap(early.id, "damaged", None).await.unwrap();
        let order = fx.order("VO1", 1);
        let outcome = fx
            .coordinator
            .run(&order, plan.entries, 1, 0, today())
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Completed { dispensed: 1 }));
        let items = fx.storage.order_items("VO1").unwrap();
        assert_eq!(items[0].inventory_id, late.id);
    }

    #[tokio::test]
    async fn timeout_stops_the_order() {
        let fx = fixture(Duration::from_millis(50)).await;
        fx.stock('A', 1, 3, day(6, 1)).await;
        fx.rack.script([SimOutcome::Success, SimOutcome::Hang]);
        let order = fx.order("VO1", 3);
        let plan = fx.planner.plan(fx.vaccine_id, 3, today()).unwrap();

        let outcome = fx.coordinator.run(&order, plan.entries, 1, 0, today()).await.unwrap();
        match outcome {
            DispatchOutcome::Failed { seq, dispensed, error } => {
                assert_eq!(seq, 2);
                assert_eq!(dispensed, 1);
                assert_eq!(error.code(), ErrorCode::HardwareTimeout);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(fx.rack.calls().len(), 2);
        let items = fx.storage.order_items("VO1").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].status, OrderItemStatus::Failed);

        let alarms = fx.alarms.list_alarms(None, None).unwrap();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].alarm_type, AlarmType::HardwareTimeout);
        assert_eq!(alarms[0].level, AlarmLevel::Severe);
    }

    #[tokio::test]
    async fn vision_reject_keeps_stock() {
        let fx = fixture(Duration::from_millis(200)).await;
        let unit = fx.stock('A', 1, 1, day(6, 1)).await;
        fx.rack.script([SimOutcome::VisionReject("label mismatch".into())]);
        let order = fx.order("VO1", 1);
        let plan = fx.planner.plan(fx.vaccine_id, 1, today()).unwrap();

        let outcome = fx.coordinator.run(&order, plan.entries, 1, 0, today()).await.unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed { error: EngineError::VisionRejected(_), .. }
        ));
        assert_eq!(fx.storage.inventory(unit.id).unwrap().unwrap().quantity, 1);
        assert_eq!(fx.outbound_traces(), 0);
        assert_eq!(
            fx.alarms.list_alarms(None, None).unwrap()[0].alarm_type,
            AlarmType::VisionRejected
        );
    }

    #[tokio::test]
    async fn cancel_before_first_item() {
        let fx = fixture(Duration::from_millis(200)).await;
        fx.stock('A', 1, 2, day(6, 1)).await;
        let order = fx.order("VO1", 2);
        let plan = fx.planner.plan(fx.vaccine_id, 2, today()).unwrap();
        fx.cancels.request("VO1");

        let outcome = fx.coordinator.run(&order, plan.entries, 1, 0, today()).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Cancelled { dispensed: 0 }));
        assert!(fx.rack.calls().is_empty());
        assert!(!fx.cancels.is_requested("VO1"));
    }
}
