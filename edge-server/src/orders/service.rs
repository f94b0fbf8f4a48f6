//! Order intake, processing and control

use dashmap::DashSet;
use redb::WriteTransaction;
use shared::message::EngineEvent;
use shared::models::{
    AlarmLevel, AlarmType, CreateOrderRequest, ItemFailure, NewAlarm, Order, OrderItem,
    OrderItemStatus, OrderSource, OrderStatus,
};
use shared::util::{date_stamp, now_millis, today};
use shared::ErrorCode;
use std::sync::Arc;

use super::OrderStateMachine;
use crate::alarms::AlarmSink;
use crate::common::{EngineError, EngineResult};
use crate::dispatch::{CancelRequests, DispatchCoordinator, DispatchOutcome, DispatchQueue};
use crate::inventory::AllocationPlanner;
use crate::message::EventBus;
use crate::storage::{RackStorage, StorageError, counters};

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Order is now `Cancelled`
    Cancelled,
    /// Order is being dispatched; it stops at the next item boundary if
    /// nothing has been dispensed by then
    Requested,
}

/// Clears the in-flight marker on every exit path
struct InFlight<'a> {
    set: &'a DashSet<String>,
    order_no: &'a str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(self.order_no);
    }
}

pub struct OrderService {
    storage: RackStorage,
    planner: AllocationPlanner,
    coordinator: Arc<DispatchCoordinator>,
    queue: DispatchQueue,
    cancels: CancelRequests,
    alarms: Arc<dyn AlarmSink>,
    bus: EventBus,
    in_flight: DashSet<String>,
}

impl OrderService {
    pub fn new(
        storage: RackStorage,
        planner: AllocationPlanner,
        coordinator: Arc<DispatchCoordinator>,
        queue: DispatchQueue,
        cancels: CancelRequests,
        alarms: Arc<dyn AlarmSink>,
        bus: EventBus,
    ) -> Self {
        Self {
            storage,
            planner,
            coordinator,
            queue,
            cancels,
            alarms,
            bus,
            in_flight: DashSet::new(),
        }
    }

    // ========== Intake ==========

    /// Validate, plan and persist a `Pending` order, then queue it
    ///
    /// A repeated HIS `source_order_id` returns the existing order number.
    /// Nothing is persisted when validation or planning fails.
    pub fn create_order(
        &self,
        source: OrderSource,
        request: CreateOrderRequest,
    ) -> EngineResult<String> {
        if request.quantity == 0 {
            return Err(EngineError::validation("quantity must be positive"));
        }
        if let Some(source_id) = request.source_order_id.as_deref()
            && let Some(existing) = self.storage.order_no_for_source(source_id)?
        {
            tracing::info!(source_order_id = %source_id, order_no = %existing, "Duplicate HIS order acknowledged");
            return Ok(existing);
        }

        let vaccine = self
            .storage
            .vaccine_by_code(&request.vaccine_code)?
            .filter(|v| !v.is_deleted())
            .ok_or_else(|| EngineError::InvalidVaccine(request.vaccine_code.clone()))?;

        self.planner.plan(vaccine.id, request.quantity, today())?;
        let admission = self.queue.reserve()?;

        let date = date_stamp();
        let txn = self.storage.begin_write()?;
        let counter = self
            .storage
            .next_counter(&txn, &counters::daily("order_no", &date))?;
        let order = Order {
            order_no: format!("VO{}{}", date, 10_000 + counter),
            source,
            source_order_id: request.source_order_id.clone(),
            patient_ref: request.patient_ref,
            vaccine_id: vaccine.id,
            quantity: request.quantity,
            dose_number: request.dose_number.unwrap_or(1),
            priority: request.priority,
            status: OrderStatus::Pending,
            error_message: None,
            receive_time: now_millis(),
            start_time: None,
            complete_time: None,
            operator_id: request.operator_id,
            deleted_at: None,
        };
        match self.storage.insert_order(&txn, &order) {
            Err(StorageError::Duplicate {
                index: "source_order_id",
                key,
            }) => {
                drop(txn);
                return self
                    .storage
                    .order_no_for_source(&key)?
                    .ok_or_else(|| EngineError::internal("HIS index points nowhere"));
            }
            other => other?,
        }
        txn.commit().map_err(StorageError::from)?;
        admission.send(order.order_no.clone());

        crate::audit_log!(
            order.operator_id.as_deref().unwrap_or("system"),
            "create_order",
            format!("order:{}", order.order_no),
            format!("vaccine={} quantity={} priority={:?}", vaccine.code, order.quantity, order.priority)
        );
        Ok(order.order_no)
    }

    // ========== Processing ==========

    /// Dispatch an order; a no-op when it is already running or not runnable
    pub async fn process_order(&self, order_no: &str) -> EngineResult<()> {
        if !self.in_flight.insert(order_no.to_string()) {
            tracing::debug!(order_no = %order_no, "Order already in flight");
            return Ok(());
        }
        let _in_flight = InFlight {
            set: &self.in_flight,
            order_no,
        };

        let result = self.process_in_flight(order_no).await;
        self.cancels.take(order_no);
        result
    }

    async fn process_in_flight(&self, order_no: &str) -> EngineResult<()> {
        let order = self.get_order(order_no)?;
        let order = match order.status {
            OrderStatus::Pending => {
                match self.transition(order_no, OrderStatus::Processing, None) {
                    Ok(order) => order,
                    // cancelled while queued
                    Err(EngineError::InvalidOrderState { .. }) => return Ok(()),
                    Err(e) => return Err(e),
                }
            }
            OrderStatus::Processing => order,
            status => {
                tracing::debug!(order_no = %order_no, ?status, "Order not runnable");
                return Ok(());
            }
        };

        let items = self.storage.order_items(order_no)?;
        let dispensed = items
            .iter()
            .filter(|i| i.status == OrderItemStatus::Dispensed)
            .count() as u32;
        let remaining = order.quantity.saturating_sub(dispensed);
        if remaining == 0 {
            self.transition(order_no, OrderStatus::Completed, None)?;
            return Ok(());
        }

        let plan = match self.planner.plan(order.vaccine_id, remaining, today()) {
            Ok(plan) => plan,
            Err(e @ EngineError::InsufficientStock { .. }) => {
                self.escalate(&order, &e).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // failed attempts keep their rows, a resume continues after the last seq
        let first_seq = items.iter().map(|i| i.seq).max().unwrap_or(0) + 1;
        match self
            .coordinator
            .run(&order, plan.entries, first_seq, dispensed, today())
            .await
        {
            Ok(DispatchOutcome::Completed { dispensed: n }) => {
                tracing::info!(order_no = %order_no, dispensed = n, "Order completed");
                self.transition(order_no, OrderStatus::Completed, None)?;
            }
            Ok(DispatchOutcome::Failed { seq, error, .. }) => {
                self.transition(
                    order_no,
                    OrderStatus::Exception,
                    Some(format!("item {}: {}", seq, error)),
                )?;
            }
            Ok(DispatchOutcome::Cancelled { .. }) => {
                self.transition(order_no, OrderStatus::Cancelled, Some("cancelled by operator".into()))?;
            }
            Err(e) => {
                tracing::error!(order_no = %order_no, error = %e, "Dispatch aborted");
                if let Err(mark) = self.transition(order_no, OrderStatus::Exception, Some(e.to_string())) {
                    tracing::error!(order_no = %order_no, error = %mark, "Could not mark order as exception");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Exception + one alarm for a failure outside the item loop
    async fn escalate(&self, order: &Order, error: &EngineError) -> EngineResult<()> {
        self.transition(&order.order_no, OrderStatus::Exception, Some(error.to_string()))?;
        self.alarms
            .raise(
                NewAlarm::new(
                    AlarmType::DispenseFailed,
                    AlarmLevel::Warning,
                    format!("order:{}", order.order_no),
                    error.to_string(),
                )
                .with_source_id(order.order_no.clone()),
            )
            .await?;
        Ok(())
    }

    // ========== Control ==========

    /// Cancel an order that has not dispensed anything
    pub fn cancel_order(&self, order_no: &str, operator: Option<&str>) -> EngineResult<CancelOutcome> {
        let items = self.storage.order_items(order_no)?;
        let touched = items
            .iter()
            .any(|i| matches!(i.status, OrderItemStatus::Dispensed | OrderItemStatus::Pending));

        let txn = self.storage.begin_write()?;
        let mut order = self
            .storage
            .order_txn(&txn, order_no)?
            .filter(|o| !o.is_deleted())
            .ok_or_else(|| EngineError::OrderNotFound(order_no.to_string()))?;

        let outcome = match order.status {
            OrderStatus::Pending | OrderStatus::Exception if !touched => {
                let event = OrderStateMachine::transition(
                    &mut order,
                    OrderStatus::Cancelled,
                    Some("cancelled by operator".into()),
                )?;
                self.storage.put_order(&txn, &order)?;
                txn.commit().map_err(StorageError::from)?;
                self.bus.publish(event);
                CancelOutcome::Cancelled
            }
            OrderStatus::Processing if !touched => {
                drop(txn);
                self.cancels.request(order_no);
                CancelOutcome::Requested
            }
            from => {
                return Err(EngineError::InvalidOrderState {
                    order_no: order_no.to_string(),
                    from,
                    to: OrderStatus::Cancelled,
                });
            }
        };

        crate::audit_log!(operator.unwrap_or("system"), "cancel_order", format!("order:{}", order_no), format!("{:?}", outcome));
        Ok(outcome)
    }

    /// Resume an `Exception` order: re-plan and dispatch what is left
    pub fn retry_order(&self, order_no: &str, operator: Option<&str>) -> EngineResult<()> {
        let current = self.get_order(order_no)?;
        if current.status != OrderStatus::Exception {
            return Err(EngineError::InvalidOrderState {
                order_no: order_no.to_string(),
                from: current.status,
                to: OrderStatus::Processing,
            });
        }
        let admission = self.queue.reserve()?;
        let failed: Vec<OrderItem> = self
            .storage
            .order_items(order_no)?
            .into_iter()
            .filter(|i| i.status == OrderItemStatus::Failed)
            .collect();
        let txn = self.storage.begin_write()?;
        for mut item in failed {
            item.status = OrderItemStatus::Superseded;
            self.storage.put_order_item(&txn, &item)?;
        }
        self.commit_transition(txn, order_no, OrderStatus::Processing, None)?;
        admission.send(order_no.to_string());

        crate::audit_log!(operator.unwrap_or("system"), "retry_order", format!("order:{}", order_no));
        Ok(())
    }

    /// Queue `Pending` and interrupted `Processing` orders at startup
    ///
    /// An item still `Pending` means a command was in flight when the process
    /// stopped; its physical outcome is unknown, so the order goes to
    /// `Exception` for an operator to resolve.
    pub async fn recover_unfinished(&self) -> EngineResult<usize> {
        let mut queued = 0;
        for order in self.list_orders(None)? {
            match order.status {
                OrderStatus::Pending => {}
                OrderStatus::Processing => {
                    let items = self.storage.order_items(&order.order_no)?;
                    if let Some(interrupted) =
                        items.into_iter().find(|i| i.status == OrderItemStatus::Pending)
                    {
                        self.fail_interrupted(&order, interrupted).await?;
                        continue;
                    }
                }
                _ => continue,
            }
            if self.queue.enqueue(&order.order_no)? {
                queued += 1;
            }
        }
        if queued > 0 {
            tracing::info!(queued, "Unfinished orders re-queued");
        }
        Ok(queued)
    }

    async fn fail_interrupted(&self, order: &Order, mut item: OrderItem) -> EngineResult<()> {
        let reason = format!("item {} outcome unknown after restart", item.seq);
        item.status = OrderItemStatus::Failed;
        item.failure = Some(ItemFailure {
            code: ErrorCode::DispenseFailed,
            reason: reason.clone(),
        });
        let txn = self.storage.begin_write()?;
        self.storage.put_order_item(&txn, &item)?;
        txn.commit().map_err(StorageError::from)?;

        self.transition(&order.order_no, OrderStatus::Exception, Some(reason.clone()))?;
        self.alarms
            .raise(
                NewAlarm::new(
                    AlarmType::DispenseFailed,
                    AlarmLevel::Severe,
                    format!("order:{}", order.order_no),
                    reason,
                )
                .with_source_id(format!("channel:{}", item.channel_id)),
            )
            .await?;
        Ok(())
    }

    // ========== Queries ==========

    pub fn get_order(&self, order_no: &str) -> EngineResult<Order> {
        self.storage
            .order(order_no)?
            .filter(|o| !o.is_deleted())
            .ok_or_else(|| EngineError::OrderNotFound(order_no.to_string()))
    }

    /// Live orders, newest first
    pub fn list_orders(&self, status: Option<OrderStatus>) -> EngineResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .storage
            .list_orders()?
            .into_iter()
            .filter(|o| !o.is_deleted())
            .filter(|o| status.is_none_or(|s| o.status == s))
            .collect();
        orders.sort_by(|a, b| b.receive_time.cmp(&a.receive_time).then(b.order_no.cmp(&a.order_no)));
        Ok(orders)
    }

    pub fn order_items(&self, order_no: &str) -> EngineResult<Vec<OrderItem>> {
        self.get_order(order_no)?;
        Ok(self.storage.order_items(order_no)?)
    }

    /// Persist one transition and publish it
    fn transition(
        &self,
        order_no: &str,
        to: OrderStatus,
        reason: Option<String>,
    ) -> EngineResult<Order> {
        let txn = self.storage.begin_write()?;
        self.commit_transition(txn, order_no, to, reason)
    }

    /// Apply a transition inside `txn` together with its other writes
    fn commit_transition(
        &self,
        txn: WriteTransaction,
        order_no: &str,
        to: OrderStatus,
        reason: Option<String>,
    ) -> EngineResult<Order> {
        let mut order = self
            .storage
            .order_txn(&txn, order_no)?
            .ok_or_else(|| EngineError::OrderNotFound(order_no.to_string()))?;
        let event = OrderStateMachine::transition(&mut order, to, reason)?;
        self.storage.put_order(&txn, &order)?;
        txn.commit().map_err(StorageError::from)?;

        if let EngineEvent::OrderStatusChanged { from, to, reason, .. } = &event {
            tracing::info!(target: "audit", order_no = %order_no, ?from, ?to, reason = ?reason, "Order status changed");
        }
        self.bus.publish(event);
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Config, EngineState};
    use crate::dispatch::{SimOutcome, SimulatedRack};
    use crate::lock::MemoryLock;
    use shared::models::{InboundRequest, OrderPriority, TraceOperation, Vaccine, VaccineInput};
    use std::time::Duration;

    struct Rig {
        state: EngineState,
        rack: Arc<SimulatedRack>,
        vaccine: Vaccine,
        channel_id: u64,
    }

    async fn rig_with(config: Config, stock: u32) -> Rig {
        let rack = Arc::new(SimulatedRack::new(Duration::from_millis(1)).with_temperature(4.8));
        let state = EngineState::with_components(
            config,
            RackStorage::open_in_memory().unwrap(),
            Arc::new(MemoryLock::new()),
            rack.clone(),
        );
        let vaccine = state
            .inventory
            .register_vaccine(VaccineInput {
                code: "HEPB".into(),
                name: "Hepatitis B".into(),
                common_name: None,
                manufacturer: "Acme Bio".into(),
                specification: None,
                storage_temp_min: None,
                storage_temp_max: None,
                dose_count: Some(3),
            })
            .unwrap();
        let channel = state.inventory.register_channel('A', 1, 20).unwrap();
        if stock > 0 {
            state
                .inventory
                .inbound(
                    InboundRequest {
                        vaccine_id: vaccine.id,
                        batch_no: "B-2026-01".into(),
                        trace_code: None,
                        production_date: None,
                        expiry_date: today() + chrono::Duration::days(180),
                        channel_id: channel.id,
                        quantity: stock,
                        temperature: Some(4.5),
                        operator_id: Some("op-1".into()),
                        supplier: None,
                    },
                    today(),
                )
                .await
                .unwrap();
        }
        Rig {
            state,
            rack,
            vaccine,
            channel_id: channel.id,
        }
    }

    async fn rig(stock: u32) -> Rig {
        rig_with(Config::for_tests(), stock).await
    }

    fn request(quantity: u32) -> CreateOrderRequest {
        CreateOrderRequest {
            vaccine_code: "HEPB".into(),
            quantity,
            priority: OrderPriority::Normal,
            patient_ref: Some("P-1001".into()),
            source_order_id: None,
            dose_number: Some(1),
            operator_id: Some("nurse-3".into()),
        }
    }

    #[tokio::test]
    async fn creation_errors_leave_no_order() {
        let rig = rig(2).await;
        let orders = &rig.state.orders;

        assert!(matches!(
            orders.create_order(OrderSource::Manual, request(0)),
            Err(EngineError::Validation(_))
        ));
        let mut unknown = request(1);
        unknown.vaccine_code = "NOPE".into();
        assert!(matches!(
            orders.create_order(OrderSource::Manual, unknown),
            Err(EngineError::InvalidVaccine(_))
        ));
        assert!(matches!(
            orders.create_order(OrderSource::Manual, request(3)),
            Err(EngineError::InsufficientStock { requested: 3, available: 2 })
        ));
        assert!(orders.list_orders(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn his_order_is_idempotent() {
        let rig = rig(5).await;
        let orders = &rig.state.orders;
        let mut his = request(1);
        his.source_order_id = Some("HIS-778".into());

        let first = orders.create_order(OrderSource::His, his.clone()).unwrap();
        let second = orders.create_order(OrderSource::His, his).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("VO"));
        assert!(first.ends_with("10001"));
        assert_eq!(orders.list_orders(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn processed_order_completes() {
        let rig = rig(3).await;
        let orders = &rig.state.orders;
        let order_no = orders.create_order(OrderSource::Manual, request(2)).unwrap();

        orders.process_order(&order_no).await.unwrap();

        let order = orders.get_order(&order_no).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.start_time.is_some() && order.complete_time.is_some());

        let items = orders.order_items(&order_no).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.status == OrderItemStatus::Dispensed && i.vision_verified));
        assert_eq!(items[0].outbound_temperature, Some(4.8));
        assert_eq!(rig.state.inventory.channel(rig.channel_id).unwrap().quantity, 1);

        let traces = rig.state.traces.traces_for_code(&items[0].trace_code).unwrap();
        let outbound = traces
            .iter()
            .filter(|t| t.operation == TraceOperation::Outbound)
            .count();
        assert_eq!(outbound, 2);

        // replaying a finished order is a no-op
        orders.process_order(&order_no).await.unwrap();
        assert_eq!(orders.order_items(&order_no).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn pending_order_cancels_immediately() {
        let rig = rig(3).await;
        let orders = &rig.state.orders;
        let order_no = orders.create_order(OrderSource::Manual, request(1)).unwrap();

        assert_eq!(orders.cancel_order(&order_no, Some("nurse-3")).unwrap(), CancelOutcome::Cancelled);
        orders.process_order(&order_no).await.unwrap();
        assert_eq!(orders.get_order(&order_no).unwrap().status, OrderStatus::Cancelled);
        assert!(rig.rack.calls().is_empty());
    }

    #[tokio::test]
    async fn completed_order_cannot_cancel() {
        let rig = rig(3).await;
        let orders = &rig.state.orders;
        let order_no = orders.create_order(OrderSource::Manual, request(1)).unwrap();
        orders.process_order(&order_no).await.unwrap();

        let err = orders.cancel_order(&order_no, None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidOrderState { from: OrderStatus::Completed, .. }
        ));
    }

    #[tokio::test]
    async fn failed_item_retries_to_completion() {
        let rig = rig(3).await;
        let orders = &rig.state.orders;
        rig.rack.script([SimOutcome::MechanicalFailure("gripper jam".into())]);
        let order_no = orders.create_order(OrderSource::Manual, request(2)).unwrap();

        orders.process_order(&order_no).await.unwrap();
        let order = orders.get_order(&order_no).unwrap();
        assert_eq!(order.status, OrderStatus::Exception);
        assert!(order.error_message.unwrap().contains("gripper jam"));
        assert_eq!(rig.state.alarms.list_alarms(None, None).unwrap().len(), 1);
        assert_eq!(rig.state.inventory.channel(rig.channel_id).unwrap().quantity, 3);

        orders.retry_order(&order_no, Some("op-1")).unwrap();
        assert!(rig.state.queue.is_queued(&order_no));
        orders.process_order(&order_no).await.unwrap();

        assert_eq!(orders.get_order(&order_no).unwrap().status, OrderStatus::Completed);
        let items = orders.order_items(&order_no).unwrap();
        let statuses: Vec<_> = items.iter().map(|i| (i.seq, i.status)).collect();
        assert_eq!(
            statuses,
            vec![
                (1, OrderItemStatus::Superseded),
                (2, OrderItemStatus::Dispensed),
                (3, OrderItemStatus::Dispensed),
            ]
        );
        // the jammed attempt stays on record
        let failure = items[0].failure.as_ref().unwrap();
        assert!(failure.reason.contains("gripper jam"));
        assert_eq!(rig.state.inventory.channel(rig.channel_id).unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn retry_requires_exception() {
        let rig = rig(3).await;
        let orders = &rig.state.orders;
        let order_no = orders.create_order(OrderSource::Manual, request(1)).unwrap();
        assert!(matches!(
            orders.retry_order(&order_no, None),
            Err(EngineError::InvalidOrderState { from: OrderStatus::Pending, .. })
        ));
    }

    #[tokio::test]
    async fn repeated_failures_keep_every_attempt() {
        let rig = rig(3).await;
        let orders = &rig.state.orders;
        rig.rack.script([
            SimOutcome::MechanicalFailure("gripper jam".into()),
            SimOutcome::MechanicalFailure("door stuck".into()),
        ]);
        let order_no = orders.create_order(OrderSource::Manual, request(1)).unwrap();

        orders.process_order(&order_no).await.unwrap();
        orders.retry_order(&order_no, None).unwrap();
        orders.process_order(&order_no).await.unwrap();
        assert_eq!(orders.get_order(&order_no).unwrap().status, OrderStatus::Exception);

        let items = orders.order_items(&order_no).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].status, OrderItemStatus::Superseded);
        assert!(items[0].failure.as_ref().unwrap().reason.contains("gripper jam"));
        assert_eq!(items[1].status, OrderItemStatus::Failed);
        assert!(items[1].failure.as_ref().unwrap().reason.contains("door stuck"));

        // nothing left the rack, so cancel is still allowed
        assert_eq!(orders.cancel_order(&order_no, None).unwrap(), CancelOutcome::Cancelled);
    }

    #[tokio::test]
    async fn stock_gone_at_dispatch_escalates() {
        let rig = rig(1).await;
        let orders = &rig.state.orders;
        let order_no = orders.create_order(OrderSource::Manual, request(1)).unwrap();
        let unit = rig.state.inventory.list_inventory(None).unwrap().remove(0);
        rig.state.inventory.scrap(unit.id, "broken vial", Some("op-1")).await.unwrap();

        orders.process_order(&order_no).await.unwrap();
        assert_eq!(orders.get_order(&order_no).unwrap().status, OrderStatus::Exception);
        assert_eq!(rig.state.alarms.list_alarms(None, None).unwrap().len(), 1);
        assert!(rig.rack.calls().is_empty());
    }

    #[tokio::test]
    async fn full_queue_rejects_new_orders() {
        let mut config = Config::for_tests();
        config.max_pending_orders = 1;
        let rig = rig_with(config, 5).await;
        let orders = &rig.state.orders;

        orders.create_order(OrderSource::Manual, request(1)).unwrap();
        let err = orders.create_order(OrderSource::Manual, request(1)).unwrap_err();
        assert!(matches!(err, EngineError::SystemBusy(_)));
        assert_eq!(orders.list_orders(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn interrupted_item_marks_exception_on_recovery() {
        let rig = rig(3).await;
        let storage = rig.state.storage.clone();
        let orders = &rig.state.orders;
        let pending_no = orders.create_order(OrderSource::Manual, request(1)).unwrap();
        let stuck_no = orders.create_order(OrderSource::Manual, request(1)).unwrap();

        // simulate a crash mid-command on the second order
        let txn = storage.begin_write().unwrap();
        let mut stuck = storage.order_txn(&txn, &stuck_no).unwrap().unwrap();
        OrderStateMachine::transition(&mut stuck, OrderStatus::Processing, None).unwrap();
        storage.put_order(&txn, &stuck).unwrap();
        let unit = storage.list_inventory().unwrap().remove(0);
        storage
            .put_order_item(
                &txn,
                &OrderItem {
                    order_no: stuck_no.clone(),
                    seq: 1,
                    inventory_id: unit.id,
                    channel_id: rig.channel_id,
                    trace_code: unit.trace_code.clone(),
                    batch_no: unit.batch_no.clone(),
                    status: OrderItemStatus::Pending,
                    failure: None,
                    outbound_temperature: None,
                    vision_verified: false,
                    vision_image_ref: None,
                    outbound_time: None,
                    created_at: 0,
                },
            )
            .unwrap();
        txn.commit().unwrap();

        let restarted = EngineState::with_components(
            Config::for_tests(),
            storage,
            Arc::new(MemoryLock::new()),
            rig.rack.clone(),
        );
        assert_eq!(restarted.orders.recover_unfinished().await.unwrap(), 1);
        assert!(restarted.queue.is_queued(&pending_no));
        assert_eq!(restarted.orders.get_order(&stuck_no).unwrap().status, OrderStatus::Exception);
        let items = restarted.orders.order_items(&stuck_no).unwrap();
        assert_eq!(items[0].status, OrderItemStatus::Failed);
    }
}
