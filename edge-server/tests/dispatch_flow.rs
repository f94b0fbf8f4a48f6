//! End-to-end dispatch scenarios

mod common;

use common::{config, in_days, rig};
use shared::models::{
    AlarmType, CreateOrderRequest, OrderItemStatus, OrderPriority, OrderSource, OrderStatus,
    TraceOperation,
};
use std::time::Duration;
use vaccine_edge::dispatch::SimOutcome;
use vaccine_edge::{CancelOutcome, EngineError};

fn order_for(quantity: u32) -> CreateOrderRequest {
    CreateOrderRequest {
        vaccine_code: "V-HEPB".into(),
        quantity,
        priority: OrderPriority::Normal,
        patient_ref: Some("P-20261016-07".into()),
        source_order_id: None,
        dose_number: Some(2),
        operator_id: Some("nurse-1".into()),
    }
}

#[tokio::test]
async fn fefo_drains_nearest_expiry_then_runs_short() {
    let rig = rig(config(), Duration::from_millis(2));
    let c1 = rig.load('A', 1, 3, in_days(60)).await;
    let c2 = rig.load('A', 2, 2, in_days(300)).await;
    let orders = &rig.state.orders;

    let first = orders.create_order(OrderSource::Manual, order_for(3)).unwrap();
    orders.process_order(&first).await.unwrap();

    assert_eq!(orders.get_order(&first).unwrap().status, OrderStatus::Completed);
    let items = orders.order_items(&first).unwrap();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| i.inventory_id == c1.id));
    assert_eq!(rig.channel_quantity("A1"), 0);
    assert_eq!(rig.channel_quantity("A2"), 2);

    let err = orders.create_order(OrderSource::Manual, order_for(3)).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientStock { requested: 3, available: 2 }));
    assert_eq!(orders.list_orders(None).unwrap().len(), 1);

    let history = rig.state.traces.traces_for_code(&c2.trace_code).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].operation, TraceOperation::Inbound);
}

#[tokio::test]
async fn timeout_on_second_item_keeps_first() {
    let rig = rig(config(), Duration::from_millis(2));
    let unit = rig.load('B', 1, 3, in_days(90)).await;
    rig.rack.script([SimOutcome::Success, SimOutcome::Hang]);
    let orders = &rig.state.orders;

    let order_no = orders.create_order(OrderSource::Manual, order_for(3)).unwrap();
    orders.process_order(&order_no).await.unwrap();

    let order = orders.get_order(&order_no).unwrap();
    assert_eq!(order.status, OrderStatus::Exception);
    assert!(order.error_message.is_some());

    let items = orders.order_items(&order_no).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].status, OrderItemStatus::Dispensed);
    assert_eq!(items[1].status, OrderItemStatus::Failed);
    assert_eq!(rig.channel_quantity("B1"), 2);

    let outbound: Vec<_> = rig
        .state
        .traces
        .traces_for_code(&unit.trace_code)
        .unwrap()
        .into_iter()
        .filter(|t| t.operation == TraceOperation::Outbound)
        .collect();
    assert_eq!(outbound.len(), 1);

    let alarms = rig.state.alarms.list_alarms(None, None).unwrap();
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].alarm_type, AlarmType::HardwareTimeout);

    // dispensed units cannot be cancelled
    assert!(matches!(
        orders.cancel_order(&order_no, None),
        Err(EngineError::InvalidOrderState { .. })
    ));

    // resume dispenses the remaining two
    orders.retry_order(&order_no, Some("op-1")).unwrap();
    orders.process_order(&order_no).await.unwrap();
    assert_eq!(orders.get_order(&order_no).unwrap().status, OrderStatus::Completed);
    let items = orders.order_items(&order_no).unwrap();
    assert_eq!(items.len(), 4);
    assert_eq!(items[1].seq, 2);
    assert_eq!(items[1].status, OrderItemStatus::Superseded);
    assert!(items[1].failure.is_some());
    assert_eq!(items.iter().filter(|i| i.status == OrderItemStatus::Dispensed).count(), 3);
    assert_eq!(items[3].seq, 4);
    assert_eq!(rig.channel_quantity("B1"), 0);
}

#[tokio::test]
async fn cancel_while_waiting_for_the_picker() {
    let rig = rig(config(), Duration::from_millis(2));
    rig.load('C', 1, 2, in_days(90)).await;
    let orders = rig.state.orders.clone();
    let order_no = orders.create_order(OrderSource::Manual, order_for(2)).unwrap();

    // maintenance holds the picker
    let lease = rig
        .state
        .locks
        .acquire(OrderPriority::Urgent, "maintenance")
        .await
        .unwrap();

    let worker = {
        let orders = orders.clone();
        let order_no = order_no.clone();
        tokio::spawn(async move { orders.process_order(&order_no).await })
    };

    tokio::time::timeout(Duration::from_secs(2), async {
        while rig.state.locks.waiting() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(orders.get_order(&order_no).unwrap().status, OrderStatus::Processing);

    assert_eq!(orders.cancel_order(&order_no, Some("nurse-1")).unwrap(), CancelOutcome::Requested);
    lease.release().await.unwrap();
    worker.await.unwrap().unwrap();

    assert_eq!(orders.get_order(&order_no).unwrap().status, OrderStatus::Cancelled);
    assert!(rig.rack.calls().is_empty());
    assert_eq!(rig.channel_quantity("C1"), 2);
}

#[tokio::test]
async fn workers_drain_the_queue() {
    let rig = rig(config(), Duration::from_millis(2));
    rig.load('D', 1, 4, in_days(90)).await;
    let mut tasks = vaccine_edge::BackgroundTasks::new();
    let _feed = rig.state.start_background_tasks(&mut tasks).await.unwrap();
    let mut events = rig.state.bus.subscribe();

    let order_no = rig
        .state
        .orders
        .create_order(OrderSource::His, CreateOrderRequest {
            source_order_id: Some("HIS-0001".into()),
            ..order_for(2)
        })
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(vaccine_edge::EngineEvent::OrderStatusChanged { order_no: no, to, .. })
                    if no == order_no && to == OrderStatus::Completed =>
                {
                    break;
                }
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event bus closed: {}", e),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(rig.channel_quantity("D1"), 2);
    let overview = rig.state.statistics.overview().unwrap();
    assert_eq!(overview.in_stock_units, 2);
    assert_eq!(overview.orders_by_status.get(&OrderStatus::Completed), Some(&1));
    tasks.shutdown().await;
}
