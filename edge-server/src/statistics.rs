//! Dashboard overview

use serde::Serialize;
use shared::models::{AlarmLevel, ChannelStatus, OrderStatus};
use std::collections::HashMap;

use crate::common::EngineResult;
use crate::storage::RackStorage;

/// Point-in-time counts across the engine's ledgers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Overview {
    pub orders_by_status: HashMap<OrderStatus, usize>,
    pub open_alarms_by_level: HashMap<AlarmLevel, usize>,
    /// Summed quantity of in-stock rows
    pub in_stock_units: u32,
    pub channels_by_status: HashMap<ChannelStatus, usize>,
}

#[derive(Clone)]
pub struct StatisticsService {
    storage: RackStorage,
}

impl StatisticsService {
    pub fn new(storage: RackStorage) -> Self {
        Self { storage }
    }

    pub fn overview(&self) -> EngineResult<Overview> {
        let mut overview = Overview::default();
        for order in self.storage.list_orders()?.iter().filter(|o| !o.is_deleted()) {
            *overview.orders_by_status.entry(order.status).or_default() += 1;
        }
        for alarm in self.storage.list_alarms()?.iter().filter(|a| !a.status.is_closed()) {
            *overview.open_alarms_by_level.entry(alarm.level).or_default() += 1;
        }
        overview.in_stock_units = self
            .storage
            .list_inventory()?
            .iter()
            .filter(|u| u.is_in_stock())
            .map(|u| u.quantity)
            .sum();
        for channel in self.storage.list_channels()? {
            *overview.channels_by_status.entry(channel.status).or_default() += 1;
        }
        Ok(overview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{AlarmStatus, AlarmType, Alarm};

    #[test]
    fn counts_open_alarms_only() {
        let storage = RackStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        for (id, status) in [(1, AlarmStatus::Open), (2, AlarmStatus::Handled), (3, AlarmStatus::Handling)] {
            storage
                .put_alarm(
                    &txn,
                    &Alarm {
                        id,
                        alarm_code: format!("ALM{}", id),
                        alarm_type: AlarmType::HardwareTimeout,
                        level: AlarmLevel::Severe,
                        source: "order:VO1".into(),
                        source_id: None,
                        message: "timeout".into(),
                        status,
                        handled_by: None,
                        handled_at: None,
                        handle_result: None,
                        alarm_time: id as i64,
                    },
                )
                .unwrap();
        }
        txn.commit().unwrap();

        let overview = StatisticsService::new(storage).overview().unwrap();
        assert_eq!(overview.open_alarms_by_level.get(&AlarmLevel::Severe), Some(&2));
        assert!(overview.orders_by_status.is_empty());
        assert_eq!(overview.in_stock_units, 0);
    }
}
