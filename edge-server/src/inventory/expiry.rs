//! Periodic expiry scan over in-stock units

use chrono::NaiveDate;
use dashmap::DashSet;
use shared::models::{AlarmLevel, AlarmType, NewAlarm};
use shared::util::today;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::alarms::AlarmSink;
use crate::common::EngineResult;
use crate::storage::RackStorage;

/// Raises `NearExpiry` / `Expired` alarms, at most once per unit and kind
pub struct ExpiryScanner {
    storage: RackStorage,
    alarms: Arc<dyn AlarmSink>,
    warn_days: i64,
    reported: DashSet<(u64, AlarmType)>,
}

impl ExpiryScanner {
    pub fn new(storage: RackStorage, alarms: Arc<dyn AlarmSink>, warn_days: i64) -> Self {
        Self {
            storage,
            alarms,
            warn_days,
            reported: DashSet::new(),
        }
    }

    /// One pass; returns the number of alarms raised
    pub async fn scan(&self, today: NaiveDate) -> EngineResult<usize> {
        let warn_until = today + chrono::Duration::days(self.warn_days);
        let mut raised = 0;
        for unit in self.storage.list_inventory()? {
            if !unit.is_in_stock() {
                continue;
            }
            let (alarm_type, level, message) = if unit.is_expired(today) {
                (
                    AlarmType::Expired,
                    AlarmLevel::Severe,
                    format!("batch {} ({}) expired on {}", unit.batch_no, unit.trace_code, unit.expiry_date),
                )
            } else if unit.expiry_date <= warn_until {
                (
                    AlarmType::NearExpiry,
                    AlarmLevel::Warning,
                    format!("batch {} ({}) expires on {}", unit.batch_no, unit.trace_code, unit.expiry_date),
                )
            } else {
                continue;
            };
            if !self.reported.insert((unit.id, alarm_type)) {
                continue;
            }
            self.alarms
                .raise(
                    NewAlarm::new(alarm_type, level, format!("inventory:{}", unit.id), message)
                        .with_source_id(unit.trace_code.clone()),
                )
                .await?;
            raised += 1;
        }
        if raised > 0 {
            tracing::info!(raised, "Expiry scan raised alarms");
        }
        Ok(raised)
    }

    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.scan(today()).await {
                        tracing::error!(error = %e, "Expiry scan failed");
                    }
                }
            }
        }
        tracing::info!("Expiry scanner stopped");
    }
}
