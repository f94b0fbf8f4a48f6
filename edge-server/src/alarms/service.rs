use async_trait::async_trait;
use shared::message::EngineEvent;
use shared::models::{Alarm, AlarmLevel, AlarmStatus, NewAlarm};
use shared::util::{date_stamp, now_millis};

use crate::common::{EngineError, EngineResult};
use crate::message::EventBus;
use crate::storage::{RackStorage, StorageError, counters};

/// Where alarms go
///
/// Used by the dispatch failure path, the temperature monitor and the expiry
/// scanner.
#[async_trait]
pub trait AlarmSink: Send + Sync {
    /// Persist and publish a new alarm
    async fn raise(&self, alarm: NewAlarm) -> EngineResult<Alarm>;

    /// The condition behind an alarm has cleared (publish only)
    async fn clear(&self, alarm_id: u64, source: &str) -> EngineResult<()>;
}

/// Persisted alarm ledger
#[derive(Clone)]
pub struct AlarmService {
    storage: RackStorage,
    bus: EventBus,
}

impl AlarmService {
    pub fn new(storage: RackStorage, bus: EventBus) -> Self {
        Self { storage, bus }
    }

    pub fn get(&self, id: u64) -> EngineResult<Alarm> {
        self.storage.alarm(id)?.ok_or(EngineError::AlarmNotFound(id))
    }

    /// Alarms filtered by level and status, newest first
    pub fn list_alarms(
        &self,
        level: Option<AlarmLevel>,
        status: Option<AlarmStatus>,
    ) -> EngineResult<Vec<Alarm>> {
        let mut alarms: Vec<Alarm> = self
            .storage
            .list_alarms()?
            .into_iter()
            .filter(|a| level.is_none_or(|l| a.level == l))
            .filter(|a| status.is_none_or(|s| a.status == s))
            .collect();
        alarms.sort_by(|a, b| b.alarm_time.cmp(&a.alarm_time).then(b.id.cmp(&a.id)));
        Ok(alarms)
    }

    /// Move an alarm to Handling / Handled / Ignored
    pub fn handle_alarm(
        &self,
        id: u64,
        status: AlarmStatus,
        operator: &str,
        result: Option<String>,
    ) -> EngineResult<Alarm> {
        let txn = self.storage.begin_write()?;
        let mut alarm = self
            .storage
            .alarm_txn(&txn, id)?
            .ok_or(EngineError::AlarmNotFound(id))?;
        if !alarm.status.can_transition_to(status) {
            return Err(EngineError::InvalidAlarmTransition(format!(
                "{} {:?} -> {:?}",
                alarm.alarm_code, alarm.status, status
            )));
        }
        alarm.status = status;
        alarm.handled_by = Some(operator.to_string());
        alarm.handled_at = Some(now_millis());
        if result.is_some() {
            alarm.handle_result = result;
        }
        self.storage.put_alarm(&txn, &alarm)?;
        txn.commit().map_err(StorageError::from)?;

        crate::audit_log!(operator, "handle_alarm", format!("alarm:{}", alarm.alarm_code));
        Ok(alarm)
    }

    /// Close every Open/Handling alarm as Handled; returns how many changed
    pub fn handle_all_open(&self, operator: &str, result: Option<String>) -> EngineResult<usize> {
        let txn = self.storage.begin_write()?;
        let now = now_millis();
        let mut handled = 0;
        for mut alarm in self.storage.list_alarms()? {
            if alarm.status.is_closed() {
                continue;
            }
            alarm.status = AlarmStatus::Handled;
            alarm.handled_by = Some(operator.to_string());
            alarm.handled_at = Some(now);
            alarm.handle_result = result.clone();
            self.storage.put_alarm(&txn, &alarm)?;
            handled += 1;
        }
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(operator = %operator, handled, "Batch-handled open alarms");
        Ok(handled)
    }

    pub fn open_count(&self) -> EngineResult<usize> {
        Ok(self
            .storage
            .list_alarms()?
            .iter()
            .filter(|a| !a.status.is_closed())
            .count())
    }
}

#[async_trait]
impl AlarmSink for AlarmService {
    async fn raise(&self, new_alarm: NewAlarm) -> EngineResult<Alarm> {
        let date = date_stamp();
        let txn = self.storage.begin_write()?;
        let id = self.storage.next_counter(&txn, counters::ALARM_ID)?;
        let seq = self
            .storage
            .next_counter(&txn, &counters::daily("alarm_code", &date))?;
        let alarm = Alarm {
            id,
            alarm_code: format!("ALM{}{:04}", date, seq),
            alarm_type: new_alarm.alarm_type,
            level: new_alarm.level,
            source: new_alarm.source,
            source_id: new_alarm.source_id,
            message: new_alarm.message,
            status: AlarmStatus::Open,
            handled_by: None,
            handled_at: None,
            handle_result: None,
            alarm_time: now_millis(),
        };
        self.storage.put_alarm(&txn, &alarm)?;
        txn.commit().map_err(StorageError::from)?;

        tracing::warn!(
            alarm_code = %alarm.alarm_code,
            alarm_type = ?alarm.alarm_type,
            level = ?alarm.level,
            source = %alarm.source,
            message = %alarm.message,
            "Alarm raised"
        );
        self.bus.publish(EngineEvent::AlarmRaised {
            alarm: alarm.clone(),
        });
        Ok(alarm)
    }

    async fn clear(&self, alarm_id: u64, source: &str) -> EngineResult<()> {
        tracing::info!(alarm_id, source = %source, "Alarm condition cleared");
        self.bus.publish(EngineEvent::AlarmCleared {
            alarm_id,
            source: source.to_string(),
        });
        Ok(())
    }
}
