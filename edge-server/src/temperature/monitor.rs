//! Debounced breach detection per sensor
//!
//! A breach sample bumps the sensor's consecutive counter; an in-range sample
//! resets it. One alarm is raised when the counter reaches the debounce
//! threshold and nothing more until the breach clears.

use rand::Rng;
use shared::message::EngineEvent;
use shared::models::{
    AlarmLevel, AlarmType, DEFAULT_STORAGE_TEMP_MAX, DEFAULT_STORAGE_TEMP_MIN, NewAlarm,
    TemperatureReading, TemperatureSample,
};
use shared::util::now_millis;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::{LiveReadings, classify, intersect_ranges};
use crate::alarms::AlarmSink;
use crate::common::EngineResult;
use crate::core::Config;
use crate::message::EventBus;
use crate::storage::RackStorage;

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub debounce_samples: u32,
    pub warn_margin: f64,
    pub critical_breach: Duration,
    pub sensors_per_row: u16,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce_samples: config.temp_debounce_samples.max(1),
            warn_margin: config.temp_warn_margin,
            critical_breach: Duration::from_secs(config.temp_critical_breach_secs),
            sensors_per_row: config.sensors_per_row.max(1),
        }
    }

    /// Rack row watched by a sensor
    pub fn row_of(&self, sensor_id: u16) -> char {
        let offset = u32::from(sensor_id / self.sensors_per_row);
        char::from_u32('A' as u32 + offset).unwrap_or('?')
    }
}

#[derive(Debug, Default)]
struct SensorState {
    last_timestamp: Option<i64>,
    consecutive: u32,
    breach_started: Option<i64>,
    open_alarm: Option<u64>,
}

pub struct TemperatureMonitor {
    storage: RackStorage,
    alarms: Arc<dyn AlarmSink>,
    bus: EventBus,
    readings: LiveReadings,
    settings: MonitorSettings,
    sensors: Mutex<HashMap<u16, SensorState>>,
}

impl TemperatureMonitor {
    pub fn new(
        storage: RackStorage,
        alarms: Arc<dyn AlarmSink>,
        bus: EventBus,
        readings: LiveReadings,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            storage,
            alarms,
            bus,
            readings,
            settings,
            sensors: Mutex::new(HashMap::new()),
        }
    }

    /// Effective storage range of a row
    ///
    /// Intersection of the ranges of vaccines bound in the row; the default
    /// cold-chain range when the row is empty or the ranges do not overlap.
    pub fn row_range(&self, row: char) -> EngineResult<(f64, f64)> {
        let mut ranges = Vec::new();
        for channel in self.storage.list_channels()? {
            if channel.row != row {
                continue;
            }
            if let Some(vaccine_id) = channel.vaccine_id
                && let Some(vaccine) = self.storage.vaccine(vaccine_id)?
                && !vaccine.is_deleted()
            {
                ranges.push((vaccine.storage_temp_min, vaccine.storage_temp_max));
            }
        }
        let default = (DEFAULT_STORAGE_TEMP_MIN, DEFAULT_STORAGE_TEMP_MAX);
        if ranges.is_empty() {
            return Ok(default);
        }
        Ok(intersect_ranges(ranges).unwrap_or_else(|| {
            tracing::warn!(row = %row, "Storage ranges in row do not overlap, using default");
            default
        }))
    }

    /// Process one sample; `None` for a replayed or out-of-order sample
    pub async fn process_sample(
        &self,
        sample: TemperatureSample,
    ) -> EngineResult<Option<TemperatureReading>> {
        let mut sensors = self.sensors.lock().await;
        let state = sensors.entry(sample.sensor_id).or_default();
        if state.last_timestamp.is_some_and(|t| sample.timestamp <= t) {
            tracing::trace!(sensor_id = sample.sensor_id, timestamp = sample.timestamp, "Sample already processed");
            return Ok(None);
        }
        // a failed raise below must not let a redelivery count this sample twice
        state.last_timestamp = Some(sample.timestamp);

        let row = self.settings.row_of(sample.sensor_id);
        let range = self.row_range(row)?;
        let status = classify(sample.temperature, range, self.settings.warn_margin);
        let reading = TemperatureReading {
            sensor_id: sample.sensor_id,
            row,
            temperature: sample.temperature,
            status,
            timestamp: sample.timestamp,
        };

        let source = format!("sensor:{}", sample.sensor_id);
        if status.is_breach() {
            state.consecutive += 1;
            let started = *state.breach_started.get_or_insert(sample.timestamp);
            if state.consecutive >= self.settings.debounce_samples && state.open_alarm.is_none() {
                let level = self.breach_level(sample.temperature, range, sample.timestamp - started);
                let alarm = self
                    .alarms
                    .raise(
                        NewAlarm::new(
                            AlarmType::TemperatureBreach,
                            level,
                            source,
                            format!(
                                "row {} at {:.1}°C outside {:.1}–{:.1}°C for {} samples",
                                row, sample.temperature, range.0, range.1, state.consecutive
                            ),
                        )
                        .with_source_id(format!("row:{}", row)),
                    )
                    .await?;
                state.open_alarm = Some(alarm.id);
            }
        } else {
            state.consecutive = 0;
            state.breach_started = None;
            if let Some(alarm_id) = state.open_alarm.take() {
                self.alarms.clear(alarm_id, &source).await?;
            }
        }
        drop(sensors);

        self.readings.update(reading);
        self.bus.publish(EngineEvent::TemperatureReading { reading });
        Ok(Some(reading))
    }

    /// Level by how far outside the range, Critical once the breach lasts
    fn breach_level(&self, temperature: f64, (min, max): (f64, f64), elapsed_ms: i64) -> AlarmLevel {
        if elapsed_ms >= self.settings.critical_breach.as_millis() as i64 {
            return AlarmLevel::Critical;
        }
        let magnitude = if temperature < min {
            min - temperature
        } else {
            temperature - max
        };
        match magnitude {
            m if m < 1.0 => AlarmLevel::Warning,
            m if m < 3.0 => AlarmLevel::Severe,
            _ => AlarmLevel::Critical,
        }
    }

    /// Consume the sensor feed until shutdown or the feed closes
    pub async fn run(
        self: Arc<Self>,
        mut feed: mpsc::Receiver<TemperatureSample>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("Temperature monitor started");
        loop {
            let sample = tokio::select! {
                _ = shutdown.cancelled() => break,
                sample = feed.recv() => match sample {
                    Some(s) => s,
                    None => break,
                },
            };
            if let Err(e) = self.process_sample(sample).await {
                tracing::error!(sensor_id = sample.sensor_id, error = %e, "Temperature sample failed");
            }
        }
        tracing::info!("Temperature monitor stopped");
    }
}

/// Synthetic feed around 5 °C for racks without a sensor bus
pub async fn simulate_sensors(
    feed: mpsc::Sender<TemperatureSample>,
    sensor_count: u16,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let timestamp = now_millis();
        let samples: Vec<TemperatureSample> = {
            let mut rng = rand::thread_rng();
            (0..sensor_count)
                .map(|sensor_id| TemperatureSample {
                    sensor_id,
                    temperature: 5.0 + rng.gen_range(-0.8..0.8),
                    timestamp,
                })
                .collect()
        };
        for sample in samples {
            if feed.send(sample).await.is_err() {
                return;
            }
        }
    }
}
