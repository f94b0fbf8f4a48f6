//! Temperature sensor feed model

use serde::{Deserialize, Serialize};

/// Raw sample from the sensor feed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSample {
    pub sensor_id: u16,
    pub temperature: f64,
    /// Unix millis; `(sensor_id, timestamp)` identifies a sample
    pub timestamp: i64,
}

/// Classification of a reading against a storage range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemperatureStatus {
    Normal,
    WarnLow,
    WarnHigh,
    AlarmLow,
    AlarmHigh,
}

impl TemperatureStatus {
    pub fn is_breach(&self) -> bool {
        matches!(self, TemperatureStatus::AlarmLow | TemperatureStatus::AlarmHigh)
    }
}

/// Processed live reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    pub sensor_id: u16,
    pub row: char,
    pub temperature: f64,
    pub status: TemperatureStatus,
    pub timestamp: i64,
}
