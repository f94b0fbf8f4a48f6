//! Alarm ledger model

use serde::{Deserialize, Serialize};

/// Severity, ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmLevel {
    Info,
    Warning,
    Severe,
    Critical,
}

/// Handling status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmStatus {
    Open,
    Handling,
    Handled,
    Ignored,
}

impl AlarmStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, AlarmStatus::Handled | AlarmStatus::Ignored)
    }

    pub fn can_transition_to(&self, next: AlarmStatus) -> bool {
        use AlarmStatus::*;
        matches!(
            (self, next),
            (Open, Handling) | (Open, Handled) | (Open, Ignored) | (Handling, Handled) | (Handling, Ignored)
        )
    }
}

/// Alarm kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmType {
    TemperatureBreach,
    HardwareTimeout,
    DispenseFailed,
    VisionRejected,
    ChannelUnavailable,
    LockTimeout,
    NearExpiry,
    Expired,
}

/// Persisted alarm; only status and handled fields change after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: u64,
    pub alarm_code: String,
    pub alarm_type: AlarmType,
    pub level: AlarmLevel,
    pub source: String,
    pub source_id: Option<String>,
    pub message: String,
    pub status: AlarmStatus,
    pub handled_by: Option<String>,
    pub handled_at: Option<i64>,
    pub handle_result: Option<String>,
    pub alarm_time: i64,
}

/// Alarm creation input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlarm {
    pub alarm_type: AlarmType,
    pub level: AlarmLevel,
    pub source: String,
    pub source_id: Option<String>,
    pub message: String,
}

impl NewAlarm {
    pub fn new(
        alarm_type: AlarmType,
        level: AlarmLevel,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alarm_type,
            level,
            source: source.into(),
            source_id: None,
            message: message.into(),
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}
