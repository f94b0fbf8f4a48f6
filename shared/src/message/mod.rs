//! 消息总线消息类型定义
//!
//! Engine events are published in-process (broadcast) and may be relayed to
//! the monitoring UI or HIS bridge over a framed TCP link.

use serde::{Deserialize, Serialize};
use std::fmt;

use uuid::Uuid;

use crate::models::{Alarm, OrderStatus, TemperatureReading};

/// 协议版本号
pub const PROTOCOL_VERSION: u16 = 1;

/// Event category carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// 订单状态变化
    OrderStatus = 1,
    /// 单件出库
    Dispense = 2,
    /// 报警产生/解除
    Alarm = 3,
    /// 实时温度
    Temperature = 4,
    /// 设备指令/应答
    DeviceCommand = 5,
}

impl TryFrom<u8> for EventType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(EventType::OrderStatus),
            2 => Ok(EventType::Dispense),
            3 => Ok(EventType::Alarm),
            4 => Ok(EventType::Temperature),
            5 => Ok(EventType::DeviceCommand),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::OrderStatus => write!(f, "order_status"),
            EventType::Dispense => write!(f, "dispense"),
            EventType::Alarm => write!(f, "alarm"),
            EventType::Temperature => write!(f, "temperature"),
            EventType::DeviceCommand => write!(f, "device_command"),
        }
    }
}

/// Engine event (business payload)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    OrderStatusChanged {
        order_no: String,
        from: OrderStatus,
        to: OrderStatus,
        reason: Option<String>,
    },
    ItemDispensed {
        order_no: String,
        seq: u32,
        trace_code: String,
        channel_id: u64,
    },
    AlarmRaised {
        alarm: Alarm,
    },
    AlarmCleared {
        alarm_id: u64,
        source: String,
    },
    TemperatureReading {
        reading: TemperatureReading,
    },
}

impl EngineEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            EngineEvent::OrderStatusChanged { .. } => EventType::OrderStatus,
            EngineEvent::ItemDispensed { .. } => EventType::Dispense,
            EngineEvent::AlarmRaised { .. } | EngineEvent::AlarmCleared { .. } => EventType::Alarm,
            EngineEvent::TemperatureReading { .. } => EventType::Temperature,
        }
    }
}

/// 消息总线消息体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub request_id: Uuid,
    pub event_type: EventType,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(event_type: EventType, payload: Vec<u8>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            event_type,
            payload,
        }
    }

    /// Encode an engine event as JSON payload
    pub fn from_event(event: &EngineEvent) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event.event_type(), serde_json::to_vec(event)?))
    }

    /// 解析负载
    pub fn parse_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_byte_mapping() {
        for t in [
            EventType::OrderStatus,
            EventType::Dispense,
            EventType::Alarm,
            EventType::Temperature,
            EventType::DeviceCommand,
        ] {
            assert_eq!(EventType::try_from(t as u8), Ok(t));
        }
        assert!(EventType::try_from(0).is_err());
        assert!(EventType::try_from(42).is_err());
    }

    #[test]
    fn bus_message_carries_event() {
        let event = EngineEvent::OrderStatusChanged {
            order_no: "VO2026101610001".into(),
            from: OrderStatus::Pending,
            to: OrderStatus::Processing,
            reason: None,
        };
        let msg = BusMessage::from_event(&event).unwrap();
        assert_eq!(msg.event_type, EventType::OrderStatus);
        let back: EngineEvent = msg.parse_payload().unwrap();
        assert_eq!(back, event);
    }
}
