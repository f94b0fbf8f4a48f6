//! Rack channel model

use serde::{Deserialize, Serialize};

/// Channel status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Normal,
    Faulted,
    Disabled,
}

/// Physical dispensing slot
///
/// `quantity` always equals the summed quantity of the in-stock units bound
/// to the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: u64,
    /// Row letter + column number, e.g. `A1`
    pub position: String,
    pub row: char,
    pub col: u32,
    pub vaccine_id: Option<u64>,
    pub capacity: u32,
    pub quantity: u32,
    pub status: ChannelStatus,
    /// Optimistic concurrency version, bumped on every write
    pub version: u64,
    pub last_outbound: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Channel {
    pub fn position_of(row: char, col: u32) -> String {
        format!("{}{}", row, col)
    }

    /// Normal and holding stock
    pub fn is_dispensable(&self) -> bool {
        self.status == ChannelStatus::Normal && self.quantity > 0
    }

    pub fn free_capacity(&self) -> u32 {
        self.capacity.saturating_sub(self.quantity)
    }

    /// Binding may only change while the channel is empty
    pub fn can_hold(&self, vaccine_id: u64) -> bool {
        match self.vaccine_id {
            Some(bound) => bound == vaccine_id || self.quantity == 0,
            None => true,
        }
    }
}
