//! Shared rig for engine-level tests

#![allow(dead_code)]

use chrono::NaiveDate;
use shared::models::{InboundRequest, InventoryUnit, Vaccine, VaccineInput};
use shared::util::today;
use std::sync::Arc;
use std::time::Duration;
use vaccine_edge::dispatch::SimulatedRack;
use vaccine_edge::lock::MemoryLock;
use vaccine_edge::{Config, EngineState, RackStorage};

pub fn config() -> Config {
    let mut c = Config::with_overrides(std::env::temp_dir().join("vaccine-edge-it").to_string_lossy());
    c.machine_id = "rack-it".into();
    c.lock_ttl_ms = 2_000;
    c.hardware_timeout_ms = 300;
    c.hardware_addr = None;
    c.worker_count = 4;
    c.max_pending_orders = 32;
    c.event_channel_capacity = 1_024;
    c.expiry_warn_days = 30;
    c.expiry_scan_interval_secs = 3_600;
    c.temp_debounce_samples = 3;
    c.sensors_per_row = 2;
    c
}

pub struct Rig {
    pub state: EngineState,
    pub rack: Arc<SimulatedRack>,
    pub vaccine: Vaccine,
}

pub fn rig(config: Config, latency: Duration) -> Rig {
    let rack = Arc::new(SimulatedRack::new(latency).with_temperature(5.1));
    let state = EngineState::with_components(
        config,
        RackStorage::open_in_memory().unwrap(),
        Arc::new(MemoryLock::new()),
        rack.clone(),
    );
    let vaccine = state
        .inventory
        .register_vaccine(VaccineInput {
            code: "V-HEPB".into(),
            name: "Hepatitis B".into(),
            common_name: Some("HepB".into()),
            manufacturer: "Acme Bio".into(),
            specification: Some("10µg/0.5ml".into()),
            storage_temp_min: Some(2.0),
            storage_temp_max: Some(8.0),
            dose_count: Some(3),
        })
        .unwrap();
    Rig { state, rack, vaccine }
}

pub fn in_days(days: i64) -> NaiveDate {
    today() + chrono::Duration::days(days)
}

impl Rig {
    /// Register channel `{row}{col}` and load it
    pub async fn load(&self, row: char, col: u32, quantity: u32, expiry: NaiveDate) -> InventoryUnit {
        let channel = self.state.inventory.register_channel(row, col, 10).unwrap();
        self.state
            .inventory
            .inbound(
                InboundRequest {
                    vaccine_id: self.vaccine.id,
                    batch_no: format!("B{}{}", row, col),
                    trace_code: None,
                    production_date: None,
                    expiry_date: expiry,
                    channel_id: channel.id,
                    quantity,
                    temperature: Some(4.6),
                    operator_id: Some("op-1".into()),
                    supplier: Some("Cold Chain Co".into()),
                },
                today(),
            )
            .await
            .unwrap()
    }

    pub fn channel_quantity(&self, position: &str) -> u32 {
        self.state
            .inventory
            .list_channels()
            .unwrap()
            .into_iter()
            .find(|c| c.position == position)
            .map(|c| c.quantity)
            .unwrap()
    }
}
