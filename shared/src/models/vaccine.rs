//! Vaccine catalogue model

use serde::{Deserialize, Serialize};

/// Default cold-chain range (GSP 2–8 °C)
pub const DEFAULT_STORAGE_TEMP_MIN: f64 = 2.0;
pub const DEFAULT_STORAGE_TEMP_MAX: f64 = 8.0;

/// Vaccine entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vaccine {
    pub id: u64,
    /// Unique business code, immutable once registered
    pub code: String,
    pub name: String,
    pub common_name: Option<String>,
    pub manufacturer: String,
    pub specification: Option<String>,
    pub storage_temp_min: f64,
    pub storage_temp_max: f64,
    pub dose_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
    /// Tombstone (soft delete)
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl Vaccine {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether a reading lies inside the storage range (bounds inclusive)
    pub fn temperature_in_range(&self, temperature: f64) -> bool {
        temperature >= self.storage_temp_min && temperature <= self.storage_temp_max
    }
}

/// Create / update payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaccineInput {
    pub code: String,
    pub name: String,
    pub common_name: Option<String>,
    pub manufacturer: String,
    pub specification: Option<String>,
    pub storage_temp_min: Option<f64>,
    pub storage_temp_max: Option<f64>,
    pub dose_count: Option<u32>,
}

impl VaccineInput {
    pub fn temp_range(&self) -> (f64, f64) {
        (
            self.storage_temp_min.unwrap_or(DEFAULT_STORAGE_TEMP_MIN),
            self.storage_temp_max.unwrap_or(DEFAULT_STORAGE_TEMP_MAX),
        )
    }
}
