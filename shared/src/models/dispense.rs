//! Hardware/vision collaborator contract

use serde::{Deserialize, Serialize};

/// Command sent to the rack controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispenseRequest {
    pub channel_id: u64,
    pub position: String,
    pub trace_code: String,
    pub timeout_ms: u64,
}

/// Controller answer after mechanical dispense + vision check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispenseResponse {
    pub success: bool,
    pub failure_reason: Option<String>,
    /// Set when the failure came from the vision station
    #[serde(default)]
    pub vision_rejected: bool,
    pub vision_image_ref: Option<String>,
    pub measured_temperature: Option<f64>,
}

impl DispenseResponse {
    pub fn ok(image_ref: impl Into<String>, temperature: Option<f64>) -> Self {
        Self {
            success: true,
            failure_reason: None,
            vision_rejected: false,
            vision_image_ref: Some(image_ref.into()),
            measured_temperature: temperature,
        }
    }

    pub fn mechanical_failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            failure_reason: Some(reason.into()),
            vision_rejected: false,
            vision_image_ref: None,
            measured_temperature: None,
        }
    }

    pub fn vision_rejected(reason: impl Into<String>, image_ref: Option<String>) -> Self {
        Self {
            success: false,
            failure_reason: Some(reason.into()),
            vision_rejected: true,
            vision_image_ref: image_ref,
            measured_temperature: None,
        }
    }
}
