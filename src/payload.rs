//! Wire payload models. Field names match the device firmware contract
//! exactly; unknown extra fields are ignored, missing required fields fail
//! decoding.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("malformed payload: {0}")]
pub struct MalformedPayload(#[from] serde_json::Error);

/// Decodes a payload with drop-on-failure semantics. Callers log the
/// returned error and discard the message, never abort.
pub fn decode<'de, T>(raw: &'de [u8]) -> Result<T, MalformedPayload>
where
    T: Deserialize<'de>,
{
    serde_json::from_slice(raw).map_err(MalformedPayload)
}

/// `status/online` body. `food_level` piggybacks a sample on the heartbeat.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusPayload {
    pub online: bool,
    #[serde(default)]
    pub food_level: Option<i32>,
    #[serde(default)]
    pub wifi_signal: Option<i32>,
    #[serde(default)]
    pub uptime: Option<i64>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    pub timestamp: String,
}

/// `status/food` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodLevelPayload {
    pub device_id: String,
    pub level: i32,
    pub timestamp: String,
}

/// `event/feeding` body. `feeding_type` stays a raw tag here; mapping to the
/// domain enum happens at ingestion.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedingEventPayload {
    pub device_id: String,
    pub portion_size: i32,
    pub success: bool,
    #[serde(rename = "type")]
    pub feeding_type: String,
    #[serde(default)]
    pub schedule_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub timestamp: String,
}

/// `error/*` body. Logged only, never persisted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceErrorPayload {
    pub device_id: String,
    pub error_code: String,
    pub error_message: String,
    pub timestamp: String,
}

/// Outbound `command/feed` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedCommandPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub portion_size: i32,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<Uuid>,
}

impl FeedCommandPayload {
    pub fn new(portion_size: i32, timestamp: String, schedule_id: Option<Uuid>) -> Self {
        Self {
            kind: "feed",
            portion_size,
            timestamp,
            schedule_id,
        }
    }
}

/// Outbound `command/config` body. Sparse: absent fields are left untouched
/// at the device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigCommandPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servo_speed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food_level_check_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_portion_size: Option<u32>,
}
