//! Domain records the bridge reads and appends. The relational schema
//! itself belongs to the backend; the bridge only touches the columns
//! named here.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A registered feeder, correlated by its self-reported hardware id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Internal identifier used by foreign keys.
    pub id: Uuid,
    /// The device's stable self-reported identifier, unique per fleet.
    pub hardware_id: String,
    pub pet_id: Option<Uuid>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedingType {
    Automatic,
    Manual,
}

impl FeedingType {
    /// Maps the wire tag onto the domain enum. Anything that is not
    /// literally `automatic` counts as manual, matching observed device
    /// behavior.
    pub fn from_tag(tag: &str) -> Self {
        if tag == "automatic" {
            FeedingType::Automatic
        } else {
            FeedingType::Manual
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedingType::Automatic => "automatic",
            FeedingType::Manual => "manual",
        }
    }
}

/// An append-only feeding outcome row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFeedingEvent {
    pub device_id: Uuid,
    pub pet_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub portion_size: i32,
    pub feeding_type: FeedingType,
    pub success: bool,
    pub error_message: Option<String>,
    /// Device-reported time of the feeding, not ingestion time.
    pub timestamp: DateTime<Utc>,
}
