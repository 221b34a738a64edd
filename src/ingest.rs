//! Inbound telemetry processing. Each message is an independent
//! transaction: every failure is logged and drops that single message,
//! never the ingestion loop.

use crate::domain::{Device, FeedingType, NewFeedingEvent};
use crate::payload::{
    self, DeviceErrorPayload, DeviceStatusPayload, FeedingEventPayload, FoodLevelPayload,
};
use crate::store::BridgeStore;
use crate::topic::{InboundRoute, TopicPath};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

const TARGET: &str = "bridge::telemetry";

pub struct TelemetryIngestor {
    namespace: String,
    store: Arc<dyn BridgeStore>,
}

impl TelemetryIngestor {
    pub fn new(namespace: impl Into<String>, store: Arc<dyn BridgeStore>) -> Self {
        Self {
            namespace: namespace.into(),
            store,
        }
    }

    /// Entry point for every delivered message. Never returns an error;
    /// duplicates from at-least-once delivery are not filtered here.
    pub async fn handle_message(&self, topic: &str, raw: &[u8]) {
        let Some(path) = TopicPath::parse(&self.namespace, topic) else {
            tracing::debug!(target: TARGET, event = "topic_not_applicable", topic = %topic);
            return;
        };

        let Some(route) = path.route() else {
            tracing::debug!(target: TARGET, event = "topic_unrecognized", topic = %topic);
            return;
        };

        let hardware_id = path.hardware_id;
        let outcome = match route {
            InboundRoute::DeviceStatus => self.handle_device_status(hardware_id, raw).await,
            InboundRoute::FoodLevel => self.handle_food_level(hardware_id, raw).await,
            InboundRoute::FeedingEvent => self.handle_feeding_event(hardware_id, raw).await,
            InboundRoute::DeviceError => self.handle_device_error(hardware_id, raw),
        };

        if let Err(err) = outcome {
            tracing::warn!(
                target: TARGET,
                event = "message_dropped",
                topic = %topic,
                hardware_id = %hardware_id,
                error = %err,
            );
        }
    }

    async fn handle_device_status(&self, hardware_id: &str, raw: &[u8]) -> crate::error::Result<()> {
        let Some(payload) = self.decode_or_warn::<DeviceStatusPayload>(hardware_id, raw) else {
            return Ok(());
        };
        let Some(device) = self.resolve_device(hardware_id).await? else {
            return Ok(());
        };

        self.store
            .mark_device_seen(device.id, payload.online, Utc::now())
            .await?;

        tracing::info!(
            target: TARGET,
            event = "device_status_updated",
            hardware_id = %hardware_id,
            online = payload.online,
        );

        // Diagnostics are accepted but not persisted; each field is logged
        // whenever present, independently of the others.
        if payload.wifi_signal.is_some()
            || payload.uptime.is_some()
            || payload.firmware_version.is_some()
        {
            tracing::debug!(
                target: TARGET,
                event = "device_diagnostics",
                hardware_id = %hardware_id,
                wifi_signal = payload.wifi_signal,
                uptime = payload.uptime,
                firmware = payload.firmware_version.as_deref(),
            );
        }

        if let Some(level) = payload.food_level {
            self.record_food_level(&device, level).await?;
        }

        Ok(())
    }

    async fn handle_food_level(&self, hardware_id: &str, raw: &[u8]) -> crate::error::Result<()> {
        let Some(payload) = self.decode_or_warn::<FoodLevelPayload>(hardware_id, raw) else {
            return Ok(());
        };
        let Some(device) = self.resolve_device(hardware_id).await? else {
            return Ok(());
        };

        self.record_food_level(&device, payload.level).await
    }

    async fn handle_feeding_event(&self, hardware_id: &str, raw: &[u8]) -> crate::error::Result<()> {
        let Some(payload) = self.decode_or_warn::<FeedingEventPayload>(hardware_id, raw) else {
            return Ok(());
        };
        let Some(device) = self.resolve_device(hardware_id).await? else {
            return Ok(());
        };

        let timestamp = match DateTime::parse_from_rfc3339(&payload.timestamp) {
            Ok(parsed) => parsed.with_timezone(&Utc),
            Err(_) => {
                tracing::warn!(
                    target: TARGET,
                    event = "invalid_timestamp",
                    hardware_id = %hardware_id,
                    timestamp = %payload.timestamp,
                );
                return Ok(());
            }
        };

        let schedule_id = self
            .resolve_schedule(hardware_id, payload.schedule_id.as_deref())
            .await?;

        let event = NewFeedingEvent {
            device_id: device.id,
            pet_id: device.pet_id,
            schedule_id,
            portion_size: payload.portion_size,
            feeding_type: FeedingType::from_tag(&payload.feeding_type),
            success: payload.success,
            error_message: payload.error_message,
            timestamp,
        };

        self.store.append_feeding_event(event).await?;

        tracing::info!(
            target: TARGET,
            event = "feeding_event_recorded",
            hardware_id = %hardware_id,
            portion_size = payload.portion_size,
            success = payload.success,
        );

        Ok(())
    }

    fn handle_device_error(&self, hardware_id: &str, raw: &[u8]) -> crate::error::Result<()> {
        let Some(payload) = self.decode_or_warn::<DeviceErrorPayload>(hardware_id, raw) else {
            return Ok(());
        };

        tracing::error!(
            target: TARGET,
            event = "device_fault",
            hardware_id = %hardware_id,
            error_code = %payload.error_code,
            error_message = %payload.error_message,
        );

        Ok(())
    }

    /// Level snapshots are always timestamped at ingestion, not with the
    /// device-reported time.
    async fn record_food_level(&self, device: &Device, level: i32) -> crate::error::Result<()> {
        self.store
            .append_food_level(device.id, level, Utc::now())
            .await?;

        tracing::info!(
            target: TARGET,
            event = "food_level_recorded",
            hardware_id = %device.hardware_id,
            level = level,
        );

        Ok(())
    }

    /// Best-effort schedule correlation: a malformed or unknown id nulls
    /// the reference instead of rejecting the feeding event.
    async fn resolve_schedule(
        &self,
        hardware_id: &str,
        raw_id: Option<&str>,
    ) -> crate::error::Result<Option<Uuid>> {
        let Some(raw_id) = raw_id else {
            return Ok(None);
        };

        let Some(schedule_id) = parse_uuid_strict(raw_id) else {
            tracing::warn!(
                target: TARGET,
                event = "invalid_schedule_id",
                hardware_id = %hardware_id,
                schedule_id = %raw_id,
            );
            return Ok(None);
        };

        if self.store.schedule_exists(schedule_id).await? {
            Ok(Some(schedule_id))
        } else {
            tracing::warn!(
                target: TARGET,
                event = "schedule_not_found",
                hardware_id = %hardware_id,
                schedule_id = %schedule_id,
            );
            Ok(None)
        }
    }

    async fn resolve_device(&self, hardware_id: &str) -> crate::error::Result<Option<Device>> {
        let device = self.store.find_device_by_hardware_id(hardware_id).await?;
        if device.is_none() {
            tracing::warn!(
                target: TARGET,
                event = "unknown_device",
                hardware_id = %hardware_id,
            );
        }

        Ok(device)
    }

    fn decode_or_warn<'de, T>(&self, hardware_id: &str, raw: &'de [u8]) -> Option<T>
    where
        T: serde::Deserialize<'de>,
    {
        match payload::decode(raw) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                tracing::warn!(
                    target: TARGET,
                    event = "malformed_payload",
                    hardware_id = %hardware_id,
                    error = %err,
                );
                None
            }
        }
    }
}

/// Accepts only the canonical hyphenated UUID form devices are expected to
/// echo back; `uuid`'s parser alone also admits simple and urn forms.
fn parse_uuid_strict(raw: &str) -> Option<Uuid> {
    if raw.len() != 36 {
        return None;
    }

    Uuid::try_parse(raw).ok()
}
