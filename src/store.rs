//! Persistence seam for the bridge. `BridgeStore` is the narrow interface
//! the ingestor and application need; `PgBridgeStore` is the PostgreSQL
//! implementation backed by the backend's existing schema.

use crate::config::DatabaseConfig;
use crate::domain::{Device, NewFeedingEvent};
use crate::error::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait BridgeStore: Send + Sync {
    /// Looks up a device by its self-reported hardware identifier.
    async fn find_device_by_hardware_id(&self, hardware_id: &str) -> Result<Option<Device>>;

    /// Sets the online flag and last-seen timestamp in one atomic write.
    /// Idempotent; concurrent updates to the same device degrade to
    /// last-write-wins.
    async fn mark_device_seen(
        &self,
        device_id: Uuid,
        online: bool,
        seen_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Appends a food-level sample timestamped at ingestion.
    async fn append_food_level(
        &self,
        device_id: Uuid,
        level: i32,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Appends a device-reported feeding outcome.
    async fn append_feeding_event(&self, event: NewFeedingEvent) -> Result<()>;

    /// Existence check only; callers validate the UUID shape first so
    /// malformed ids never reach the store.
    async fn schedule_exists(&self, schedule_id: Uuid) -> Result<bool>;
}

#[derive(Clone)]
pub struct PgBridgeStore {
    pool: PgPool,
}

impl PgBridgeStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let max_conn = config.max_connections.unwrap_or(5);
        let timeout = config.acquire_timeout_secs.unwrap_or(5);

        let pool = PgPoolOptions::new()
            .max_connections(max_conn)
            .acquire_timeout(Duration::from_secs(timeout))
            .connect(&config.url)
            .await
            .with_context(|| format!("failed to connect to {}", config.url))?;

        Ok(Self { pool })
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("database ping failed")?;

        Ok(())
    }
}

#[async_trait]
impl BridgeStore for PgBridgeStore {
    async fn find_device_by_hardware_id(&self, hardware_id: &str) -> Result<Option<Device>> {
        let row = sqlx::query(
            "SELECT id, device_id, pet_id, is_online, last_seen \
             FROM devices WHERE device_id = $1",
        )
        .bind(hardware_id)
        .fetch_optional(&self.pool)
        .await
        .context("device lookup failed")?;

        match row {
            Some(row) => Ok(Some(Device {
                id: row.try_get("id")?,
                hardware_id: row.try_get("device_id")?,
                pet_id: row.try_get("pet_id")?,
                is_online: row.try_get("is_online")?,
                last_seen: row.try_get("last_seen")?,
            })),
            None => Ok(None),
        }
    }

    async fn mark_device_seen(
        &self,
        device_id: Uuid,
        online: bool,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE devices SET is_online = $2, last_seen = $3 WHERE id = $1")
            .bind(device_id)
            .bind(online)
            .bind(seen_at)
            .execute(&self.pool)
            .await
            .context("device status update failed")?;

        Ok(())
    }

    async fn append_food_level(
        &self,
        device_id: Uuid,
        level: i32,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO food_levels (device_id, level, timestamp) VALUES ($1, $2, $3)")
            .bind(device_id)
            .bind(level)
            .bind(at)
            .execute(&self.pool)
            .await
            .context("food level insert failed")?;

        Ok(())
    }

    async fn append_feeding_event(&self, event: NewFeedingEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO feeding_events \
             (device_id, pet_id, schedule_id, portion_size, type, success, error_message, timestamp) \
             VALUES ($1, $2, $3, $4, $5::feeding_events_type_enum, $6, $7, $8)",
        )
        .bind(event.device_id)
        .bind(event.pet_id)
        .bind(event.schedule_id)
        .bind(event.portion_size)
        .bind(event.feeding_type.as_str())
        .bind(event.success)
        .bind(event.error_message)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .context("feeding event insert failed")?;

        Ok(())
    }

    async fn schedule_exists(&self, schedule_id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM schedules WHERE id = $1) AS present")
            .bind(schedule_id)
            .fetch_one(&self.pool)
            .await
            .context("schedule lookup failed")?;

        Ok(row.try_get("present")?)
    }
}
