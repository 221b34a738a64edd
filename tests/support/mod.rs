#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedly_bridge::dispatch::CommandPublisher;
use feedly_bridge::domain::{Device, NewFeedingEvent};
use feedly_bridge::error::Result;
use feedly_bridge::store::BridgeStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoodLevelRow {
    pub device_id: Uuid,
    pub level: i32,
    pub at: DateTime<Utc>,
}

/// In-memory stand-in for the backend store. Row vectors are public so
/// tests can assert on exactly what was appended.
#[derive(Default)]
pub struct MemoryStore {
    pub devices: Mutex<Vec<Device>>,
    pub food_levels: Mutex<Vec<FoodLevelRow>>,
    pub feeding_events: Mutex<Vec<NewFeedingEvent>>,
    pub schedules: Mutex<HashSet<Uuid>>,
}

impl MemoryStore {
    pub fn with_device(hardware_id: &str, pet_id: Option<Uuid>) -> (Arc<Self>, Uuid) {
        let store = Arc::new(Self::default());
        let device_id = store.add_device(hardware_id, pet_id);
        (store, device_id)
    }

    pub fn add_device(&self, hardware_id: &str, pet_id: Option<Uuid>) -> Uuid {
        let device_id = Uuid::new_v4();
        self.devices
            .lock()
            .expect("devices lock")
            .push(Device {
                id: device_id,
                hardware_id: hardware_id.to_string(),
                pet_id,
                is_online: false,
                last_seen: None,
            });
        device_id
    }

    pub fn add_schedule(&self, schedule_id: Uuid) {
        self.schedules
            .lock()
            .expect("schedules lock")
            .insert(schedule_id);
    }

    pub fn device(&self, hardware_id: &str) -> Option<Device> {
        self.devices
            .lock()
            .expect("devices lock")
            .iter()
            .find(|device| device.hardware_id == hardware_id)
            .cloned()
    }

    pub fn food_level_rows(&self) -> Vec<FoodLevelRow> {
        self.food_levels.lock().expect("food levels lock").clone()
    }

    pub fn feeding_event_rows(&self) -> Vec<NewFeedingEvent> {
        self.feeding_events
            .lock()
            .expect("feeding events lock")
            .clone()
    }
}

#[async_trait]
impl BridgeStore for MemoryStore {
    async fn find_device_by_hardware_id(&self, hardware_id: &str) -> Result<Option<Device>> {
        Ok(self.device(hardware_id))
    }

    async fn mark_device_seen(
        &self,
        device_id: Uuid,
        online: bool,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut devices = self.devices.lock().expect("devices lock");
        if let Some(device) = devices.iter_mut().find(|device| device.id == device_id) {
            device.is_online = online;
            device.last_seen = Some(seen_at);
        }
        Ok(())
    }

    async fn append_food_level(
        &self,
        device_id: Uuid,
        level: i32,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.food_levels
            .lock()
            .expect("food levels lock")
            .push(FoodLevelRow {
                device_id,
                level,
                at,
            });
        Ok(())
    }

    async fn append_feeding_event(&self, event: NewFeedingEvent) -> Result<()> {
        self.feeding_events
            .lock()
            .expect("feeding events lock")
            .push(event);
        Ok(())
    }

    async fn schedule_exists(&self, schedule_id: Uuid) -> Result<bool> {
        Ok(self
            .schedules
            .lock()
            .expect("schedules lock")
            .contains(&schedule_id))
    }
}

/// Recording transport mock for the dispatcher.
#[derive(Default)]
pub struct MockPublisher {
    pub connected: AtomicBool,
    pub fail_publish: AtomicBool,
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MockPublisher {
    pub fn connected() -> Arc<Self> {
        let publisher = Self::default();
        publisher.connected.store(true, Ordering::SeqCst);
        Arc::new(publisher)
    }

    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published_messages(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().expect("published lock").clone()
    }
}

#[async_trait]
impl CommandPublisher for MockPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(feedly_bridge::err!("injected publish failure"));
        }

        self.published
            .lock()
            .expect("published lock")
            .push((topic.to_string(), payload));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
