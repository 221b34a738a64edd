//! Outbound command path. The dispatcher builds command payloads and
//! reports delivery as a plain boolean; it never persists state and never
//! surfaces transport faults as errors to its callers.

use crate::error::Result;
use crate::payload::{ConfigCommandPayload, FeedCommandPayload};
use crate::topic::{command_topic, CommandKind};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use uuid::Uuid;

const TARGET: &str = "bridge::dispatch";

/// Transport seam for outbound publishes. Implemented by the supervisor's
/// connection handle and mocked in tests.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Publishes at-least-once and resolves only once the broker has
    /// acknowledged the message, within a bounded wait.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    fn is_connected(&self) -> bool;
}

pub struct CommandDispatcher {
    namespace: String,
    publisher: Arc<dyn CommandPublisher>,
}

impl CommandDispatcher {
    pub fn new(namespace: impl Into<String>, publisher: Arc<dyn CommandPublisher>) -> Self {
        Self {
            namespace: namespace.into(),
            publisher,
        }
    }

    /// `true` means the command was confirmed sent; `false` means the
    /// caller must treat the command as unconfirmed and record the feeding
    /// attempt with its own semantics.
    pub async fn send_feed_command(
        &self,
        hardware_id: &str,
        portion_size: i32,
        schedule_id: Option<Uuid>,
    ) -> bool {
        let payload = FeedCommandPayload::new(
            portion_size,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            schedule_id,
        );

        let delivered = self
            .send_command(hardware_id, CommandKind::Feed, &payload)
            .await;

        if delivered {
            tracing::info!(
                target: TARGET,
                event = "feed_command_sent",
                hardware_id = %hardware_id,
                portion_size = portion_size,
            );
        }

        delivered
    }

    /// Sparse reconfiguration; absent fields are left untouched at the
    /// device. Same delivery contract as `send_feed_command`.
    pub async fn send_config_command(
        &self,
        hardware_id: &str,
        config: &ConfigCommandPayload,
    ) -> bool {
        let delivered = self
            .send_command(hardware_id, CommandKind::Config, config)
            .await;

        if delivered {
            tracing::info!(
                target: TARGET,
                event = "config_command_sent",
                hardware_id = %hardware_id,
            );
        }

        delivered
    }

    /// Optimization for callers wanting to short-circuit; sends stay safe
    /// to attempt while disconnected either way.
    pub fn is_connected(&self) -> bool {
        self.publisher.is_connected()
    }

    async fn send_command<T>(&self, hardware_id: &str, kind: CommandKind, payload: &T) -> bool
    where
        T: serde::Serialize,
    {
        if !self.publisher.is_connected() {
            tracing::warn!(
                target: TARGET,
                event = "publisher_offline",
                hardware_id = %hardware_id,
                command = %kind,
            );
            return false;
        }

        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(
                    target: TARGET,
                    event = "command_encode_failed",
                    hardware_id = %hardware_id,
                    command = %kind,
                    error = %err,
                );
                return false;
            }
        };

        let topic = command_topic(&self.namespace, hardware_id, kind);
        match self.publisher.publish(&topic, bytes).await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(
                    target: TARGET,
                    event = "command_publish_failed",
                    hardware_id = %hardware_id,
                    command = %kind,
                    error = %err,
                );
                false
            }
        }
    }
}
