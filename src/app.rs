//! Application shell: wires config, store, ingestor, supervisor and
//! dispatcher together and drives the process lifecycle.

use crate::config::BridgeConfig;
use crate::dispatch::CommandDispatcher;
use crate::error::{Context, Result};
use crate::ingest::TelemetryIngestor;
use crate::store::PgBridgeStore;
use crate::transport::mqtt::MqttSupervisor;
use std::sync::Arc;

const TARGET: &str = "bridge::app";

pub struct BridgeApp {
    supervisor: MqttSupervisor,
    dispatcher: Arc<CommandDispatcher>,
}

impl BridgeApp {
    pub async fn initialise(config: BridgeConfig) -> Result<Self> {
        let store = PgBridgeStore::connect(&config.database)
            .await
            .context("database connection failed")?;
        store.ping().await?;

        let ingestor = Arc::new(TelemetryIngestor::new(
            &config.mqtt.namespace,
            Arc::new(store),
        ));
        let supervisor = MqttSupervisor::start(&config.mqtt, ingestor)?;
        let dispatcher = Arc::new(CommandDispatcher::new(
            &config.mqtt.namespace,
            supervisor.link(),
        ));

        Ok(Self {
            supervisor,
            dispatcher,
        })
    }

    /// Handle for collaborators (manual-feed and device-config flows) to
    /// issue outbound commands.
    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Runs until SIGINT, then shuts the transport down gracefully.
    pub async fn run(self) -> Result<()> {
        tracing::info!(target: TARGET, event = "bridge_started");

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;

        tracing::info!(target: TARGET, event = "shutdown_requested");
        self.supervisor.shutdown().await
    }
}
