//! MQTT connection supervision: client construction, subscription on
//! connect, fixed-interval reconnection, per-message hand-off to the
//! ingestor, publish acknowledgment tracking, and bounded graceful
//! shutdown.

use crate::config::MqttConfig;
use crate::dispatch::CommandPublisher;
use crate::error::Result;
use crate::ingest::TelemetryIngestor;
use crate::topic::subscription_filters;
use crate::transport::{sleep_with_shutdown, LinkState};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;
use uuid::Uuid;

const TARGET: &str = "bridge::mqtt";
const SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;
const EVENT_CHANNEL_CAPACITY: usize = 10;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const DISCONNECT_WAIT: Duration = Duration::from_secs(5);

/// Correlates QoS 1 publishes with their broker acknowledgments. Requests
/// enter the client's channel in FIFO order, so the packet id announced by
/// the next outgoing publish event belongs to the oldest waiter.
#[derive(Default)]
struct AckRegistry {
    queued: tokio::sync::Mutex<VecDeque<oneshot::Sender<()>>>,
    inflight: Mutex<HashMap<u16, oneshot::Sender<()>>>,
}

impl AckRegistry {
    async fn assign(&self, pkid: u16) {
        let sender = self.queued.lock().await.pop_front();
        let Some(sender) = sender else {
            return;
        };
        if pkid == 0 {
            return;
        }
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.insert(pkid, sender);
        }
    }

    fn complete(&self, pkid: u16) {
        let sender = self
            .inflight
            .lock()
            .ok()
            .and_then(|mut inflight| inflight.remove(&pkid));
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// Drops every waiter so pending publishes resolve as undelivered.
    async fn fail_all(&self) {
        self.queued.lock().await.clear();
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.clear();
        }
    }
}

/// Shared, explicitly-owned connection handle. A disabled deployment (no
/// broker URL) carries no client; every publish then fails cleanly and
/// `is_connected` stays false.
pub struct MqttLink {
    client: Option<AsyncClient>,
    connected: AtomicBool,
    state: Mutex<LinkState>,
    acks: AckRegistry,
    publish_timeout: Duration,
}

impl MqttLink {
    fn disabled() -> Self {
        Self {
            client: None,
            connected: AtomicBool::new(false),
            state: Mutex::new(LinkState::Disconnected),
            acks: AckRegistry::default(),
            publish_timeout: Duration::ZERO,
        }
    }

    fn active(client: AsyncClient, publish_timeout: Duration) -> Self {
        Self {
            client: Some(client),
            connected: AtomicBool::new(false),
            state: Mutex::new(LinkState::Connecting),
            acks: AckRegistry::default(),
            publish_timeout,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
            .lock()
            .map(|guard| *guard)
            .unwrap_or(LinkState::Disconnected)
    }

    fn set_state(&self, value: LinkState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = value;
        }
        self.connected
            .store(value == LinkState::Connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandPublisher for MqttLink {
    /// Resolves `Ok` only once the broker has acknowledged the QoS 1
    /// publish; queueing alone does not confirm delivery. Bounded by the
    /// configured publish timeout.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let Some(client) = self.client.as_ref() else {
            crate::bail_err!("mqtt bridge is disabled");
        };

        if !self.is_connected() {
            crate::bail_err!("mqtt broker not connected");
        }

        let (ack_tx, ack_rx) = oneshot::channel();

        timeout(self.publish_timeout, async {
            {
                // The lock spans queueing and waiter registration so the
                // FIFO correlation in `AckRegistry` stays aligned with the
                // client's request order.
                let mut queued = self.acks.queued.lock().await;
                client
                    .publish(topic.to_string(), SUBSCRIBE_QOS, false, payload)
                    .await
                    .map_err(|err| crate::err!("publish to `{topic}` failed: {err}"))?;
                queued.push_back(ack_tx);
            }

            ack_rx
                .await
                .map_err(|_| crate::err!("publish to `{topic}` was not acknowledged"))
        })
        .await
        .map_err(|_| {
            crate::err!(
                "publish to `{topic}` timed out after {}ms",
                self.publish_timeout.as_millis()
            )
        })?
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst)
    }
}

/// Owns the event loop task and the in-flight message handler set.
pub struct MqttSupervisor {
    link: Arc<MqttLink>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    driver: Option<JoinHandle<()>>,
}

impl MqttSupervisor {
    /// Starts the supervisor. An absent broker URL is a valid deployment
    /// mode: the bridge logs once and stays permanently disconnected.
    pub fn start(config: &MqttConfig, ingestor: Arc<TelemetryIngestor>) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        let Some(url) = config.broker_url.as_deref() else {
            tracing::warn!(
                target: TARGET,
                event = "transport_disabled",
                "broker url not configured, mqtt bridge disabled",
            );
            return Ok(Self {
                link: Arc::new(MqttLink::disabled()),
                shutdown,
                tracker,
                driver: None,
            });
        };

        let options = build_mqtt_options(url, config)?;
        let (client, eventloop) = AsyncClient::new(options, EVENT_CHANNEL_CAPACITY);
        let link = Arc::new(MqttLink::active(
            client.clone(),
            Duration::from_millis(config.publish_timeout_ms),
        ));

        let driver = tokio::spawn(drive(
            eventloop,
            client,
            Arc::clone(&link),
            ingestor,
            DriverSettings {
                namespace: config.namespace.clone(),
                reconnect_interval: Duration::from_secs(config.reconnect_interval_secs),
                connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            },
            shutdown.clone(),
            tracker.clone(),
        ));

        Ok(Self {
            link,
            shutdown,
            tracker,
            driver: Some(driver),
        })
    }

    /// The handle the dispatcher publishes through.
    pub fn link(&self) -> Arc<MqttLink> {
        Arc::clone(&self.link)
    }

    /// Stops polling, lets in-flight message handlers finish within a
    /// bounded grace period, and closes the connection. In-flight outbound
    /// sends are abandoned.
    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown.cancel();
        self.tracker.close();

        if timeout(SHUTDOWN_GRACE, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                target: TARGET,
                event = "shutdown_grace_exceeded",
                "message handlers still running after grace period",
            );
        }

        if let Some(driver) = self.driver.take() {
            if let Ok(Err(err)) = timeout(SHUTDOWN_GRACE, driver).await {
                tracing::warn!(
                    target: TARGET,
                    event = "driver_join_failed",
                    error = %err,
                );
            }
        }

        tracing::info!(target: TARGET, event = "transport_stopped");
        Ok(())
    }
}

struct DriverSettings {
    namespace: String,
    reconnect_interval: Duration,
    connect_timeout: Duration,
}

enum PollFailure {
    ConnectTimeout,
    Connection(ConnectionError),
}

/// Broker-side operations the driver issues in response to events; a seam
/// so event handling is testable without a live event loop.
#[async_trait]
trait BrokerCommands: Send + Sync {
    async fn subscribe(&self, filter: String, qos: QoS) -> Result<()>;
}

#[async_trait]
impl BrokerCommands for AsyncClient {
    async fn subscribe(&self, filter: String, qos: QoS) -> Result<()> {
        AsyncClient::subscribe(self, filter, qos)
            .await
            .map_err(|err| crate::err!("subscribe failed: {err}"))
    }
}

/// Per-event state machine of the supervisor, separated from the polling
/// loop so each transition is reachable in isolation.
struct Driver<C> {
    commands: C,
    link: Arc<MqttLink>,
    ingestor: Arc<TelemetryIngestor>,
    tracker: TaskTracker,
    namespace: String,
    reconnect_attempts: u32,
}

impl<C> Driver<C>
where
    C: BrokerCommands,
{
    /// Returns `true` when the caller should back off before polling again.
    async fn step(&mut self, polled: std::result::Result<Event, PollFailure>) -> bool {
        match polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                self.link.set_state(LinkState::Connected);
                let event = if self.reconnect_attempts > 0 {
                    "transport_reconnected"
                } else {
                    "transport_connected"
                };
                tracing::info!(target: TARGET, event = event);
                self.reconnect_attempts = 0;
                self.subscribe_all().await;
                false
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                // One task per delivery; redeliveries are not deduplicated.
                let ingestor = Arc::clone(&self.ingestor);
                let _ = self.tracker.spawn(async move {
                    ingestor
                        .handle_message(&publish.topic, &publish.payload)
                        .await;
                });
                false
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                self.link.acks.assign(pkid).await;
                false
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                self.link.acks.complete(ack.pkid);
                false
            }
            Ok(_) => false,
            Err(failure) => {
                self.link.set_state(LinkState::Reconnecting);
                self.link.acks.fail_all().await;
                self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);

                match failure {
                    PollFailure::ConnectTimeout => tracing::warn!(
                        target: TARGET,
                        event = "connect_timeout",
                        attempt = self.reconnect_attempts,
                    ),
                    PollFailure::Connection(err) => tracing::warn!(
                        target: TARGET,
                        event = "transport_error",
                        attempt = self.reconnect_attempts,
                        error = %err,
                    ),
                }

                true
            }
        }
    }

    async fn subscribe_all(&self) {
        for filter in subscription_filters(&self.namespace) {
            match self.commands.subscribe(filter.clone(), SUBSCRIBE_QOS).await {
                Ok(()) => {
                    tracing::info!(target: TARGET, event = "subscribed", filter = %filter);
                }
                Err(err) => {
                    tracing::error!(
                        target: TARGET,
                        event = "subscribe_failed",
                        filter = %filter,
                        error = %err,
                    );
                }
            }
        }
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    link: Arc<MqttLink>,
    ingestor: Arc<TelemetryIngestor>,
    settings: DriverSettings,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let mut driver = Driver {
        commands: client.clone(),
        link: Arc::clone(&link),
        ingestor,
        tracker,
        namespace: settings.namespace,
        reconnect_attempts: 0,
    };

    loop {
        let polled = tokio::select! {
            _ = shutdown.cancelled() => break,
            polled = poll_once(&mut eventloop, link.is_connected(), settings.connect_timeout) => polled,
        };

        if driver.step(polled).await
            && sleep_with_shutdown(settings.reconnect_interval, &shutdown).await
        {
            break;
        }
    }

    link.set_state(LinkState::Disconnected);
    link.acks.fail_all().await;
    if let Err(err) = timeout(DISCONNECT_WAIT, client.disconnect()).await {
        tracing::debug!(target: TARGET, event = "disconnect_timed_out", error = %err);
    }
}

/// While disconnected, a single connect attempt is bounded by the connect
/// timeout; once connected, polling waits indefinitely for traffic.
async fn poll_once(
    eventloop: &mut EventLoop,
    connected: bool,
    connect_timeout: Duration,
) -> std::result::Result<Event, PollFailure> {
    if connected {
        eventloop.poll().await.map_err(PollFailure::Connection)
    } else {
        match timeout(connect_timeout, eventloop.poll()).await {
            Ok(polled) => polled.map_err(PollFailure::Connection),
            Err(_) => Err(PollFailure::ConnectTimeout),
        }
    }
}

fn build_mqtt_options(url: &str, config: &MqttConfig) -> Result<MqttOptions> {
    let parsed = Url::parse(url)?;

    let host = parsed
        .host_str()
        .ok_or_else(|| crate::err!("mqtt url `{url}` must specify a host"))?;

    let scheme = parsed.scheme().to_ascii_lowercase();
    let default_port = match scheme.as_str() {
        "mqtt" | "tcp" => 1883,
        "mqtts" | "ssl" => 8883,
        other => crate::bail_err!("unsupported mqtt url scheme `{other}`"),
    };
    let port = parsed.port().unwrap_or(default_port);

    let client_id = config
        .client_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("feedlypet-bridge-{}", Uuid::new_v4().simple()));

    let mut options = MqttOptions::new(client_id, host, port);

    if let Some(seconds) = config.keep_alive_secs {
        options.set_keep_alive(Duration::from_secs(seconds));
    }

    if let Some(user) = config.username.as_deref() {
        let pass = config.password.as_deref().unwrap_or("");
        options.set_credentials(user, pass);
    }

    if matches!(scheme.as_str(), "mqtts" | "ssl") {
        options.set_transport(Transport::tls_with_default_config());
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MqttConfig;
    use crate::domain::{Device, NewFeedingEvent};
    use crate::store::BridgeStore;
    use chrono::{DateTime, Utc};
    use rumqttc::{ConnAck, ConnectReturnCode, PubAck, Publish};

    fn config_for(url: &str) -> MqttConfig {
        MqttConfig {
            broker_url: Some(url.to_string()),
            ..MqttConfig::default()
        }
    }

    #[test]
    fn plain_scheme_defaults_to_1883() {
        let options =
            build_mqtt_options("mqtt://broker.local", &config_for("mqtt://broker.local"))
                .expect("valid url");
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1883));
    }

    #[test]
    fn tls_scheme_defaults_to_8883() {
        let options =
            build_mqtt_options("mqtts://broker.local", &config_for("mqtts://broker.local"))
                .expect("valid url");
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 8883));
    }

    #[test]
    fn explicit_port_wins() {
        let options = build_mqtt_options(
            "mqtt://broker.local:2883",
            &config_for("mqtt://broker.local:2883"),
        )
        .expect("valid url");
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 2883));
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        assert!(build_mqtt_options("http://broker.local", &MqttConfig::default()).is_err());
    }

    #[test]
    fn generated_client_id_carries_service_prefix() {
        let options =
            build_mqtt_options("mqtt://broker.local", &config_for("mqtt://broker.local"))
                .expect("valid url");
        assert!(options.client_id().starts_with("feedlypet-bridge-"));
    }

    /// Minimal store recording device lookups, enough to observe that the
    /// driver hands deliveries to the ingestor.
    #[derive(Default)]
    struct StubStore {
        lookups: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BridgeStore for StubStore {
        async fn find_device_by_hardware_id(&self, hardware_id: &str) -> Result<Option<Device>> {
            self.lookups
                .lock()
                .expect("lookups lock")
                .push(hardware_id.to_string());
            Ok(None)
        }

        async fn mark_device_seen(
            &self,
            _device_id: uuid::Uuid,
            _online: bool,
            _seen_at: DateTime<Utc>,
        ) -> Result<()> {
            Ok(())
        }

        async fn append_food_level(
            &self,
            _device_id: uuid::Uuid,
            _level: i32,
            _at: DateTime<Utc>,
        ) -> Result<()> {
            Ok(())
        }

        async fn append_feeding_event(&self, _event: NewFeedingEvent) -> Result<()> {
            Ok(())
        }

        async fn schedule_exists(&self, _schedule_id: uuid::Uuid) -> Result<bool> {
            Ok(false)
        }
    }

    #[derive(Clone, Default)]
    struct RecordingCommands {
        filters: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingCommands {
        fn recorded(&self) -> Vec<String> {
            self.filters.lock().expect("filters lock").clone()
        }
    }

    #[async_trait]
    impl BrokerCommands for RecordingCommands {
        async fn subscribe(&self, filter: String, _qos: QoS) -> Result<()> {
            self.filters.lock().expect("filters lock").push(filter);
            Ok(())
        }
    }

    fn test_client() -> (AsyncClient, EventLoop) {
        AsyncClient::new(
            MqttOptions::new("test-client", "127.0.0.1", 1883),
            EVENT_CHANNEL_CAPACITY,
        )
    }

    fn driver_with(
        commands: RecordingCommands,
        link: Arc<MqttLink>,
        store: Arc<StubStore>,
    ) -> Driver<RecordingCommands> {
        Driver {
            commands,
            link,
            ingestor: Arc::new(TelemetryIngestor::new("feedlypet", store)),
            tracker: TaskTracker::new(),
            namespace: "feedlypet".to_string(),
            reconnect_attempts: 0,
        }
    }

    fn conn_ack() -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        }))
    }

    #[tokio::test]
    async fn conn_ack_marks_connected_and_subscribes_wildcards() {
        let (client, _eventloop) = test_client();
        let link = Arc::new(MqttLink::active(client, Duration::from_secs(1)));
        let commands = RecordingCommands::default();
        let mut driver = driver_with(
            commands.clone(),
            Arc::clone(&link),
            Arc::new(StubStore::default()),
        );

        let backoff = driver.step(Ok(conn_ack())).await;

        assert!(!backoff);
        assert_eq!(link.state(), LinkState::Connected);
        assert!(link.is_connected());
        assert_eq!(commands.recorded(), subscription_filters("feedlypet"));
    }

    #[tokio::test]
    async fn transport_errors_enter_reconnecting_and_count_attempts() {
        let (client, _eventloop) = test_client();
        let link = Arc::new(MqttLink::active(client, Duration::from_secs(1)));
        let mut driver = driver_with(
            RecordingCommands::default(),
            Arc::clone(&link),
            Arc::new(StubStore::default()),
        );

        assert!(driver.step(Err(PollFailure::ConnectTimeout)).await);
        assert_eq!(link.state(), LinkState::Reconnecting);
        assert!(!link.is_connected());
        assert_eq!(driver.reconnect_attempts, 1);

        assert!(driver.step(Err(PollFailure::ConnectTimeout)).await);
        assert_eq!(driver.reconnect_attempts, 2);
    }

    #[tokio::test]
    async fn subscriptions_resume_after_reconnect() {
        let (client, _eventloop) = test_client();
        let link = Arc::new(MqttLink::active(client, Duration::from_secs(1)));
        let commands = RecordingCommands::default();
        let mut driver = driver_with(
            commands.clone(),
            Arc::clone(&link),
            Arc::new(StubStore::default()),
        );

        driver.step(Ok(conn_ack())).await;
        driver.step(Err(PollFailure::ConnectTimeout)).await;
        driver.step(Ok(conn_ack())).await;

        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(driver.reconnect_attempts, 0);
        // The four wildcards were subscribed once per successful connect.
        assert_eq!(commands.recorded().len(), 8);
    }

    #[tokio::test]
    async fn inbound_publish_is_handed_to_the_ingestor() {
        let (client, _eventloop) = test_client();
        let link = Arc::new(MqttLink::active(client, Duration::from_secs(1)));
        let store = Arc::new(StubStore::default());
        let mut driver = driver_with(
            RecordingCommands::default(),
            Arc::clone(&link),
            Arc::clone(&store),
        );

        let publish = Publish::new(
            "feedlypet/feeder-01/status/online",
            QoS::AtLeastOnce,
            br#"{"online":true,"timestamp":"2025-01-01T00:00:00Z"}"#.to_vec(),
        );
        let backoff = driver
            .step(Ok(Event::Incoming(Packet::Publish(publish))))
            .await;
        assert!(!backoff);

        driver.tracker.close();
        driver.tracker.wait().await;
        assert_eq!(
            store.lookups.lock().expect("lookups lock").as_slice(),
            ["feeder-01"]
        );
    }

    #[tokio::test]
    async fn publish_resolves_only_after_pub_ack() {
        let (client, _eventloop) = test_client();
        let link = Arc::new(MqttLink::active(client, Duration::from_secs(5)));
        link.set_state(LinkState::Connected);
        let mut driver = driver_with(
            RecordingCommands::default(),
            Arc::clone(&link),
            Arc::new(StubStore::default()),
        );

        let publisher = Arc::clone(&link);
        let send = tokio::spawn(async move {
            publisher
                .publish("feedlypet/feeder-01/command/feed", b"{}".to_vec())
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!send.is_finished());

        driver.step(Ok(Event::Outgoing(Outgoing::Publish(1)))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            !send.is_finished(),
            "queueing alone must not confirm delivery"
        );

        driver
            .step(Ok(Event::Incoming(Packet::PubAck(PubAck::new(1)))))
            .await;
        let delivered = timeout(Duration::from_secs(1), send)
            .await
            .expect("resolves after ack")
            .expect("task completes");
        assert!(delivered.is_ok());
    }

    #[tokio::test]
    async fn unacknowledged_publish_times_out_as_undelivered() {
        let (client, _eventloop) = test_client();
        let link = Arc::new(MqttLink::active(client, Duration::from_millis(100)));
        link.set_state(LinkState::Connected);

        let result = link
            .publish("feedlypet/feeder-01/command/feed", b"{}".to_vec())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn transport_error_fails_pending_publishes() {
        let (client, _eventloop) = test_client();
        let link = Arc::new(MqttLink::active(client, Duration::from_secs(5)));
        link.set_state(LinkState::Connected);
        let mut driver = driver_with(
            RecordingCommands::default(),
            Arc::clone(&link),
            Arc::new(StubStore::default()),
        );

        let publisher = Arc::clone(&link);
        let send = tokio::spawn(async move {
            publisher
                .publish("feedlypet/feeder-01/command/feed", b"{}".to_vec())
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.step(Err(PollFailure::ConnectTimeout)).await;

        let result = timeout(Duration::from_secs(1), send)
            .await
            .expect("fails promptly, not at the publish timeout")
            .expect("task completes");
        assert!(result.is_err());
    }
}
