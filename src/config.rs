use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Absent URL puts the bridge into disabled mode rather than failing startup.
    #[serde(default)]
    pub broker_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub keep_alive_secs: Option<u64>,
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: None,
            username: None,
            password: None,
            client_id: None,
            namespace: default_namespace(),
            keep_alive_secs: None,
            reconnect_interval_secs: default_reconnect_interval(),
            connect_timeout_secs: default_connect_timeout(),
            publish_timeout_ms: default_publish_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub acquire_timeout_secs: Option<u64>,
}

fn default_namespace() -> String {
    "feedlypet".to_string()
}

const fn default_reconnect_interval() -> u64 {
    5
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_publish_timeout() -> u64 {
    10_000
}

impl BridgeConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("FEEDLY").separator("__"))
            .build()?
            .try_deserialize()
    }
}
