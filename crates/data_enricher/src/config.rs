use common::registry::RedisMode;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // MQTT configuration
    /// Broker host; also accepts `mqtt://host:port` style addresses
    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,

    /// Used when `mqtt_host` carries no port
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,

    /// Empty means anonymous
    #[serde(default)]
    pub mqtt_username: String,

    #[serde(default)]
    pub mqtt_password: String,

    #[serde(default)]
    pub mqtt_tls: bool,

    /// Base client id; the ingress and publisher connections append a suffix
    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,

    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,

    /// Topic filter the ingress subscribes to
    #[serde(default = "default_subscription_topic")]
    pub subscription_topic: String,

    /// Enriched messages go to `{publish_topic_base}/{site_code}/{device_id}`
    #[serde(default = "default_publish_topic_base")]
    pub publish_topic_base: String,

    #[serde(default = "default_mqtt_retry_delay_secs")]
    pub mqtt_retry_delay_secs: u64,

    #[serde(default = "default_mqtt_max_retry_attempts")]
    pub mqtt_max_retry_attempts: u32,

    // Registry configuration
    /// Redis connection URL (redis:// or rediss://); in cluster mode a
    /// comma-separated list of seed nodes
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Use the Redis Cluster protocol
    #[serde(default)]
    pub redis_cluster: bool,

    // Pipeline configuration
    /// Dispatch queue capacity; messages beyond it are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Only messages whose registry record carries this data model are
    /// published. Empty disables the filter.
    #[serde(default)]
    pub expected_data_model: String,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // OpenTelemetry configuration
    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Enable OpenTelemetry export
    #[serde(default)]
    pub otel_enabled: bool,

    /// Service name for OpenTelemetry resource
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

// MQTT defaults
fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_client_id() -> String {
    "data-enricher".to_string()
}

fn default_mqtt_keep_alive_secs() -> u64 {
    30
}

fn default_subscription_topic() -> String {
    "FCTS/INGRESS/ENRICH".to_string()
}

fn default_publish_topic_base() -> String {
    "FCTS/ENRICHED/geokonapi".to_string()
}

fn default_mqtt_retry_delay_secs() -> u64 {
    5
}

fn default_mqtt_max_retry_attempts() -> u32 {
    10
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_queue_capacity() -> usize {
    100
}

fn default_startup_timeout_secs() -> u64 {
    30
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "data-enricher".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("ENRICHER"))
            .build()?
            .try_deserialize()
    }

    pub fn mqtt_username(&self) -> Option<String> {
        non_empty(&self.mqtt_username)
    }

    pub fn mqtt_password(&self) -> Option<String> {
        (!self.mqtt_password.is_empty()).then(|| self.mqtt_password.clone())
    }

    pub fn redis_mode(&self) -> RedisMode {
        if self.redis_cluster {
            RedisMode::Cluster
        } else {
            RedisMode::Standalone
        }
    }

    pub fn expected_data_model(&self) -> Option<String> {
        non_empty(&self.expected_data_model)
    }

    /// Copy safe to log
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.mqtt_password.is_empty() {
            config.mqtt_password = "***".to_string();
        }
        config
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
