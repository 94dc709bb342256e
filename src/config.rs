//! Configuration management for the ponte bridge.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use ponte_delivery::{
    DeliveryConfig, OverflowPolicy, RetryPolicy, ShutdownDisposition, SinkConfig,
};
use ponte_ingest::MqttConfig;
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// The environment names match the original bridge deployment
/// (`MQTT_BROKER`, `MQTT_PORT`, `MQTT_TOPIC`, ...), so existing
/// deployments keep working unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Broker
    /// MQTT broker hostname or IP address.
    ///
    /// Environment variable: `MQTT_BROKER`
    #[serde(default = "default_mqtt_broker", alias = "MQTT_BROKER")]
    pub mqtt_broker: String,
    /// MQTT broker port.
    ///
    /// Environment variable: `MQTT_PORT`
    #[serde(default = "default_mqtt_port", alias = "MQTT_PORT")]
    pub mqtt_port: u16,
    /// Topic filter to subscribe to.
    ///
    /// Environment variable: `MQTT_TOPIC`
    #[serde(default = "default_mqtt_topic", alias = "MQTT_TOPIC")]
    pub mqtt_topic: String,
    /// Username for broker authentication.
    ///
    /// Environment variable: `MQTT_USERNAME`
    #[serde(default, alias = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,
    /// Password for broker authentication.
    ///
    /// Environment variable: `MQTT_PASSWORD`
    #[serde(default, alias = "MQTT_PASSWORD")]
    pub mqtt_password: Option<String>,
    /// Client identifier presented to the broker.
    ///
    /// Environment variable: `MQTT_CLIENT_ID`
    #[serde(default = "default_mqtt_client_id", alias = "MQTT_CLIENT_ID")]
    pub mqtt_client_id: String,

    // Sink
    /// Destination URL for envelope POSTs.
    ///
    /// Environment variable: `SINK_URL`
    #[serde(default = "default_sink_url", alias = "SINK_URL")]
    pub sink_url: String,
    /// HTTP request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_SECONDS`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT_SECONDS")]
    pub request_timeout_seconds: u64,

    // Queue
    /// Capacity of the bounded queue.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[serde(default = "default_queue_capacity", alias = "QUEUE_CAPACITY")]
    pub queue_capacity: usize,
    /// Overflow policy: `block` or `drop-oldest`.
    ///
    /// Environment variable: `OVERFLOW_POLICY`
    #[serde(default, alias = "OVERFLOW_POLICY")]
    pub overflow_policy: OverflowPolicy,

    // Delivery
    /// Number of concurrent delivery workers.
    ///
    /// Environment variable: `WORKER_COUNT`
    #[serde(default = "default_worker_count", alias = "WORKER_COUNT")]
    pub worker_count: usize,

    // Retry
    /// Maximum retryable failures before an envelope is dead-lettered.
    ///
    /// Environment variable: `MAX_ATTEMPTS`
    #[serde(default = "default_max_attempts", alias = "MAX_ATTEMPTS")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff in milliseconds.
    ///
    /// Environment variable: `RETRY_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms", alias = "RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: u64,
    /// Geometric growth factor applied per retry.
    ///
    /// Environment variable: `RETRY_MULTIPLIER`
    #[serde(default = "default_multiplier", alias = "RETRY_MULTIPLIER")]
    pub retry_multiplier: f64,
    /// Maximum delay between retries in milliseconds.
    ///
    /// Environment variable: `RETRY_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms", alias = "RETRY_MAX_DELAY_MS")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0, 0 disables jitter).
    ///
    /// Environment variable: `RETRY_JITTER_FACTOR`
    #[serde(default = "default_jitter_factor", alias = "RETRY_JITTER_FACTOR")]
    pub retry_jitter_factor: f64,

    // Shutdown
    /// Maximum time to wait for workers during shutdown, in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout", alias = "SHUTDOWN_TIMEOUT_SECONDS")]
    pub shutdown_timeout_seconds: u64,
    /// How interrupted envelopes are reported: `abandon` or
    /// `report-pending`.
    ///
    /// Environment variable: `SHUTDOWN_DISPOSITION`
    #[serde(default, alias = "SHUTDOWN_DISPOSITION")]
    pub shutdown_disposition: ShutdownDisposition,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, config file, and environment
    /// variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error when a source fails to parse or validation
    /// rejects the merged configuration. Configuration errors are the
    /// only failures this service treats as fatal.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to the delivery crate's configuration.
    pub fn to_delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            worker_count: self.worker_count,
            queue_capacity: self.queue_capacity,
            overflow_policy: self.overflow_policy,
            sink: self.to_sink_config(),
            retry_policy: self.to_retry_policy(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
            shutdown_disposition: self.shutdown_disposition,
        }
    }

    /// Converts to the sink client configuration.
    pub fn to_sink_config(&self) -> SinkConfig {
        SinkConfig {
            url: self.sink_url.clone(),
            timeout: Duration::from_secs(self.request_timeout_seconds),
            ..SinkConfig::default()
        }
    }

    /// Converts to the retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            multiplier: self.retry_multiplier,
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
        }
    }

    /// Converts to the MQTT subscriber configuration.
    pub fn to_mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            broker_host: self.mqtt_broker.clone(),
            broker_port: self.mqtt_port,
            topic: self.mqtt_topic.clone(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            client_id: self.mqtt_client_id.clone(),
            ..MqttConfig::default()
        }
    }

    /// Validates configuration values.
    fn validate(&self) -> Result<()> {
        let sink_url = url::Url::parse(&self.sink_url)
            .with_context(|| format!("invalid sink URL: {}", self.sink_url))?;
        if !matches!(sink_url.scheme(), "http" | "https") {
            anyhow::bail!("sink URL must use http or https, got {}", sink_url.scheme());
        }

        if self.mqtt_port == 0 {
            anyhow::bail!("mqtt_port must be greater than 0");
        }

        if self.mqtt_username.is_some() != self.mqtt_password.is_some() {
            anyhow::bail!("mqtt_username and mqtt_password must be set together");
        }

        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be greater than 0");
        }

        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be greater than 0");
        }

        if self.retry_multiplier < 1.0 {
            anyhow::bail!("retry_multiplier must be at least 1.0");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if self.request_timeout_seconds == 0 {
            anyhow::bail!("request_timeout_seconds must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt_broker: default_mqtt_broker(),
            mqtt_port: default_mqtt_port(),
            mqtt_topic: default_mqtt_topic(),
            mqtt_username: None,
            mqtt_password: None,
            mqtt_client_id: default_mqtt_client_id(),
            sink_url: default_sink_url(),
            request_timeout_seconds: default_request_timeout(),
            queue_capacity: default_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            worker_count: default_worker_count(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_multiplier: default_multiplier(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: default_jitter_factor(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            shutdown_disposition: ShutdownDisposition::default(),
            rust_log: default_log_level(),
        }
    }
}

fn default_mqtt_broker() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "data/sensor".to_string()
}

fn default_mqtt_client_id() -> String {
    "ponte-bridge".to_string()
}

fn default_sink_url() -> String {
    "http://localhost:8080/ingest".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    256
}

fn default_worker_count() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60000
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, sync::Mutex};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        vars: Vec<String>,
        originals: HashMap<String, Option<String>>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, vars: Vec::new(), originals: HashMap::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            if !self.vars.contains(&key.to_string()) {
                self.originals.insert(key.to_string(), env::var(key).ok());
                self.vars.push(key.to_string());
            }
            env::set_var(key, value);
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for var in &self.vars {
                match self.originals.get(var) {
                    Some(Some(value)) => env::set_var(var, value),
                    Some(None) => env::remove_var(var),
                    None => {},
                }
            }
        }
    }

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.mqtt_broker, "localhost");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.mqtt_topic, "data/sensor");
        assert_eq!(config.overflow_policy, OverflowPolicy::Block);
    }

    #[test]
    fn env_overrides_take_priority() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("MQTT_BROKER", "broker.example.com");
        guard.set_var("MQTT_PORT", "8883");
        guard.set_var("MQTT_TOPIC", "factory/line1");
        guard.set_var("MQTT_CLIENT_ID", "bridge-7");
        guard.set_var("SINK_URL", "https://sink.example.com/events");
        guard.set_var("QUEUE_CAPACITY", "64");
        guard.set_var("OVERFLOW_POLICY", "drop-oldest");
        guard.set_var("MAX_ATTEMPTS", "8");
        guard.set_var("RETRY_BASE_DELAY_MS", "250");
        guard.set_var("RETRY_MAX_DELAY_MS", "120000");
        guard.set_var("WORKER_COUNT", "4");

        let config = Config::load().expect("config should load with env overrides");

        assert_eq!(config.mqtt_broker, "broker.example.com");
        assert_eq!(config.mqtt_port, 8883);
        assert_eq!(config.mqtt_topic, "factory/line1");
        assert_eq!(config.sink_url, "https://sink.example.com/events");
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.max_attempts, 8);
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn conversions_carry_all_retry_settings() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("MAX_ATTEMPTS", "7");
        guard.set_var("RETRY_BASE_DELAY_MS", "500");
        guard.set_var("RETRY_MULTIPLIER", "3.0");
        guard.set_var("RETRY_MAX_DELAY_MS", "90000");
        guard.set_var("RETRY_JITTER_FACTOR", "0.0");
        guard.set_var("REQUEST_TIMEOUT_SECONDS", "10");

        let config = Config::load().expect("config should load");
        let policy = config.to_retry_policy();

        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.multiplier, 3.0);
        assert_eq!(policy.max_delay, Duration::from_millis(90000));
        assert_eq!(policy.jitter_factor, 0.0);

        let sink = config.to_sink_config();
        assert_eq!(sink.timeout, Duration::from_secs(10));

        let delivery = config.to_delivery_config();
        assert_eq!(delivery.retry_policy, policy);
    }

    #[test]
    fn mqtt_credentials_flow_into_subscriber_config() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("MQTT_USERNAME", "bridge");
        guard.set_var("MQTT_PASSWORD", "hunter2");

        let config = Config::load().expect("config should load");
        let mqtt = config.to_mqtt_config();

        assert_eq!(mqtt.username.as_deref(), Some("bridge"));
        assert_eq!(mqtt.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn invalid_config_validation_fails() {
        let mut config = Config::default();
        config.sink_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config = Config::default();
        config.sink_url = "ftp://example.com/drop".to_string();
        assert!(config.validate().is_err());

        config = Config::default();
        config.queue_capacity = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.worker_count = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.max_attempts = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.retry_multiplier = 0.5;
        assert!(config.validate().is_err());

        config = Config::default();
        config.retry_jitter_factor = 1.5;
        assert!(config.validate().is_err());

        config = Config::default();
        config.mqtt_username = Some("user".to_string());
        assert!(config.validate().is_err());
    }
}
