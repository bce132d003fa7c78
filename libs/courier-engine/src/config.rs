use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::consumer::{ConsumerSettings, RedeliveryPolicy};
use crate::error::EngineError;
use crate::producer::DEFAULT_PUBLISH_ATTEMPTS;

// ---- TOML Config ----

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CourierConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    /// In-process topics. Lost on exit; only useful within one process.
    Memory,
    /// Append-only topic files under the first broker address.
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Memory,
    File,
}

impl FromStr for BrokerKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BrokerKind::Memory),
            "file" => Ok(BrokerKind::File),
            other => Err(EngineError::Config(format!("unknown broker kind '{other}'"))),
        }
    }
}

impl FromStr for StorageKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "file" => Ok(StorageKind::File),
            other => Err(EngineError::Config(format!("unknown storage kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_kind")]
    pub kind: BrokerKind,
    /// Broker addresses. The file broker uses the first entry as its directory.
    #[serde(default = "default_addresses")]
    pub addresses: Vec<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,
    /// How often the file broker checks for new records.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    #[serde(default = "default_backoff_ms")]
    pub read_error_backoff_ms: u64,
    #[serde(default = "default_backoff_ms")]
    pub persist_error_backoff_ms: u64,
    #[serde(default)]
    pub redelivery: RedeliveryPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_storage_kind")]
    pub kind: StorageKind,
    #[serde(default = "default_storage_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleConfig {
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_broker_kind() -> BrokerKind {
    BrokerKind::File
}
fn default_addresses() -> Vec<String> {
    vec!["./data/topics".to_string()]
}
fn default_topic() -> String {
    "messages".to_string()
}
fn default_group() -> String {
    "courier".to_string()
}
fn default_publish_attempts() -> u32 {
    DEFAULT_PUBLISH_ATTEMPTS
}
fn default_poll_interval_ms() -> u64 {
    200
}
fn default_backoff_ms() -> u64 {
    5000
}
fn default_storage_kind() -> StorageKind {
    StorageKind::File
}
fn default_storage_path() -> String {
    "./data/messages".to_string()
}
fn default_grace_period_ms() -> u64 {
    5000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: default_broker_kind(),
            addresses: default_addresses(),
            topic: default_topic(),
            group: default_group(),
            publish_attempts: default_publish_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            read_error_backoff_ms: default_backoff_ms(),
            persist_error_backoff_ms: default_backoff_ms(),
            redelivery: RedeliveryPolicy::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: default_storage_kind(),
            path: default_storage_path(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl CourierConfig {
    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| e.with_context(format!("'{}'", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(EngineError::Config(format!("read '{}': {e}", path.display()))),
        }
    }

    pub fn parse(content: &str) -> Result<Self, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Config(format!("parse: {e}")))
    }

    /// Apply `COURIER_*` overrides. `lookup` is `std::env::var(..).ok()` in
    /// production and a map in tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("COURIER_BROKERS") {
            self.broker.addresses = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("COURIER_BROKER") {
            self.broker.kind = v.parse()?;
        }
        if let Some(v) = lookup("COURIER_TOPIC") {
            self.broker.topic = v;
        }
        if let Some(v) = lookup("COURIER_GROUP") {
            self.broker.group = v;
        }
        if let Some(v) = lookup("COURIER_STORAGE") {
            self.storage.kind = v.parse()?;
        }
        if let Some(v) = lookup("COURIER_STORAGE_PATH") {
            self.storage.path = v;
        }
        Ok(())
    }

    /// Load `path`, apply process environment overrides and validate.
    pub fn from_sources(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let mut config = Self::load(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.broker.topic.trim().is_empty() {
            return Err(EngineError::Config("broker.topic must not be empty".into()));
        }
        if self.broker.group.trim().is_empty() {
            return Err(EngineError::Config("broker.group must not be empty".into()));
        }
        if self.broker.publish_attempts == 0 {
            return Err(EngineError::Config("broker.publish_attempts must be >= 1".into()));
        }
        if self.broker.poll_interval_ms == 0 {
            return Err(EngineError::Config("broker.poll_interval_ms must be >= 1".into()));
        }
        if self.broker.kind == BrokerKind::File && self.broker.addresses.is_empty() {
            return Err(EngineError::Config(
                "broker.addresses must name a directory for the file broker".into(),
            ));
        }
        if self.storage.kind == StorageKind::File && self.storage.path.trim().is_empty() {
            return Err(EngineError::Config("storage.path must not be empty for the file store".into()));
        }
        Ok(())
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            read_error_backoff: Duration::from_millis(self.consumer.read_error_backoff_ms),
            persist_error_backoff: Duration::from_millis(self.consumer.persist_error_backoff_ms),
            redelivery: self.consumer.redelivery,
            ..ConsumerSettings::new(&self.broker.topic, &self.broker.group)
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.lifecycle.grace_period_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.broker.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_document_gives_defaults() {
        let config = CourierConfig::parse("").unwrap();
        assert_eq!(config.broker.topic, "messages");
        assert_eq!(config.broker.publish_attempts, 3);
        assert_eq!(config.consumer.read_error_backoff_ms, 5000);
        assert_eq!(config.consumer.redelivery, RedeliveryPolicy::Reprocess);
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        config.validate().unwrap();
    }

    #[test]
    fn parses_all_sections() {
        let config = CourierConfig::parse(
            r#"
            [broker]
            kind = "memory"
            addresses = ["a", "b"]
            topic = "orders"
            group = "g1"
            publish_attempts = 5
            poll_interval_ms = 50

            [consumer]
            read_error_backoff_ms = 100
            persist_error_backoff_ms = 200
            redelivery = "skip_processed"

            [storage]
            kind = "memory"

            [lifecycle]
            grace_period_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.broker.kind, BrokerKind::Memory);
        assert_eq!(config.broker.addresses, vec!["a", "b"]);
        assert_eq!(config.storage.kind, StorageKind::Memory);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));

        let settings = config.consumer_settings();
        assert_eq!(settings.topic, "orders");
        assert_eq!(settings.group, "g1");
        assert_eq!(settings.read_error_backoff, Duration::from_millis(100));
        assert_eq!(settings.persist_error_backoff, Duration::from_millis(200));
        assert_eq!(settings.redelivery, RedeliveryPolicy::SkipProcessed);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = CourierConfig::parse("[broker]\ntopics = \"x\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = CourierConfig::default();
        config
            .apply_env(env(&[
                ("COURIER_BROKERS", "/tmp/t1, /tmp/t2,"),
                ("COURIER_TOPIC", "events"),
                ("COURIER_GROUP", "workers"),
                ("COURIER_STORAGE", "Memory"),
                ("COURIER_STORAGE_PATH", "/var/lib/courier"),
                ("COURIER_BROKER", "memory"),
            ]))
            .unwrap();

        assert_eq!(config.broker.addresses, vec!["/tmp/t1", "/tmp/t2"]);
        assert_eq!(config.broker.topic, "events");
        assert_eq!(config.broker.group, "workers");
        assert_eq!(config.broker.kind, BrokerKind::Memory);
        assert_eq!(config.storage.kind, StorageKind::Memory);
        assert_eq!(config.storage.path, "/var/lib/courier");
    }

    #[test]
    fn bad_env_kind_is_a_config_error() {
        let mut config = CourierConfig::default();
        let err = config.apply_env(env(&[("COURIER_STORAGE", "postgres")])).unwrap_err();
        assert!(err.to_string().contains("postgres"));
    }

    #[test]
    fn validation_rules() {
        let mut config = CourierConfig::default();
        config.broker.topic = " ".into();
        assert!(config.validate().is_err());

        let mut config = CourierConfig::default();
        config.broker.group.clear();
        assert!(config.validate().is_err());

        let mut config = CourierConfig::default();
        config.broker.publish_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = CourierConfig::default();
        config.broker.addresses.clear();
        assert!(config.validate().is_err());
        config.broker.kind = BrokerKind::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut config = CourierConfig::default();
        config.broker.poll_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));

        config.broker.poll_interval_ms = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn shipped_sample_config_is_valid() {
        let config = CourierConfig::parse(include_str!("../../../courier.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.broker.kind, BrokerKind::File);
        assert_eq!(config.storage.kind, StorageKind::File);
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = CourierConfig::load("/nonexistent/courier.toml").unwrap();
        assert_eq!(config.broker.group, "courier");
    }
}
