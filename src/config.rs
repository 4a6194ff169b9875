//! Pipeline configuration.
//!
//! Sources are merged in order of increasing precedence:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `PIPELINE_`, nested keys separated
//!    by `__` (e.g. `PIPELINE_CONSUMER__BATCH_SIZE=200`)

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trending::WeightTable;

pub const DEFAULT_TOPIC: &str = "interactions.events";
pub const DEFAULT_DEAD_LETTER_TOPIC: &str = "interactions.events.dlq";
pub const ENV_PREFIX: &str = "PIPELINE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Topic interaction events are relayed to.
    pub topic: String,
    pub dead_letter_topic: String,
    pub consumer_group: String,
    /// Partitions per topic for the in-memory transport.
    pub partitions: u32,
    pub consumer: ConsumerConfig,
    pub relay: RelayConfig,
    pub trending: TrendingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            dead_letter_topic: DEFAULT_DEAD_LETTER_TOPIC.to_string(),
            consumer_group: "interactions-group".to_string(),
            partitions: 4,
            consumer: ConsumerConfig::default(),
            relay: RelayConfig::default(),
            trending: TrendingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Buffered events that force a flush before the pull window is exhausted.
    pub batch_size: usize,
    /// Longest time buffered deltas may wait before a flush.
    pub flush_interval_ms: u64,
    pub poll_timeout_ms: u64,
    /// Upper bound on messages returned by one pull.
    pub max_poll_records: usize,
    /// Pause before retrying after a failed cycle.
    pub retry_backoff_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_ms: 5_000,
            poll_timeout_ms: 100,
            max_poll_records: 500,
            retry_backoff_ms: 250,
        }
    }
}

impl ConsumerConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    /// Failed attempts after which a record goes to the dead-letter topic.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// How long relayed records are kept for auditing.
    pub retention_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_ms: 1_000,
            max_retries: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 60_000,
            retention_secs: 30 * 24 * 60 * 60,
        }
    }
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendingConfig {
    /// Window name to retention, in seconds.
    pub windows: BTreeMap<String, u64>,
    pub weights: WeightTable,
}

impl Default for TrendingConfig {
    fn default() -> Self {
        let mut windows = BTreeMap::new();
        windows.insert("24h".to_string(), 24 * 60 * 60);
        windows.insert("7d".to_string(), 7 * 24 * 60 * 60);
        Self {
            windows,
            weights: WeightTable::default(),
        }
    }
}

impl TrendingConfig {
    pub fn window_retentions(&self) -> BTreeMap<String, Duration> {
        self.windows
            .iter()
            .map(|(name, secs)| (name.clone(), Duration::from_secs(*secs)))
            .collect()
    }
}

impl PipelineConfig {
    /// Load defaults, then `path` (if given), then `PIPELINE_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&PipelineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: PipelineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() || self.dead_letter_topic.trim().is_empty() {
            return Err(ConfigError::Invalid("topics must not be empty".into()));
        }
        if self.topic == self.dead_letter_topic {
            return Err(ConfigError::Invalid(
                "dead-letter topic must differ from the interaction topic".into(),
            ));
        }
        if self.partitions == 0 {
            return Err(ConfigError::Invalid("partitions must be at least 1".into()));
        }
        if self.consumer.batch_size == 0 || self.consumer.max_poll_records == 0 {
            return Err(ConfigError::Invalid("consumer batch sizes must be at least 1".into()));
        }
        if self.relay.batch_size == 0 {
            return Err(ConfigError::Invalid("relay batch size must be at least 1".into()));
        }
        if self.trending.windows.is_empty() {
            return Err(ConfigError::Invalid("at least one trending window is required".into()));
        }
        if let Some((name, _)) = self.trending.windows.iter().find(|(_, secs)| **secs == 0) {
            return Err(ConfigError::Invalid(format!(
                "trending window {name} needs a non-zero retention"
            )));
        }
        Ok(())
    }
}
