//! Pipeline configuration.
//!
//! Loaded once at startup from a TOML file; every field has a default, so an
//! empty file (or no file) is a valid configuration.
//!
//! ```toml
//! [store]
//! path = "./pulselog-store"
//! pool_size = 4
//!
//! [producer]
//! period_ms = 3000
//! payload = "a new message"
//!
//! [consumer]
//! period_ms = 1000
//! batch_limit = 1
//! recency_capacity = 1
//! policy = "dedup"
//!
//! [run]
//! multiplier_ms = 5000   # run for batch_limit * multiplier_ms
//! ```

use crate::error::PipelineError;
use crate::store::{LogStoreConfig, DEFAULT_MAX_PAYLOAD_LEN};
use crate::tasks::ConsumePolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub store: StoreSettings,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
    pub run: RunSettings,
}

/// Where and how records are stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    /// Directory of the log store.
    pub path: PathBuf,

    /// Keep records in memory instead of on disk.
    pub in_memory: bool,

    pub pool_size: usize,
    pub acquire_timeout_ms: u64,

    /// Sync the log to disk every N appends.
    pub sync_interval: u64,

    pub max_payload_len: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./pulselog-store"),
            in_memory: false,
            pool_size: 4,
            acquire_timeout_ms: 5_000,
            sync_interval: 1,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProducerSettings {
    pub period_ms: u64,
    pub initial_delay_ms: u64,
    pub payload: String,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            period_ms: 3_000,
            initial_delay_ms: 0,
            payload: "a new message".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerSettings {
    pub period_ms: u64,
    pub initial_delay_ms: u64,

    /// Most records emitted per round.
    pub batch_limit: usize,

    /// How many recently seen ids the consumer remembers.
    pub recency_capacity: usize,

    pub policy: ConsumePolicy,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            period_ms: 1_000,
            initial_delay_ms: 0,
            batch_limit: 1,
            recency_capacity: 1,
            policy: ConsumePolicy::Dedup,
        }
    }
}

/// How long the pipeline runs before shutting itself down.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSettings {
    /// Explicit run length. `0` runs until stopped. When unset the run lasts
    /// `batch_limit * multiplier_ms`.
    pub duration_ms: Option<u64>,

    pub multiplier_ms: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            duration_ms: None,
            multiplier_ms: 5_000,
        }
    }
}

impl PipelineConfig {
    /// Read and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), PipelineError> {
        fn invalid(msg: impl Into<String>) -> Result<(), PipelineError> {
            Err(PipelineError::Config(msg.into()))
        }

        if self.store.pool_size == 0 {
            return invalid("store.pool_size must be at least 1");
        }
        if self.producer.period_ms == 0 {
            return invalid("producer.period_ms must be positive");
        }
        if self.consumer.period_ms == 0 {
            return invalid("consumer.period_ms must be positive");
        }
        if self.consumer.period_ms >= self.producer.period_ms {
            return invalid(format!(
                "consumer.period_ms ({}) must be shorter than producer.period_ms ({})",
                self.consumer.period_ms, self.producer.period_ms
            ));
        }
        if self.consumer.batch_limit == 0 {
            return invalid("consumer.batch_limit must be at least 1");
        }
        if self.consumer.recency_capacity == 0 {
            return invalid("consumer.recency_capacity must be at least 1");
        }
        if self.producer.payload.len() > self.store.max_payload_len {
            return invalid(format!(
                "producer.payload is {} bytes, store.max_payload_len is {}",
                self.producer.payload.len(),
                self.store.max_payload_len
            ));
        }
        Ok(())
    }

    /// Run length, or `None` to run until stopped.
    pub fn run_duration(&self) -> Option<Duration> {
        let ms = match self.run.duration_ms {
            Some(0) => return None,
            Some(ms) => ms,
            None => (self.consumer.batch_limit as u64).saturating_mul(self.run.multiplier_ms),
        };
        Some(Duration::from_millis(ms))
    }

    pub fn producer_period(&self) -> Duration {
        Duration::from_millis(self.producer.period_ms)
    }

    pub fn producer_initial_delay(&self) -> Duration {
        Duration::from_millis(self.producer.initial_delay_ms)
    }

    pub fn consumer_period(&self) -> Duration {
        Duration::from_millis(self.consumer.period_ms)
    }

    pub fn consumer_initial_delay(&self) -> Duration {
        Duration::from_millis(self.consumer.initial_delay_ms)
    }

    /// Recency capacity as a `NonZeroUsize` (1 if misconfigured as 0).
    pub fn recency_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.consumer.recency_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Settings for opening a [`crate::store::LogStore`].
    pub fn log_store_config(&self) -> LogStoreConfig {
        LogStoreConfig {
            path: self.store.path.clone(),
            create_if_missing: true,
            pool_size: self.store.pool_size,
            acquire_timeout: Duration::from_millis(self.store.acquire_timeout_ms),
            sync_interval: self.store.sync_interval,
            max_payload_len: self.store.max_payload_len,
        }
    }
}
