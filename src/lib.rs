//! # Pulselog
//!
//! A periodic producer/consumer pipeline over a shared record store.
//!
//! ## Core Concepts
//!
//! - **Records**: Append-only rows with a store-assigned, increasing id
//! - **Signal flag**: One atomic "new data" bit set by the producer and
//!   consumed by the consumer
//! - **Recency tracker**: The last K ids the consumer emitted; its oldest
//!   (or newest) member is the read watermark
//! - **Store**: A pooled, file-backed record log, or an in-memory store
//! - **Scheduler**: Fixed-delay jobs on worker threads with graceful stop
//!
//! ## Example
//!
//! ```ignore
//! use pulselog::{LogSink, LogStore, Pipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::load("pulselog.toml")?;
//! let store = Arc::new(LogStore::open(config.log_store_config())?);
//!
//! let report = Pipeline::new(config, store, Arc::new(LogSink))?.run(|_| {})?;
//! println!("emitted {:?}", report.consumer.map(|c| c.emitted));
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod recency;
pub mod records;
pub mod scheduler;
pub mod signal;
pub mod sink;
pub mod store;
pub mod tasks;
pub mod types;

// Re-exports
pub use config::PipelineConfig;
pub use error::{PipelineError, Result, StoreError};
pub use pipeline::{Pipeline, RunReport, RunningPipeline, ShutdownReason, StopHandle};
pub use recency::RecencyTracker;
pub use records::{RecordIndex, RecordLog};
pub use scheduler::{JobHandle, Schedule, Scheduler};
pub use signal::SignalFlag;
pub use sink::{ChannelSink, JsonLinesSink, LogSink, RecordSink};
pub use store::{LogStore, LogStoreConfig, MemoryStore, RecordStore};
pub use tasks::{ConsumePolicy, Consumer, ConsumerOutcome, ConsumerStats, PeriodicTask, Producer, ProducerOutcome, ProducerStats};
pub use types::*;
