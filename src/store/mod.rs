//! Record store adapters.
//!
//! [`RecordStore`] is the contract the pipeline tasks program against: an
//! ordered, auto-incrementing, append-only log. Two adapters ship with the
//! crate:
//!
//! - [`LogStore`]: file-backed log reached through a [`ConnectionPool`] of
//!   file handles.
//! - [`MemoryStore`]: in-process log with access counters and failure
//!   injection.

mod log_store;
mod memory;
pub mod pool;

pub use log_store::{LogStore, LogStoreConfig};
pub use memory::MemoryStore;
pub use pool::{ConnectionPool, ManageConnection, PoolConfig, PoolStats, PooledConnection};

use crate::error::Result;
use crate::types::{Record, RecordId};

/// Default bound on payload length, in bytes.
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 255;

/// An ordered append-only record log.
///
/// Implementations must be safe to call from the producer and the consumer
/// concurrently; each call holds whatever connection it needs only for its
/// own duration.
pub trait RecordStore: Send + Sync {
    /// Create the backing log if it does not exist yet. Idempotent.
    fn ensure_schema(&self) -> Result<()>;

    /// Append a record and return the id the store assigned to it.
    fn append(&self, payload: &str) -> Result<RecordId>;

    /// Up to `limit` records with id strictly greater than `watermark`,
    /// ascending.
    fn read_after(&self, watermark: RecordId, limit: usize) -> Result<Vec<Record>>;

    /// Release pooled connections. Later operations fail. Idempotent.
    fn close(&self);
}
