//! File-backed record store.

use super::pool::{ConnectionPool, ManageConnection, PoolConfig, PoolStats};
use super::{RecordStore, DEFAULT_MAX_PAYLOAD_LEN};
use crate::error::{Result, StoreError};
use crate::records::RecordLog;
use crate::types::{Record, RecordId};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"PLS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const MANIFEST_FILE: &str = "MANIFEST";
const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "records.log";

/// Store configuration.
#[derive(Clone, Debug)]
pub struct LogStoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Maximum number of open file handles.
    pub pool_size: usize,

    /// How long an operation waits for a free handle.
    pub acquire_timeout: Duration,

    /// Sync to disk every N appends.
    pub sync_interval: u64,

    /// Longest accepted payload, in bytes.
    pub max_payload_len: usize,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./pulselog-store"),
            create_if_missing: true,
            pool_size: 4,
            acquire_timeout: Duration::from_secs(5),
            sync_interval: RecordLog::DEFAULT_SYNC_INTERVAL,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

/// One pooled handle on the log file.
///
/// Each connection is a separate open of the file, so each has its own
/// cursor.
pub struct LogConnection {
    file: File,
}

/// Opens [`LogConnection`]s for the pool.
pub struct LogConnector {
    path: PathBuf,
}

impl ManageConnection for LogConnector {
    type Connection = LogConnection;

    fn connect(&self) -> Result<LogConnection> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        Ok(LogConnection { file })
    }
}

/// Record store persisted as an append-only log file in a directory.
///
/// Layout:
/// - `MANIFEST`: format magic and version, written by `ensure_schema`
/// - `LOCK`: exclusively locked while the store is open
/// - `records.log`: checksummed record frames
pub struct LogStore {
    config: LogStoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    pool: ConnectionPool<LogConnector>,

    /// Set once the schema is ensured.
    log: RwLock<Option<RecordLog>>,
}

impl LogStore {
    /// Open the store directory and take its lock. The pool is created but no
    /// file handle is opened until the first operation.
    pub fn open(config: LogStoreConfig) -> Result<Self> {
        if !config.path.exists() {
            if config.create_if_missing {
                fs::create_dir_all(&config.path)?;
            } else {
                return Err(StoreError::NotInitialized);
            }
        }

        let lock_file = Self::acquire_lock(&config.path)?;

        let pool = ConnectionPool::new(
            LogConnector {
                path: config.path.join(LOG_FILE),
            },
            PoolConfig {
                max_size: config.pool_size,
                acquire_timeout: config.acquire_timeout,
            },
        );

        tracing::debug!(path = %config.path.display(), pool_size = config.pool_size, "log store opened");

        Ok(Self {
            config,
            _lock_file: lock_file,
            pool,
            log: RwLock::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Number of records in the log, or 0 before the schema is ensured.
    pub fn record_count(&self) -> usize {
        self.log.read().as_ref().map_or(0, RecordLog::len)
    }

    /// Force pending appends to disk.
    pub fn sync(&self) -> Result<()> {
        let guard = self.log.read();
        let log = guard.as_ref().ok_or(StoreError::NotInitialized)?;
        let mut conn = self.pool.get()?;
        log.sync(&mut conn.file)
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        let manifest_path = path.join(MANIFEST_FILE);
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let manifest_path = path.join(MANIFEST_FILE);
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join(LOCK_FILE);
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl RecordStore for LogStore {
    fn ensure_schema(&self) -> Result<()> {
        let mut slot = self.log.write();
        if slot.is_some() {
            return Ok(());
        }

        let path = &self.config.path;
        if path.join(MANIFEST_FILE).exists() {
            Self::verify_manifest(path)?;
        } else if path.join(LOG_FILE).exists() {
            return Err(StoreError::InvalidFormat(format!(
                "{} exists without a {}",
                LOG_FILE, MANIFEST_FILE
            )));
        } else {
            Self::write_manifest(path)?;
            tracing::info!(path = %path.display(), "created record log");
        }

        let mut conn = self.pool.get()?;
        let log = RecordLog::open(path.join(LOG_FILE), &mut conn.file, self.config.sync_interval)?;
        tracing::debug!(records = log.len(), last_id = %log.last_id(), "record log loaded");

        *slot = Some(log);
        Ok(())
    }

    fn append(&self, payload: &str) -> Result<RecordId> {
        if payload.len() > self.config.max_payload_len {
            return Err(StoreError::PayloadTooLong {
                len: payload.len(),
                max: self.config.max_payload_len,
            });
        }

        let guard = self.log.read();
        let log = guard.as_ref().ok_or(StoreError::NotInitialized)?;
        let mut conn = self.pool.get()?;
        let (record, _offset) = log.append(&mut conn.file, payload)?;
        Ok(record.id)
    }

    fn read_after(&self, watermark: RecordId, limit: usize) -> Result<Vec<Record>> {
        let guard = self.log.read();
        let log = guard.as_ref().ok_or(StoreError::NotInitialized)?;
        let mut conn = self.pool.get()?;
        log.read_after(&mut conn.file, watermark, limit)
    }

    fn close(&self) {
        if self.pool.is_closed() {
            return;
        }

        if let Err(e) = self.sync() {
            if !matches!(e, StoreError::NotInitialized) {
                tracing::warn!(error = %e, "failed to sync record log on close");
            }
        }

        self.pool.close();
        tracing::debug!(path = %self.config.path.display(), "log store closed");
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> LogStoreConfig {
        LogStoreConfig {
            path: dir.path().join("store"),
            pool_size: 2,
            acquire_timeout: Duration::from_millis(100),
            ..Default::default()
        }
    }

    fn open_ready(config: LogStoreConfig) -> LogStore {
        let store = LogStore::open(config).unwrap();
        store.ensure_schema().unwrap();
        store
    }

    #[test]
    fn test_ensure_schema_creates_files() {
        let dir = TempDir::new().unwrap();
        let store = open_ready(test_config(&dir));

        assert!(store.path().join(MANIFEST_FILE).exists());
        assert!(store.path().join(LOG_FILE).exists());
        assert!(store.path().join(LOCK_FILE).exists());

        // Idempotent
        store.ensure_schema().unwrap();
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn test_operations_require_schema() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(test_config(&dir)).unwrap();

        assert!(matches!(store.append("a"), Err(StoreError::NotInitialized)));
        assert!(matches!(
            store.read_after(RecordId::ZERO, 1),
            Err(StoreError::NotInitialized)
        ));
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let dir = TempDir::new().unwrap();
        let store = open_ready(test_config(&dir));

        let ids: Vec<RecordId> = (0..3).map(|_| store.append("msg").unwrap()).collect();
        assert_eq!(ids, vec![RecordId(1), RecordId(2), RecordId(3)]);

        let records = store.read_after(RecordId(1), 10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, RecordId(2));
        assert!(records[0].created_at <= records[1].created_at);
    }

    #[test]
    fn test_payload_bound() {
        let dir = TempDir::new().unwrap();
        let store = open_ready(LogStoreConfig {
            max_payload_len: 4,
            ..test_config(&dir)
        });

        assert!(store.append("four").is_ok());
        assert!(matches!(
            store.append("fives"),
            Err(StoreError::PayloadTooLong { len: 5, max: 4 })
        ));
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        {
            let store = open_ready(config.clone());
            store.append("one").unwrap();
            store.append("two").unwrap();
            store.close();
        }

        let store = open_ready(config);
        assert_eq!(store.record_count(), 2);
        assert_eq!(store.append("three").unwrap(), RecordId(3));

        let payloads: Vec<String> = store
            .read_after(RecordId::ZERO, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.payload)
            .collect();
        assert_eq!(payloads, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_store_lock() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let _store1 = LogStore::open(config.clone()).unwrap();

        // Second store should fail to acquire lock
        let result = LogStore::open(config);
        assert!(matches!(result, Err(StoreError::Locked)));
    }

    #[test]
    fn test_missing_directory_without_create() {
        let dir = TempDir::new().unwrap();
        let result = LogStore::open(LogStoreConfig {
            create_if_missing: false,
            ..test_config(&dir)
        });
        assert!(matches!(result, Err(StoreError::NotInitialized)));
    }

    #[test]
    fn test_foreign_manifest_rejected() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        fs::create_dir_all(&config.path).unwrap();
        fs::write(config.path.join(MANIFEST_FILE), b"NOPE\x01").unwrap();

        let store = LogStore::open(config).unwrap();
        assert!(matches!(store.ensure_schema(), Err(StoreError::InvalidFormat(_))));
    }

    #[test]
    fn test_close_releases_pool() {
        let dir = TempDir::new().unwrap();
        let store = open_ready(test_config(&dir));
        store.append("x").unwrap();
        assert!(store.pool_stats().open >= 1);

        store.close();
        assert!(store.is_closed());
        assert_eq!(store.pool_stats().open, 0);
        assert!(matches!(store.append("y"), Err(StoreError::PoolClosed)));

        // Idempotent
        store.close();
    }
}
