//! In-memory record store.

use super::{RecordStore, DEFAULT_MAX_PAYLOAD_LEN};
use crate::error::{Result, StoreError};
use crate::types::{Record, RecordId, Timestamp};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Record store held in memory.
///
/// Counts every `append` and `read_after` call (successful or not) and can be
/// told to fail the next N calls of either kind, which makes it the store of
/// choice for exercising the pipeline's failure paths.
pub struct MemoryStore {
    records: RwLock<Vec<Record>>,
    schema_ready: AtomicBool,
    closed: AtomicBool,
    max_payload_len: usize,

    append_calls: AtomicU64,
    read_calls: AtomicU64,

    fail_appends: AtomicU64,
    fail_reads: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_max_payload_len(DEFAULT_MAX_PAYLOAD_LEN)
    }

    pub fn with_max_payload_len(max_payload_len: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            schema_ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            max_payload_len,
            append_calls: AtomicU64::new(0),
            read_calls: AtomicU64::new(0),
            fail_appends: AtomicU64::new(0),
            fail_reads: AtomicU64::new(0),
        }
    }

    /// Make the next `n` appends fail.
    pub fn fail_next_appends(&self, n: u64) {
        self.fail_appends.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` reads fail.
    pub fn fail_next_reads(&self, n: u64) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    pub fn append_calls(&self) -> u64 {
        self.append_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Total data-plane accesses (appends + reads).
    pub fn access_count(&self) -> u64 {
        self.append_calls() + self.read_calls()
    }

    /// Snapshot of all stored records.
    pub fn records(&self) -> Vec<Record> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StoreError::PoolClosed);
        }
        if !self.schema_ready.load(Ordering::SeqCst) {
            return Err(StoreError::NotInitialized);
        }
        Ok(())
    }

    /// Consume one pending injected failure, if any.
    fn take_failure(counter: &AtomicU64) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryStore {
    fn ensure_schema(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StoreError::PoolClosed);
        }
        self.schema_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn append(&self, payload: &str) -> Result<RecordId> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        self.check_open()?;

        if Self::take_failure(&self.fail_appends) {
            return Err(StoreError::Injected("append".into()));
        }
        if payload.len() > self.max_payload_len {
            return Err(StoreError::PayloadTooLong {
                len: payload.len(),
                max: self.max_payload_len,
            });
        }

        let mut records = self.records.write();
        let id = RecordId(records.len() as u64 + 1);
        records.push(Record {
            id,
            payload: payload.to_owned(),
            created_at: Timestamp::now(),
        });
        Ok(id)
    }

    fn read_after(&self, watermark: RecordId, limit: usize) -> Result<Vec<Record>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.check_open()?;

        if Self::take_failure(&self.fail_reads) {
            return Err(StoreError::Injected("read".into()));
        }

        // Ids are dense from 1, so id n sits at position n - 1.
        let records = self.records.read();
        let start = (watermark.0 as usize).min(records.len());
        Ok(records[start..].iter().take(limit).cloned().collect())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> MemoryStore {
        let store = MemoryStore::new();
        store.ensure_schema().unwrap();
        store
    }

    #[test]
    fn test_append_and_read_after() {
        let store = ready();
        for payload in ["a", "b", "c"] {
            store.append(payload).unwrap();
        }

        let ids: Vec<u64> = store
            .read_after(RecordId(1), 10)
            .unwrap()
            .iter()
            .map(|r| r.id.0)
            .collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(store.read_after(RecordId::ZERO, 1).unwrap()[0].payload, "a");
        assert!(store.read_after(RecordId(99), 10).unwrap().is_empty());
    }

    #[test]
    fn test_counts_every_access() {
        let store = ready();
        store.append("a").unwrap();
        store.read_after(RecordId::ZERO, 1).unwrap();
        store.fail_next_reads(1);
        assert!(store.read_after(RecordId::ZERO, 1).is_err());

        assert_eq!(store.append_calls(), 1);
        assert_eq!(store.read_calls(), 2);
        assert_eq!(store.access_count(), 3);
    }

    #[test]
    fn test_injected_failures_are_consumed() {
        let store = ready();
        store.fail_next_appends(2);

        assert!(matches!(store.append("a"), Err(StoreError::Injected(_))));
        assert!(matches!(store.append("a"), Err(StoreError::Injected(_))));
        assert_eq!(store.append("a").unwrap(), RecordId(1));
    }

    #[test]
    fn test_lifecycle_errors() {
        let store = MemoryStore::new();
        assert!(matches!(store.append("a"), Err(StoreError::NotInitialized)));

        store.ensure_schema().unwrap();
        store.close();
        assert!(matches!(store.append("a"), Err(StoreError::PoolClosed)));
        assert!(matches!(store.ensure_schema(), Err(StoreError::PoolClosed)));
    }
}
