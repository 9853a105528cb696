//! Producer task: one append per tick, then raise the signal.

use super::PeriodicTask;
use crate::signal::SignalFlag;
use crate::store::RecordStore;
use crate::types::RecordId;
use std::sync::Arc;

/// Result of a single producer tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProducerOutcome {
    /// A record was appended and the signal raised.
    Appended(RecordId),
    /// The append failed; the signal was left untouched.
    Failed,
}

/// Producer counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub appended: u64,
    pub failed: u64,
    pub last_id: Option<RecordId>,
}

/// Appends a fixed payload on every tick.
pub struct Producer {
    store: Arc<dyn RecordStore>,
    signal: Arc<SignalFlag>,
    payload: String,
    stats: ProducerStats,
}

impl Producer {
    pub fn new(store: Arc<dyn RecordStore>, signal: Arc<SignalFlag>, payload: impl Into<String>) -> Self {
        Self {
            store,
            signal,
            payload: payload.into(),
            stats: ProducerStats::default(),
        }
    }

    /// Append one record. On success raise the signal; on failure log and
    /// leave the signal alone. The next tick is the retry.
    pub fn run_once(&mut self) -> ProducerOutcome {
        match self.store.append(&self.payload) {
            Ok(id) => {
                self.signal.raise();
                self.stats.appended += 1;
                self.stats.last_id = Some(id);
                tracing::info!(id = id.0, "record appended");
                ProducerOutcome::Appended(id)
            }
            Err(e) => {
                self.stats.failed += 1;
                tracing::error!(error = %e, "failed to append record");
                ProducerOutcome::Failed
            }
        }
    }

    pub fn stats(&self) -> &ProducerStats {
        &self.stats
    }
}

impl PeriodicTask for Producer {
    fn name(&self) -> &'static str {
        "producer"
    }

    fn tick(&mut self) {
        self.run_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, Arc<SignalFlag>, Producer) {
        let store = Arc::new(MemoryStore::new());
        store.ensure_schema().unwrap();
        let signal = Arc::new(SignalFlag::new());
        let producer = Producer::new(store.clone(), Arc::clone(&signal), "A");
        (store, signal, producer)
    }

    #[test]
    fn test_append_raises_signal() {
        let (store, signal, mut producer) = setup();

        assert_eq!(producer.run_once(), ProducerOutcome::Appended(RecordId(1)));
        assert!(signal.is_raised());
        assert_eq!(store.records()[0].payload, "A");
        assert_eq!(producer.stats().appended, 1);
        assert_eq!(producer.stats().last_id, Some(RecordId(1)));
    }

    #[test]
    fn test_failed_append_leaves_signal() {
        let (store, signal, mut producer) = setup();
        store.fail_next_appends(1);

        assert_eq!(producer.run_once(), ProducerOutcome::Failed);
        assert!(!signal.is_raised());
        assert!(store.is_empty());
        assert_eq!(producer.stats().failed, 1);

        // Next tick is the retry
        assert_eq!(producer.run_once(), ProducerOutcome::Appended(RecordId(1)));
        assert!(signal.is_raised());
    }
}
