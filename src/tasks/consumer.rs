//! Consumer task: flag-gated batch reads.

use super::PeriodicTask;
use crate::recency::RecencyTracker;
use crate::signal::SignalFlag;
use crate::sink::RecordSink;
use crate::store::RecordStore;
use crate::types::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How the consumer decides which records are new.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumePolicy {
    /// Read after the oldest retained id and skip ids already tracked.
    #[default]
    Dedup,
    /// Read after the newest retained id; no membership test.
    Watermark,
}

impl FromStr for ConsumePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dedup" => Ok(ConsumePolicy::Dedup),
            "watermark" => Ok(ConsumePolicy::Watermark),
            other => Err(format!("unknown consume policy '{}' (expected dedup or watermark)", other)),
        }
    }
}

impl fmt::Display for ConsumePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumePolicy::Dedup => f.write_str("dedup"),
            ConsumePolicy::Watermark => f.write_str("watermark"),
        }
    }
}

/// Result of a single consumer tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerOutcome {
    /// The signal was not raised; the store was not touched.
    Idle,
    /// A batch was read.
    Drained { emitted: usize, skipped: usize },
    /// The read failed after the signal was cleared.
    Failed,
}

/// Consumer counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Ticks that found the signal raised and read the store.
    pub rounds: u64,
    /// Ticks that returned without touching the store.
    pub idle: u64,
    pub emitted: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Reads newly appended records whenever the producer has signalled.
pub struct Consumer {
    store: Arc<dyn RecordStore>,
    signal: Arc<SignalFlag>,
    sink: Arc<dyn RecordSink>,
    tracker: RecencyTracker,
    policy: ConsumePolicy,
    batch_limit: usize,
    stats: ConsumerStats,
}

impl Consumer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        signal: Arc<SignalFlag>,
        sink: Arc<dyn RecordSink>,
        tracker: RecencyTracker,
        policy: ConsumePolicy,
        batch_limit: usize,
    ) -> Self {
        Self {
            store,
            signal,
            sink,
            tracker,
            policy,
            batch_limit,
            stats: ConsumerStats::default(),
        }
    }

    /// Exclusive lower bound of the next read.
    pub fn watermark(&self) -> RecordId {
        let bound = match self.policy {
            ConsumePolicy::Dedup => self.tracker.oldest(),
            ConsumePolicy::Watermark => self.tracker.newest(),
        };
        bound.unwrap_or(RecordId::ZERO)
    }

    /// Rows to request. Under dedup the retained ids above the watermark come
    /// back again and are skipped, so they do not count against the batch.
    fn read_limit(&self) -> usize {
        match self.policy {
            ConsumePolicy::Dedup => self.batch_limit + self.tracker.len().saturating_sub(1),
            ConsumePolicy::Watermark => self.batch_limit,
        }
    }

    /// Check the signal and, if raised, drain one batch into the sink.
    ///
    /// When the read fails the signal stays cleared: records of this round
    /// are picked up only once the producer raises the signal again.
    pub fn run_once(&mut self) -> ConsumerOutcome {
        if !self.signal.check_and_clear() {
            self.stats.idle += 1;
            tracing::debug!("no new records signalled");
            return ConsumerOutcome::Idle;
        }

        self.stats.rounds += 1;
        let watermark = self.watermark();

        let records = match self.store.read_after(watermark, self.read_limit()) {
            Ok(records) => records,
            Err(e) => {
                self.stats.failed += 1;
                tracing::error!(error = %e, watermark = watermark.0, "failed to read new records");
                return ConsumerOutcome::Failed;
            }
        };

        let mut emitted = 0;
        let mut skipped = 0;
        for record in &records {
            if self.policy == ConsumePolicy::Dedup && self.tracker.contains(record.id) {
                skipped += 1;
                continue;
            }

            self.sink.emit(record);
            self.tracker.insert(record.id);
            emitted += 1;
        }

        self.stats.emitted += emitted as u64;
        self.stats.skipped += skipped as u64;
        tracing::debug!(
            watermark = watermark.0,
            emitted,
            skipped,
            next_watermark = self.watermark().0,
            "batch drained"
        );

        ConsumerOutcome::Drained { emitted, skipped }
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    pub fn tracker(&self) -> &RecencyTracker {
        &self.tracker
    }

    pub fn policy(&self) -> ConsumePolicy {
        self.policy
    }
}

impl PeriodicTask for Consumer {
    fn name(&self) -> &'static str {
        "consumer"
    }

    fn tick(&mut self) {
        self.run_once();
    }
}
