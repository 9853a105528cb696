//! Core types for the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a record.
///
/// Assigned by the store, starting at 1 and strictly increasing. `RecordId(0)`
/// is never assigned and serves as the "nothing seen yet" watermark.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Watermark used before any record has been observed.
    pub const ZERO: RecordId = RecordId(0);

    pub fn next(self) -> Self {
        RecordId(self.0 + 1)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time. A clock set before the epoch reads as zero.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.div_euclid(1_000_000);
        let micros = self.0.rem_euclid(1_000_000);
        write!(f, "{}.{:06}", secs, micros)
    }
}

/// A single record in the log.
///
/// Immutable once appended: the store assigns `id` and `created_at`, the
/// producer only chooses the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier (assigned by store).
    pub id: RecordId,

    /// Application-defined text.
    pub payload: String,

    /// When the record was appended.
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_ordering() {
        assert!(RecordId(1) > RecordId::ZERO);
        assert_eq!(RecordId(5).next(), RecordId(6));
        assert_eq!(RecordId::default(), RecordId::ZERO);
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(Timestamp(1_500_000).to_string(), "1.500000");
        assert_eq!(Timestamp(42).to_string(), "0.000042");
    }

    #[test]
    fn test_record_serializes_flat_ids() {
        let record = Record {
            id: RecordId(7),
            payload: "hello".into(),
            created_at: Timestamp(10),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["payload"], "hello");
        assert_eq!(json["created_at"], 10);
    }
}
