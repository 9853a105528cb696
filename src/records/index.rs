//! Record index for watermark lookups.

use crate::types::RecordId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Index mapping record ids to file offsets.
///
/// Ordered so that "first record after a watermark" is a single range
/// lookup instead of a scan of the log.
pub struct RecordIndex {
    /// Record ID to offset.
    id_to_offset: RwLock<BTreeMap<RecordId, u64>>,
}

impl RecordIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            id_to_offset: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add an entry to the index.
    pub fn add(&self, id: RecordId, offset: u64) {
        self.id_to_offset.write().insert(id, offset);
    }

    /// Get offset for a record ID.
    pub fn get_offset(&self, id: RecordId) -> Option<u64> {
        self.id_to_offset.read().get(&id).copied()
    }

    /// Offset of the first record whose id is strictly greater than `watermark`.
    pub fn first_offset_after(&self, watermark: RecordId) -> Option<u64> {
        self.id_to_offset
            .read()
            .range((Bound::Excluded(watermark), Bound::Unbounded))
            .next()
            .map(|(_, offset)| *offset)
    }

    /// Highest indexed id.
    pub fn max_id(&self) -> Option<RecordId> {
        self.id_to_offset.read().keys().next_back().copied()
    }

    /// Get count of records.
    pub fn count(&self) -> usize {
        self.id_to_offset.read().len()
    }
}

impl Default for RecordIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let index = RecordIndex::new();

        index.add(RecordId(1), 0);

        assert_eq!(index.get_offset(RecordId(1)), Some(0));
        assert_eq!(index.get_offset(RecordId(2)), None);
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn test_first_offset_after() {
        let index = RecordIndex::new();

        index.add(RecordId(1), 0);
        index.add(RecordId(2), 40);
        index.add(RecordId(3), 90);

        assert_eq!(index.first_offset_after(RecordId::ZERO), Some(0));
        assert_eq!(index.first_offset_after(RecordId(1)), Some(40));
        assert_eq!(index.first_offset_after(RecordId(2)), Some(90));
        assert_eq!(index.first_offset_after(RecordId(3)), None);
        assert_eq!(index.max_id(), Some(RecordId(3)));
    }
}
