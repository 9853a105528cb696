//! Bounded FIFO memory of recently observed record ids.

use crate::types::RecordId;
use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;

/// The last `capacity` record ids the consumer processed, oldest first.
///
/// Backed by a ring buffer for order and a hash set for O(1) membership.
/// Both always hold the same ids.
#[derive(Clone, Debug)]
pub struct RecencyTracker {
    capacity: NonZeroUsize,
    order: VecDeque<RecordId>,
    members: HashSet<RecordId>,
}

impl RecencyTracker {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.get()),
            members: HashSet::with_capacity(capacity.get()),
        }
    }

    /// Record `id` as seen. Returns the id evicted to stay within capacity.
    ///
    /// Inserting an id that is already tracked changes nothing.
    pub fn insert(&mut self, id: RecordId) -> Option<RecordId> {
        if !self.members.insert(id) {
            return None;
        }
        self.order.push_back(id);

        if self.order.len() > self.capacity.get() {
            let evicted = self.order.pop_front()?;
            self.members.remove(&evicted);
            return Some(evicted);
        }
        None
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.members.contains(&id)
    }

    /// Oldest retained id.
    pub fn oldest(&self) -> Option<RecordId> {
        self.order.front().copied()
    }

    /// Most recently inserted id.
    pub fn newest(&self) -> Option<RecordId> {
        self.order.back().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    /// Retained ids, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.order.iter().copied()
    }
}
