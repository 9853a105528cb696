//! Cross-task "new data may exist" notification.

use std::sync::atomic::{AtomicBool, Ordering};

/// A single pending bit shared between one writer and one reader.
///
/// Raising is idempotent: any number of raises between two checks collapse
/// into one `true`. The check clears the bit in the same atomic step that
/// reads it, so a raise racing with a check is either observed by that check
/// or left pending for the next one, never lost.
#[derive(Debug, Default)]
pub struct SignalFlag {
    pending: AtomicBool,
}

impl SignalFlag {
    pub fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
        }
    }

    /// Mark that at least one new record may exist.
    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Return whether the flag was raised, clearing it.
    pub fn check_and_clear(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Peek without clearing.
    pub fn is_raised(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}
