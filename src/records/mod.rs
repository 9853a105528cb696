//! Record log implementation.
//!
//! Records are stored in an append-only log of checksummed frames, with an
//! ordered id index for O(log n) access to "everything after a watermark".

mod index;
mod log;

pub use index::RecordIndex;
pub use log::RecordLog;
