//! The two periodic tasks of the pipeline.
//!
//! ```text
//! Producer ──append──► store ◄──read_after── Consumer ──emit──► sink
//!     └────raise──► SignalFlag ──check_and_clear──┘
//! ```
//!
//! The flag is the only state the two tasks share. The consumer owns its
//! recency tracker outright, so ticking it takes `&mut self`.

mod consumer;
mod producer;

pub use consumer::{ConsumePolicy, Consumer, ConsumerOutcome, ConsumerStats};
pub use producer::{Producer, ProducerOutcome, ProducerStats};

/// A unit of work the scheduler runs on a fixed cadence.
pub trait PeriodicTask: Send + 'static {
    /// Name used for the worker thread and in logs.
    fn name(&self) -> &'static str;

    /// Run one invocation. Failures are handled (logged) inside the task.
    fn tick(&mut self);
}
