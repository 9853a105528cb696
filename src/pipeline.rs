//! Pipeline context and lifecycle.
//!
//! [`Pipeline`] gathers everything the two tasks share: the store, the signal
//! flag, the sink and the configuration. It is built once and hands out
//! the producer and consumer; nothing lives in globals.
//!
//! Lifecycle:
//!
//! ```text
//! Pipeline::new ─► start() ─► RunningPipeline::wait() ─► shutdown() ─► RunReport
//!                  │ ensure_schema                          │ stop timers
//!                  │ spawn producer + consumer              │ join workers
//!                                                           │ close store
//! ```

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::recency::RecencyTracker;
use crate::scheduler::{JobHandle, Schedule, Scheduler};
use crate::signal::SignalFlag;
use crate::sink::RecordSink;
use crate::store::RecordStore;
use crate::tasks::{Consumer, ConsumerStats, Producer, ProducerStats};
use crossbeam_channel::{after, bounded, never, select, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why the pipeline stopped waiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The configured run duration elapsed.
    Elapsed,
    /// A [`StopHandle`] asked for shutdown.
    Requested,
}

/// Summary of a finished run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub reason: ShutdownReason,
    pub elapsed: Duration,
    /// `None` if the producer's worker panicked.
    pub producer: Option<ProducerStats>,
    /// `None` if the consumer's worker panicked.
    pub consumer: Option<ConsumerStats>,
}

/// Requests an early shutdown of a running pipeline. Cheap to clone and safe
/// to use from any thread, including a signal handler thread.
#[derive(Clone, Debug)]
pub struct StopHandle {
    tx: Sender<()>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        // A request already pending is as good as this one.
        let _ = self.tx.try_send(());
    }
}

/// The explicit context shared by the producer and the consumer.
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn RecordStore>,
    signal: Arc<SignalFlag>,
    sink: Arc<dyn RecordSink>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn RecordStore>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            signal: Arc::new(SignalFlag::new()),
            sink,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn signal(&self) -> &Arc<SignalFlag> {
        &self.signal
    }

    /// A producer wired to this pipeline's store and flag.
    pub fn producer(&self) -> Producer {
        Producer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.signal),
            self.config.producer.payload.clone(),
        )
    }

    /// A consumer wired to this pipeline's store, flag and sink, with a fresh
    /// recency tracker.
    pub fn consumer(&self) -> Consumer {
        Consumer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.signal),
            Arc::clone(&self.sink),
            RecencyTracker::new(self.config.recency_capacity()),
            self.config.consumer.policy,
            self.config.consumer.batch_limit,
        )
    }

    /// Ensure the schema, then start both periodic jobs.
    ///
    /// On any error the store is closed before returning.
    pub fn start(self) -> Result<RunningPipeline, PipelineError> {
        if let Err(e) = self.store.ensure_schema() {
            self.store.close();
            return Err(e.into());
        }

        let mut scheduler = Scheduler::new();
        let producer_schedule =
            Schedule::every(self.config.producer_period()).with_initial_delay(self.config.producer_initial_delay());
        let consumer_schedule =
            Schedule::every(self.config.consumer_period()).with_initial_delay(self.config.consumer_initial_delay());

        let producer = match scheduler.spawn(self.producer(), producer_schedule) {
            Ok(job) => job,
            Err(e) => {
                self.store.close();
                return Err(e);
            }
        };

        let consumer = match scheduler.spawn(self.consumer(), consumer_schedule) {
            Ok(job) => job,
            Err(e) => {
                scheduler.stop();
                producer.join();
                self.store.close();
                return Err(e);
            }
        };

        let (stop_tx, stop_rx) = bounded(1);
        tracing::info!(
            producer_period_ms = self.config.producer.period_ms,
            consumer_period_ms = self.config.consumer.period_ms,
            batch_limit = self.config.consumer.batch_limit,
            policy = %self.config.consumer.policy,
            "pipeline started"
        );

        Ok(RunningPipeline {
            store: self.store,
            scheduler,
            producer,
            consumer,
            stop_tx,
            stop_rx,
            started: Instant::now(),
            default_duration: self.config.run_duration(),
        })
    }

    /// Start, wait for the configured run duration (or a stop request made
    /// through `on_start`'s handle), then shut down.
    pub fn run(self, on_start: impl FnOnce(StopHandle)) -> Result<RunReport, PipelineError> {
        let running = self.start()?;
        on_start(running.stop_handle());
        let reason = running.wait();
        Ok(running.shutdown(reason))
    }
}

/// A pipeline whose jobs are running.
pub struct RunningPipeline {
    store: Arc<dyn RecordStore>,
    scheduler: Scheduler,
    producer: JobHandle<Producer>,
    consumer: JobHandle<Consumer>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    started: Instant,
    default_duration: Option<Duration>,
}

impl RunningPipeline {
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Block for the configured run duration or until a stop is requested.
    pub fn wait(&self) -> ShutdownReason {
        self.wait_for(self.default_duration)
    }

    /// Block for `duration` (`None` = no deadline) or until a stop is
    /// requested.
    pub fn wait_for(&self, duration: Option<Duration>) -> ShutdownReason {
        let deadline = match duration {
            Some(d) => after(d),
            None => never(),
        };

        select! {
            recv(self.stop_rx) -> _ => {
                tracing::info!("shutdown requested");
                ShutdownReason::Requested
            }
            recv(deadline) -> _ => {
                tracing::info!("run duration elapsed");
                ShutdownReason::Elapsed
            }
        }
    }

    /// Stop both jobs, let in-flight ticks finish, then release the store.
    pub fn shutdown(mut self, reason: ShutdownReason) -> RunReport {
        self.scheduler.stop();

        let producer = self.producer.join().map(|p| p.stats().clone());
        let consumer = self.consumer.join().map(|c| c.stats().clone());

        self.store.close();

        let report = RunReport {
            reason,
            elapsed: self.started.elapsed(),
            producer,
            consumer,
        };

        tracing::info!(
            reason = ?report.reason,
            elapsed_ms = report.elapsed.as_millis() as u64,
            appended = report.producer.as_ref().map_or(0, |s| s.appended),
            emitted = report.consumer.as_ref().map_or(0, |s| s.emitted),
            "pipeline stopped"
        );
        report
    }
}
