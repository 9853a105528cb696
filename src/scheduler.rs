//! Periodic job scheduling.
//!
//! Each job runs on its own named worker thread with a fixed-delay cadence:
//! the next tick starts one period after the previous tick returned. All jobs
//! share one stop channel. Nothing is ever sent on it; stopping drops the
//! sender, which disconnects every job's receiver at once. A job notices the
//! disconnect between ticks, so a tick already running always completes.

use crate::error::PipelineError;
use crate::tasks::PeriodicTask;
use crossbeam_channel::{after, bounded, select, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Cadence of a periodic job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    /// Delay before the first tick.
    pub initial_delay: Duration,
    /// Delay between the end of one tick and the start of the next.
    pub period: Duration,
}

impl Schedule {
    pub fn every(period: Duration) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            period,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// Owns the stop signal of a set of periodic jobs.
pub struct Scheduler {
    stop_tx: Option<Sender<()>>,
    stop_rx: Receiver<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = bounded(0);
        Self {
            stop_tx: Some(stop_tx),
            stop_rx,
        }
    }

    /// Start `task` on a dedicated worker thread.
    pub fn spawn<T: PeriodicTask>(&self, task: T, schedule: Schedule) -> Result<JobHandle<T>, PipelineError> {
        let name = task.name();
        let stop = self.stop_rx.clone();

        let thread = thread::Builder::new()
            .name(format!("pulselog-{}", name))
            .spawn(move || run_job(task, schedule, stop))
            .map_err(|source| PipelineError::Spawn { name, source })?;

        tracing::debug!(job = name, period_ms = schedule.period.as_millis() as u64, "job scheduled");
        Ok(JobHandle { name, thread })
    }

    /// Stop scheduling new ticks on every job. Idempotent.
    pub fn stop(&mut self) {
        if self.stop_tx.take().is_some() {
            tracing::debug!("scheduler stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_tx.is_none()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A running job. Joining hands the task back.
pub struct JobHandle<T> {
    name: &'static str,
    thread: JoinHandle<T>,
}

impl<T> JobHandle<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the job to finish its current tick and exit.
    ///
    /// Returns `None` if the job panicked.
    pub fn join(self) -> Option<T> {
        match self.thread.join() {
            Ok(task) => Some(task),
            Err(_) => {
                tracing::error!(job = self.name, "job panicked");
                None
            }
        }
    }
}

fn run_job<T: PeriodicTask>(mut task: T, schedule: Schedule, stop: Receiver<()>) -> T {
    let mut delay = schedule.initial_delay;
    let mut ticks = 0u64;

    loop {
        select! {
            recv(stop) -> _ => break,
            recv(after(delay)) -> _ => {}
        }

        // Both arms may be ready at once; never start a tick after stop.
        if let Err(TryRecvError::Disconnected) = stop.try_recv() {
            break;
        }

        task.tick();
        ticks += 1;
        delay = schedule.period;
    }

    tracing::debug!(job = task.name(), ticks, "job finished");
    task
}
