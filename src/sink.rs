//! Destinations for records the consumer observes.

use crate::types::Record;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::io::Write;

/// Receives each newly observed record exactly once per emission.
pub trait RecordSink: Send + Sync {
    fn emit(&self, record: &Record);
}

/// Emits one `info` event per record.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl RecordSink for LogSink {
    fn emit(&self, record: &Record) {
        tracing::info!(
            id = record.id.0,
            payload = %record.payload,
            created_at = %record.created_at,
            "record read"
        );
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    fn emit(&self, record: &Record) {
        let mut writer = self.writer.lock();
        let result = serde_json::to_writer(&mut *writer, record)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());

        if let Err(e) = result {
            tracing::warn!(id = record.id.0, error = %e, "failed to write record");
        }
    }
}

/// Forwards records over a bounded channel.
///
/// A full or disconnected channel drops the record with a warning; the
/// consumer never blocks on a slow reader.
pub struct ChannelSink {
    sender: Sender<Record>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn bounded(capacity: usize) -> (Self, Receiver<Record>) {
        let (sender, receiver) = bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl RecordSink for ChannelSink {
    fn emit(&self, record: &Record) {
        match self.sender.try_send(record.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(id = record.id.0, "sink channel full, dropping record");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!(id = record.id.0, "sink channel disconnected, dropping record");
            }
        }
    }
}
