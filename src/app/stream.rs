// Tailgate - app/stream.rs
//
// The consumer and producer halves of one tail stream.
//
// Each `tail()` call spawns exactly one producer task that owns a
// `RecordSink`; the caller owns the matching `TailStream`. The channel is
// bounded, so a slow consumer suspends the producer instead of growing
// memory. Dropping the `TailStream` closes the channel; the producer sees
// this through `RecordSink::closed()` or a failed `send` and releases its
// resources.

use crate::core::model::TailRecord;
use crate::util::constants::TAIL_CHANNEL_CAPACITY;
use crate::util::error::{SecurityError, TailgateError};
use tokio::sync::mpsc;

/// Cancellable sequence of tail records. Drop it to cancel.
#[derive(Debug)]
pub struct TailStream {
    rx: mpsc::Receiver<TailRecord>,
}

/// Producer side of a tail stream.
#[derive(Debug, Clone)]
pub struct RecordSink {
    tx: mpsc::Sender<TailRecord>,
}

/// Create a connected sink/stream pair.
pub fn channel() -> (RecordSink, TailStream) {
    let (tx, rx) = mpsc::channel(TAIL_CHANNEL_CAPACITY);
    (RecordSink { tx }, TailStream { rx })
}

impl TailStream {
    /// Next record, or `None` once the producer has finished.
    pub async fn next(&mut self) -> Option<TailRecord> {
        self.rx.recv().await
    }

    /// A stream that yields exactly one record and ends.
    pub fn single(record: TailRecord) -> Self {
        let (sink, stream) = channel();
        // Capacity is at least one, so this never fails on a fresh channel.
        let _ = sink.tx.try_send(record);
        stream
    }

    /// Drain every remaining record. Only useful for streams known to end.
    pub async fn collect(mut self) -> Vec<TailRecord> {
        let mut out = Vec::new();
        while let Some(record) = self.next().await {
            out.push(record);
        }
        out
    }
}

impl RecordSink {
    /// Send one record. Returns `false` if the consumer has gone away, in
    /// which case the producer must stop.
    pub async fn send(&self, record: TailRecord) -> bool {
        self.tx.send(record).await.is_ok()
    }

    /// Send every line in order; stops early if the consumer has gone away.
    pub async fn send_lines(&self, lines: Vec<String>) -> bool {
        for line in lines {
            if !self.send(TailRecord::Line(line)).await {
                return false;
            }
        }
        true
    }

    /// Log `err` and send the terminal sentinel it maps to.
    pub async fn fail(&self, err: TailgateError) {
        tracing::warn!(error = %err, "Tail stream terminated");
        self.send(terminal_record(&err)).await;
    }

    /// Resolves once the consumer has dropped its `TailStream`.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Map an error to the sentinel that ends a stream. Size-limit failures are
/// reported as errors; every other gate rejection is a security denial.
pub fn terminal_record(err: &TailgateError) -> TailRecord {
    match err {
        TailgateError::NotFound { .. } => TailRecord::NotFound,
        TailgateError::Security(e @ SecurityError::SizeExceeded { .. }) => {
            TailRecord::Error(e.to_string())
        }
        TailgateError::Security(e) => TailRecord::Security(e.to_string()),
        TailgateError::Remote(e) => TailRecord::Error(e.to_string()),
        other => TailRecord::Error(other.to_string()),
    }
}
