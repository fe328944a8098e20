// Tailgate - app/tail.rs
//
// Live tail of one local file: backlog replay, then follow.
//
// Architecture:
//   - `LocalTailSession::run` is the producer body of one tail stream. It
//     runs on the runtime thread; every file read and stat goes through
//     `spawn_blocking` and is awaited.
//   - A `FileWatch` on the file signals a `tokio::sync::Notify`. The session
//     waits for that signal with a bounded timeout, so a missed or
//     unsupported notification only delays output by one timeout.
//   - The watch guard lives on this function's stack: every return path,
//     including consumer cancellation, tears it down.
//
// Error handling:
//   - A missing file at start ends the stream with the not-found sentinel.
//   - The file vanishing while followed ends it with the disappeared
//     sentinel.
//   - A size below the cursor is truncation: sentinel, cursor back to 0,
//     partial line dropped, and reading resumes from the new content.
//   - Any other read/stat error is transient: short backoff, then retry.
//   - MAX_TAIL_READ_BYTES_PER_TICK caps one read so a burst of writes is
//     consumed in slices; MAX_TAIL_PARTIAL_BYTES bounds a never-terminated
//     line.

use crate::app::stream::RecordSink;
use crate::core::model::{LogSource, TailCursor, TailRecord};
use crate::core::text;
use crate::platform::fs;
use crate::platform::watch::FileWatch;
use crate::util::constants::{
    MAX_TAIL_PARTIAL_BYTES, MAX_TAIL_READ_BYTES_PER_TICK, TRANSIENT_RETRY_BACKOFF_MS,
    WATCH_WAIT_TIMEOUT_MS,
};
use crate::util::error::TailgateError;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Result of checking the followed file once.
#[derive(Debug, PartialEq, Eq)]
enum FileCheck {
    Unchanged,
    Truncated,
    Disappeared,
    Appended(Vec<u8>),
}

/// Stat the file and read whatever lies past `offset`. Blocking.
fn check_file(path: &Path, offset: u64) -> io::Result<FileCheck> {
    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FileCheck::Disappeared),
        Err(e) => return Err(e),
    };
    if size < offset {
        return Ok(FileCheck::Truncated);
    }
    if size == offset {
        return Ok(FileCheck::Unchanged);
    }
    let available = (size - offset).min(MAX_TAIL_READ_BYTES_PER_TICK as u64) as usize;
    let bytes = fs::read_bytes_at(path, offset, available)?;
    Ok(FileCheck::Appended(bytes))
}

/// Tails one local source into a record sink.
pub struct LocalTailSession {
    source: Arc<LogSource>,
    window_bytes: u64,
    watch_timeout: Duration,
}

impl LocalTailSession {
    pub fn new(source: Arc<LogSource>, window_bytes: u64) -> Self {
        Self {
            source,
            window_bytes,
            watch_timeout: Duration::from_millis(WATCH_WAIT_TIMEOUT_MS),
        }
    }

    /// Override how long to wait for a change signal before polling anyway.
    pub fn with_watch_timeout(mut self, timeout: Duration) -> Self {
        self.watch_timeout = timeout;
        self
    }

    /// Replay the backlog, then follow the file until it disappears or the
    /// consumer drops the stream.
    pub async fn run(self, sink: RecordSink) {
        let path = self.source.path.clone();
        let encoding = self.source.encoding.clone();

        // -- Backlog replay --
        let window_path = path.clone();
        let window_bytes = self.window_bytes;
        let window =
            tokio::task::spawn_blocking(move || fs::read_trailing_window(&window_path, window_bytes))
                .await;
        let window = match window {
            Ok(Ok(window)) => window,
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(source = %self.source.id, path = %path.display(), "Local file not found");
                sink.send(TailRecord::NotFound).await;
                return;
            }
            Ok(Err(e)) => {
                sink.fail(io_error(&path, "backlog read", e)).await;
                return;
            }
            Err(e) => {
                sink.fail(io_error(&path, "backlog read", io::Error::other(e))).await;
                return;
            }
        };

        let mut cursor = TailCursor::at(window.end);
        let mut partial: Vec<u8> = Vec::new();
        let bytes = if window.is_clipped() {
            text::skip_partial_first_line(&window.bytes)
        } else {
            &window.bytes[..]
        };
        let backlog = text::drain_complete_lines(&mut partial, bytes, &encoding);
        tracing::debug!(
            source = %self.source.id,
            lines = backlog.len(),
            offset = cursor.offset(),
            "Local backlog replayed"
        );
        if !sink.send_lines(backlog).await {
            return;
        }

        // -- Following --
        let wake = Arc::new(Notify::new());
        let _watch = match FileWatch::start(&path, wake.clone()) {
            Ok(watch) => Some(watch),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "File watch unavailable; polling on timeout only"
                );
                None
            }
        };

        let mut check_now = false;
        loop {
            if !check_now {
                let cancelled = tokio::select! {
                    _ = sink.closed() => true,
                    _ = tokio::time::timeout(self.watch_timeout, wake.notified()) => false,
                };
                if cancelled {
                    break;
                }
            }
            check_now = false;

            let check_path: PathBuf = path.clone();
            let offset = cursor.offset();
            let checked = tokio::task::spawn_blocking(move || check_file(&check_path, offset))
                .await
                .unwrap_or_else(|e| Err(io::Error::other(e)));

            match checked {
                Ok(FileCheck::Unchanged) => {}
                Ok(FileCheck::Appended(bytes)) => {
                    cursor.advance(bytes.len() as u64);
                    // A full slice means more may be waiting.
                    check_now = bytes.len() == MAX_TAIL_READ_BYTES_PER_TICK;

                    let lines = text::drain_complete_lines(&mut partial, &bytes, &encoding);
                    if partial.len() > MAX_TAIL_PARTIAL_BYTES {
                        tracing::warn!(
                            source = %self.source.id,
                            bytes = partial.len(),
                            "Unterminated line exceeds limit; discarding it"
                        );
                        partial.clear();
                    }
                    if !sink.send_lines(lines).await {
                        break;
                    }
                }
                Ok(FileCheck::Truncated) => {
                    tracing::info!(source = %self.source.id, "File truncated; restarting from offset 0");
                    cursor.reset();
                    partial.clear();
                    if !sink.send(TailRecord::Truncated).await {
                        break;
                    }
                    check_now = true;
                }
                Ok(FileCheck::Disappeared) => {
                    tracing::info!(source = %self.source.id, "Followed file disappeared");
                    sink.send(TailRecord::Disappeared).await;
                    break;
                }
                Err(e) => {
                    tracing::debug!(source = %self.source.id, error = %e, "Transient read error; retrying");
                    let backoff = Duration::from_millis(TRANSIENT_RETRY_BACKOFF_MS);
                    let cancelled = tokio::select! {
                        _ = sink.closed() => true,
                        _ = tokio::time::sleep(backoff) => false,
                    };
                    if cancelled {
                        break;
                    }
                    check_now = true;
                }
            }
        }

        tracing::debug!(source = %self.source.id, "Local tail finished");
    }
}

fn io_error(path: &Path, operation: &'static str, source: io::Error) -> TailgateError {
    TailgateError::Io {
        path: path.to_path_buf(),
        operation,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::stream::{self, TailStream};
    use std::io::Write;
    use tempfile::TempDir;

    async fn next_within(stream: &mut TailStream, secs: u64) -> Option<TailRecord> {
        tokio::time::timeout(Duration::from_secs(secs), stream.next())
            .await
            .ok()
            .flatten()
    }

    fn start(path: &Path, window: u64) -> TailStream {
        let source = Arc::new(LogSource::local("t", path, "utf-8"));
        let session = LocalTailSession::new(source, window).with_watch_timeout(Duration::from_millis(100));
        let (sink, stream) = stream::channel();
        tokio::spawn(session.run(sink));
        stream
    }

    #[test]
    fn check_file_reports_each_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        assert_eq!(check_file(&path, 0).unwrap(), FileCheck::Disappeared);

        std::fs::write(&path, b"abc\n").unwrap();
        assert_eq!(check_file(&path, 4).unwrap(), FileCheck::Unchanged);
        assert_eq!(check_file(&path, 1).unwrap(), FileCheck::Appended(b"bc\n".to_vec()));
        assert_eq!(check_file(&path, 9).unwrap(), FileCheck::Truncated);
    }

    #[tokio::test]
    async fn missing_file_yields_not_found() {
        let dir = TempDir::new().unwrap();
        let mut stream = start(&dir.path().join("missing.log"), 1024);
        assert_eq!(next_within(&mut stream, 5).await, Some(TailRecord::NotFound));
        assert_eq!(next_within(&mut stream, 5).await, None);
    }

    #[tokio::test]
    async fn clipped_window_drops_partial_first_line_and_holds_fragment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"first line\nsecond\nthird\nunfinished").unwrap();

        // Window starts inside "first line".
        let mut stream = start(&path, 26);
        assert_eq!(next_within(&mut stream, 5).await, Some(TailRecord::Line("second".into())));
        assert_eq!(next_within(&mut stream, 5).await, Some(TailRecord::Line("third".into())));

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b" now\n").unwrap();
        assert_eq!(
            next_within(&mut stream, 5).await,
            Some(TailRecord::Line("unfinished now".into()))
        );
    }

    #[tokio::test]
    async fn strips_ansi_from_followed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"").unwrap();

        let mut stream = start(&path, 1024);
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"\x1b[32mgreen\x1b[0m\n\n").unwrap();
        assert_eq!(next_within(&mut stream, 5).await, Some(TailRecord::Line("green".into())));
    }
}
