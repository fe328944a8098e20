// Tailgate - app/remote.rs
//
// Remote tail, list and clear built only from allow-listed shell commands
// run over a pooled session.
//
// Tail protocol:
//   1. Path gate (allow-list + denylist). A denial sends nothing remotely.
//   2. Acquire a pooled session.
//   3. Size query via `find -printf %s` (falls back to 0), checked against
//      the server's size limit.
//   4. Backlog: `head -c <size>` when the whole file fits the window, else
//      `tail -c <window>` with the first (partial) line dropped.
//   5. Follow: `tail -c +<size+1> -F`, starting exactly after the bytes the
//      size query accounted for, so backlog lines are not repeated.
//   6. Read one line per blocking task. An empty read is retried after a
//      short pause; EOF or any other read error ends the stream.
//
// The follow loop holds its pooled session for as long as the stream is
// open, which is what keeps the pool from reaping or closing it underneath.
//
// Every find/tail command string passes `security::validate_command` before
// it is sent.

use crate::app::pool::ConnectionPool;
use crate::app::stream::RecordSink;
use crate::core::model::{LogSource, RemoteFile, ServerProfile, TailRecord};
use crate::core::remote::{CommandOutput, RemoteLineStream, RemoteSession};
use crate::core::{security, text};
use crate::util::constants::{MAX_REMOTE_LIST_RESULTS, REMOTE_EMPTY_READ_BACKOFF_MS};
use crate::util::error::{RemoteError, SecurityError, TailgateError};
use std::sync::Arc;
use std::time::Duration;

/// Runs tail/list/clear against remote hosts through the shared pool.
#[derive(Clone)]
pub struct RemoteTailAdapter {
    pool: Arc<ConnectionPool>,
    window_bytes: u64,
}

impl RemoteTailAdapter {
    pub fn new(pool: Arc<ConnectionPool>, window_bytes: u64) -> Self {
        Self { pool, window_bytes }
    }

    /// Produce the full record sequence for one remote source into `sink`.
    /// Returns when the stream has ended or the consumer has gone away.
    pub async fn tail(
        &self,
        source: Arc<LogSource>,
        server: Arc<ServerProfile>,
        sink: RecordSink,
    ) {
        let (session, mut stream) = match self.start(&source, &server, &sink).await {
            Ok(Some((session, stream))) => (session, Some(stream)),
            Ok(None) => return,
            Err(e) => {
                sink.fail(e).await;
                return;
            }
        };

        tracing::info!(source = %source.id, server = %server.id, "Following remote file");

        let outcome = loop {
            let Some(mut current) = stream.take() else {
                break None;
            };
            let read = tokio::task::spawn_blocking(move || {
                let result = current.next_line();
                (current, result)
            })
            .await;

            let result = match read {
                Ok((returned, result)) => {
                    stream = Some(returned);
                    result
                }
                Err(e) => break Some(TailgateError::from(RemoteError::from(e))),
            };

            match result {
                Ok(Some(raw)) => {
                    if let Some(line) = text::clean_line(&raw, &source.encoding) {
                        tracing::trace!(source = %source.id, line = text::preview(&line), "Remote line");
                        if !sink.send(TailRecord::Line(line)).await {
                            break None;
                        }
                    }
                }
                Ok(None) => {
                    let backoff = Duration::from_millis(REMOTE_EMPTY_READ_BACKOFF_MS);
                    let cancelled = tokio::select! {
                        _ = sink.closed() => true,
                        _ = tokio::time::sleep(backoff) => false,
                    };
                    if cancelled {
                        break None;
                    }
                }
                Err(e) => {
                    break Some(TailgateError::from(RemoteError::Io {
                        server_id: server.id.clone(),
                        operation: "follow read",
                        source: e,
                    }));
                }
            }

            if sink.is_closed() {
                break None;
            }
        };

        if let Some(mut current) = stream {
            if let Err(e) = tokio::task::spawn_blocking(move || current.close()).await {
                tracing::debug!(source = %source.id, error = %e, "Remote stream close did not complete");
            }
        }
        drop(session);
        match outcome {
            Some(err) => sink.fail(err).await,
            None => tracing::debug!(source = %source.id, "Remote tail cancelled by consumer"),
        }
    }

    /// Steps 1-5: everything up to an open follow stream, returned with the
    /// session it runs on. `Ok(None)` means the consumer went away during
    /// backlog replay.
    async fn start(
        &self,
        source: &LogSource,
        server: &Arc<ServerProfile>,
        sink: &RecordSink,
    ) -> Result<Option<Following>, TailgateError> {
        let path = source.path_str();
        let quoted = gate_path(&path, server)?;
        let session = self.pool.acquire(server).await?;

        let size = remote_file_size(&session, server, &quoted).await?;
        if !security::check_file_size(size, server.max_file_size_bytes) {
            return Err(SecurityError::SizeExceeded {
                size,
                max: server.max_file_size_bytes,
            }
            .into());
        }

        let mut partial = Vec::new();
        if size > 0 {
            let clipped = size > self.window_bytes;
            let command = if clipped {
                format!("tail -c {} {quoted}", self.window_bytes)
            } else {
                format!("head -c {size} {quoted}")
            };
            let output = exec(&session, checked_command(command)?).await?;
            let bytes = if clipped {
                text::skip_partial_first_line(&output.stdout)
            } else {
                &output.stdout[..]
            };
            let lines = text::drain_complete_lines(&mut partial, bytes, &source.encoding);
            tracing::debug!(source = %source.id, size, backlog = lines.len(), "Remote backlog fetched");
            if !sink.send_lines(lines).await {
                return Ok(None);
            }
        }

        let command = checked_command(format!("tail -c +{} -F {quoted}", size + 1))?;
        let follow = Arc::clone(&session);
        let mut stream = tokio::task::spawn_blocking(move || follow.open_stream(&command))
            .await
            .map_err(RemoteError::from)??;

        // A backlog fragment without its newline is completed by the first
        // followed line.
        if !partial.is_empty() {
            stream = Box::new(Prefixed {
                prefix: Some(partial),
                inner: stream,
            });
        }
        Ok(Some((session, stream)))
    }

    /// List files beneath `dir` on `server` whose name matches `pattern`.
    /// Capped at `MAX_REMOTE_LIST_RESULTS`; denylisted files are dropped.
    pub async fn list(
        &self,
        server: &Arc<ServerProfile>,
        dir: &str,
        pattern: &str,
        recursive: bool,
    ) -> Result<Vec<RemoteFile>, TailgateError> {
        let quoted_dir = gate_path(dir, server)?;
        let quoted_pattern = security::shell_quote(pattern).ok_or_else(|| {
            SecurityError::CommandDenied {
                command: format!("find -name {pattern}"),
            }
        })?;
        let depth = if recursive { "" } else { " -maxdepth 1" };
        let command = checked_command(format!(
            "find {quoted_dir}{depth} -type f -name {quoted_pattern}"
        ))?;

        let session = self.pool.acquire(server).await?;
        let output = exec(&session, command.clone()).await?;
        if output.stdout.is_empty() && !output.stderr.is_empty() {
            return Err(RemoteError::Command {
                server_id: server.id.clone(),
                command,
                stderr: output.stderr_text(),
            }
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let files: Vec<RemoteFile> = stdout
            .lines()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .filter(|p| security::validate_path(p, &server.allowed_paths))
            .take(MAX_REMOTE_LIST_RESULTS)
            .map(RemoteFile::from_path)
            .collect();

        tracing::debug!(server = %server.id, dir, pattern, files = files.len(), "Remote directory listed");
        Ok(files)
    }

    /// Truncate a remote file to zero length. Any stderr output is a failure.
    pub async fn clear(
        &self,
        source: &LogSource,
        server: &Arc<ServerProfile>,
    ) -> Result<(), TailgateError> {
        let quoted = gate_path(&source.path_str(), server)?;
        let session = self.pool.acquire(server).await?;
        let command = format!("truncate -s 0 {quoted}");
        let output = exec(&session, command.clone()).await?;
        if !output.stderr.is_empty() {
            return Err(RemoteError::Command {
                server_id: server.id.clone(),
                command,
                stderr: output.stderr_text(),
            }
            .into());
        }
        tracing::info!(source = %source.id, server = %server.id, "Remote file cleared");
        Ok(())
    }
}

/// An open follow stream and the pooled session it reads from.
type Following = (Arc<dyn RemoteSession>, Box<dyn RemoteLineStream>);

/// Path gate: allow-list/denylist check, then quoting. Both failures are
/// security denials.
fn gate_path(path: &str, server: &ServerProfile) -> Result<String, SecurityError> {
    let denied = || SecurityError::PathDenied {
        path: path.to_string(),
    };
    if !security::validate_path(path, &server.allowed_paths) {
        tracing::warn!(server = %server.id, path, "Remote path rejected");
        return Err(denied());
    }
    security::shell_quote(path).ok_or_else(denied)
}

fn checked_command(command: String) -> Result<String, SecurityError> {
    if security::validate_command(&command) {
        Ok(command)
    } else {
        tracing::warn!(command = %command, "Remote command rejected");
        Err(SecurityError::CommandDenied { command })
    }
}

async fn exec(session: &Arc<dyn RemoteSession>, command: String) -> Result<CommandOutput, RemoteError> {
    let session = Arc::clone(session);
    tokio::task::spawn_blocking(move || session.exec(&command)).await?
}

/// Remote file size in bytes, or 0 when the query produces nothing usable.
async fn remote_file_size(
    session: &Arc<dyn RemoteSession>,
    server: &ServerProfile,
    quoted: &str,
) -> Result<u64, SecurityError> {
    let command = checked_command(format!("find {quoted} -maxdepth 0 -type f -printf %s"))?;
    match exec(session, command).await {
        Ok(output) => {
            let size = String::from_utf8_lossy(&output.stdout).trim().parse().unwrap_or(0);
            Ok(size)
        }
        Err(e) => {
            tracing::debug!(server = %server.id, error = %e, "Size query failed; assuming 0");
            Ok(0)
        }
    }
}

/// Line stream whose first line is prefixed with a held-back fragment.
struct Prefixed {
    prefix: Option<Vec<u8>>,
    inner: Box<dyn RemoteLineStream>,
}

impl RemoteLineStream for Prefixed {
    fn next_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let line = self.inner.next_line()?;
        Ok(line.map(|line| match self.prefix.take() {
            Some(mut prefix) => {
                prefix.extend_from_slice(&line);
                prefix
            }
            None => line,
        }))
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
