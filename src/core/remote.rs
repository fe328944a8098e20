// Tailgate - core/remote.rs
//
// The seam between the tail engine and whatever actually talks to remote
// hosts. The production implementation is platform::ssh (libssh2); tests
// plug in an in-process fake.
//
// Every method here is *blocking*. Callers in the app layer always invoke
// them from `tokio::task::spawn_blocking`, never on the scheduler thread.

use crate::core::model::ServerProfile;
use crate::util::error::RemoteError;
use std::io;
use std::sync::Arc;

/// Captured result of a short-lived remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: i32,
}

impl CommandOutput {
    /// stderr as trimmed text, for error reporting.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Opens new authenticated sessions.
pub trait RemoteConnector: Send + Sync {
    /// Create and authenticate a session for `profile`.
    fn connect(&self, profile: &ServerProfile) -> Result<Arc<dyn RemoteSession>, RemoteError>;
}

/// An authenticated session that can run many commands.
pub trait RemoteSession: Send + Sync {
    /// Cheap liveness probe used before reusing a pooled session.
    fn is_alive(&self) -> bool;

    /// Run `command` to completion and capture its output.
    fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError>;

    /// Start a long-running `command` and read its stdout line by line.
    fn open_stream(&self, command: &str) -> Result<Box<dyn RemoteLineStream>, RemoteError>;

    /// Tear the session down. Must be safe to call more than once.
    fn close(&self);
}

/// Line-oriented stdout of a running remote command.
pub trait RemoteLineStream: Send {
    /// Next complete line (without its terminator).
    ///
    /// `Ok(None)` means no complete line is available yet; the caller should
    /// back off briefly and try again. An `Err` is fatal
    /// for the stream, including the remote command exiting.
    fn next_line(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Stop the remote command and release the channel.
    fn close(&mut self);
}
