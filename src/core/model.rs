// Tailgate - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no runtime
// dependencies. Records are built once at startup by platform::config and
// never mutated afterwards; they are shared behind `Arc`.
//
// These types are the shared vocabulary across all layers.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::util::constants;

// =============================================================================
// Server profile
// =============================================================================

/// How the pool authenticates against a remote host.
///
/// `Debug` is implemented by hand so secrets never reach a log line.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Private key file, with an optional passphrase.
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// Plain password authentication.
    Password(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// A remote host reachable over SSH, with its access limits.
///
/// Immutable for the process lifetime. `id` is always `host:port` and is the
/// key the connection pool uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerProfile {
    /// Pool key: `host:port`.
    pub id: String,
    /// Display name used as the first segment of source ids.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    /// Path prefixes remote access is confined to. Empty means nothing is
    /// reachable (fail closed).
    pub allowed_paths: Vec<String>,
    /// Largest remote file that may be tailed.
    pub max_file_size_bytes: u64,
    /// Pooled sessions unused for longer than this are reaped.
    pub idle_timeout: Duration,
    /// Optional OpenSSH known_hosts file; when set the host key must match.
    pub known_hosts: Option<PathBuf>,
}

impl ServerProfile {
    /// Build a profile with default limits and an empty allow-list.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        credential: Credential,
    ) -> Self {
        let host = host.into();
        Self {
            id: format!("{host}:{port}"),
            name: name.into(),
            host,
            port,
            username: username.into(),
            credential,
            allowed_paths: Vec::new(),
            max_file_size_bytes: constants::DEFAULT_MAX_FILE_SIZE_BYTES,
            idle_timeout: Duration::from_secs(constants::DEFAULT_IDLE_TIMEOUT_SECS),
            known_hosts: None,
        }
    }
}

// =============================================================================
// Log sources
// =============================================================================

/// Where a source's bytes live. Fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locality {
    Local,
    Remote(Arc<ServerProfile>),
}

/// A tailable log file, addressed by a unique id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    pub id: String,
    /// Local filesystem path, or the absolute path on the remote host.
    pub path: PathBuf,
    /// Encoding label understood by `encoding_rs` (e.g. "utf-8", "gbk").
    pub encoding: String,
    locality: Locality,
}

impl LogSource {
    pub fn local(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        encoding: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            encoding: encoding.into(),
            locality: Locality::Local,
        }
    }

    pub fn remote(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        encoding: impl Into<String>,
        server: Arc<ServerProfile>,
    ) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            encoding: encoding.into(),
            locality: Locality::Remote(server),
        }
    }

    pub fn locality(&self) -> &Locality {
        &self.locality
    }

    /// The path as the remote shell will see it.
    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// A configured remote directory. Files beneath it are addressed as
/// `<server name>/<name>/<relative path>` and resolved on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDirectory {
    pub server: Arc<ServerProfile>,
    pub name: String,
    pub path: String,
    pub pattern: String,
    pub recursive: bool,
    pub encoding: String,
}

/// One file found by a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    pub path: String,
    pub name: String,
}

impl RemoteFile {
    /// Build a descriptor from a full remote path; `name` is the final component.
    pub fn from_path(path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Self {
            path: path.to_string(),
            name,
        }
    }
}

// =============================================================================
// Tail cursor
// =============================================================================

/// Read position within a tailed file.
///
/// Only moves forward, except for an explicit `reset` when truncation is
/// detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TailCursor {
    offset: u64,
}

impl TailCursor {
    pub fn at(offset: u64) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn advance(&mut self, bytes: u64) {
        self.offset += bytes;
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

// =============================================================================
// Tail records
// =============================================================================

/// One item of a tail stream: file content or a sentinel.
///
/// Every sentinel except `Truncated` ends the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailRecord {
    /// ANSI-stripped line of file content.
    Line(String),
    /// The file shrank below the cursor; reading restarts at offset 0.
    Truncated,
    /// The file vanished while being followed.
    Disappeared,
    /// The requested id or file does not exist.
    NotFound,
    /// Connection, size-limit, or read failure.
    Error(String),
    /// The security gate rejected the request.
    Security(String),
}

impl TailRecord {
    /// True for every record after which the producer stops.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Line(_) | Self::Truncated)
    }
}

impl fmt::Display for TailRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line(text) => f.write_str(text),
            Self::Truncated => f.write_str("[SYSTEM] File truncated. Reloading..."),
            Self::Disappeared => f.write_str("[SYSTEM] File disappeared."),
            Self::NotFound => f.write_str("[SYSTEM] File not found or configured incorrectly."),
            Self::Error(msg) => write!(f, "[ERROR] {msg}"),
            Self::Security(msg) => write!(f, "[SECURITY] {msg}"),
        }
    }
}
