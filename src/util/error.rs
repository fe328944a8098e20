// Tailgate - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// No string-based error propagation; every error keeps its causal chain for
// diagnostic logging. Errors that reach a tail stream are converted to a
// terminal sentinel record at the edge (see core::model::TailRecord).

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all Tailgate operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum TailgateError {
    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// A remote session could not be created or used.
    Remote(RemoteError),

    /// The security gate rejected a path, command, or size.
    Security(SecurityError),

    /// No configured source matches the requested id.
    NotFound { id: String },

    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for TailgateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Remote(e) => write!(f, "Remote error: {e}"),
            Self::Security(e) => write!(f, "Security error: {e}"),
            Self::NotFound { id } => write!(f, "No log source configured with id '{id}'"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for TailgateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Remote(e) => Some(e),
            Self::Security(e) => Some(e),
            Self::NotFound { .. } => None,
            Self::Io { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote errors
// ---------------------------------------------------------------------------

/// Errors raised while creating or using a pooled remote session.
///
/// Every variant carries the server identity (`host:port`) so pool faults can
/// be logged and reported against the right host.
#[derive(Debug)]
pub enum RemoteError {
    /// Key-based auth configured but the key file does not exist.
    /// Fatal for the current call; never retried.
    MissingKeyFile { server_id: String, path: PathBuf },

    /// Password auth configured with an empty password.
    MissingPassword { server_id: String },

    /// TCP connection could not be established.
    Connect { server_id: String, source: io::Error },

    /// The SSH library reported a protocol-level failure.
    Ssh {
        server_id: String,
        operation: &'static str,
        source: ssh2::Error,
    },

    /// The server rejected our credentials.
    AuthFailed { server_id: String },

    /// The server's host key did not match the configured known_hosts file.
    HostKeyMismatch { server_id: String },

    /// A remote command wrote to stderr or exited non-zero.
    Command {
        server_id: String,
        command: String,
        stderr: String,
    },

    /// I/O on an established session channel failed.
    Io {
        server_id: String,
        operation: &'static str,
        source: io::Error,
    },

    /// The pool has been shut down and no longer hands out sessions.
    PoolClosed,

    /// A blocking worker task panicked or was cancelled by the runtime.
    TaskJoin {
        operation: &'static str,
        reason: String,
    },
}

impl RemoteError {
    /// Server identity the error relates to, if any.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::MissingKeyFile { server_id, .. }
            | Self::MissingPassword { server_id }
            | Self::Connect { server_id, .. }
            | Self::Ssh { server_id, .. }
            | Self::AuthFailed { server_id }
            | Self::HostKeyMismatch { server_id }
            | Self::Command { server_id, .. }
            | Self::Io { server_id, .. } => Some(server_id),
            Self::PoolClosed | Self::TaskJoin { .. } => None,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKeyFile { server_id, path } => write!(
                f,
                "SSH key not found for {server_id}: '{}'",
                path.display()
            ),
            Self::MissingPassword { server_id } => {
                write!(f, "Password authentication for {server_id} has no password")
            }
            Self::Connect { server_id, source } => {
                write!(f, "Failed to connect to {server_id}: {source}")
            }
            Self::Ssh {
                server_id,
                operation,
                source,
            } => write!(f, "SSH {operation} failed for {server_id}: {source}"),
            Self::AuthFailed { server_id } => {
                write!(f, "Authentication rejected by {server_id}")
            }
            Self::HostKeyMismatch { server_id } => write!(
                f,
                "Host key for {server_id} does not match the configured known_hosts file"
            ),
            Self::Command {
                server_id,
                command,
                stderr,
            } => write!(f, "Remote command '{command}' failed on {server_id}: {stderr}"),
            Self::Io {
                server_id,
                operation,
                source,
            } => write!(f, "I/O error during {operation} on {server_id}: {source}"),
            Self::PoolClosed => write!(f, "Connection pool has been shut down"),
            Self::TaskJoin { operation, reason } => {
                write!(f, "Background task for {operation} did not complete: {reason}")
            }
        }
    }
}

impl std::error::Error for RemoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect { source, .. } => Some(source),
            Self::Ssh { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<RemoteError> for TailgateError {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}

impl From<tokio::task::JoinError> for RemoteError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::TaskJoin {
            operation: "remote session",
            reason: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Security errors
// ---------------------------------------------------------------------------

/// Hard, non-retried rejections from the security gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// Path is outside the allow-list or matches the denylist.
    PathDenied { path: String },

    /// Command is not allow-listed or contains forbidden characters.
    CommandDenied { command: String },

    /// Remote file is larger than the server's configured maximum.
    SizeExceeded { size: u64, max: u64 },
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathDenied { path } => write!(f, "Access denied: {path}"),
            Self::CommandDenied { command } => write!(f, "Command rejected: {command}"),
            Self::SizeExceeded { size, max } => {
                write!(f, "File too large: {size} bytes (max: {max})")
            }
        }
    }
}

impl std::error::Error for SecurityError {}

impl From<SecurityError> for TailgateError {
    fn from(e: SecurityError) -> Self {
        Self::Security(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// Two sources resolved to the same id.
    DuplicateId { id: String },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::DuplicateId { id } => write!(f, "Duplicate log source id '{id}'"),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for TailgateError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_exceeded_cites_actual_and_max() {
        let e = SecurityError::SizeExceeded {
            size: 524_288_000,
            max: 104_857_600,
        };
        assert_eq!(
            e.to_string(),
            "File too large: 524288000 bytes (max: 104857600)"
        );
    }

    #[test]
    fn remote_error_exposes_server_id() {
        let e = RemoteError::AuthFailed {
            server_id: "web1:22".to_string(),
        };
        assert_eq!(e.server_id(), Some("web1:22"));
        assert_eq!(RemoteError::PoolClosed.server_id(), None);
    }

    #[test]
    fn top_level_wraps_source_chain() {
        use std::error::Error;
        let e: TailgateError = RemoteError::Connect {
            server_id: "db:2222".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        }
        .into();
        assert!(e.to_string().contains("db:2222"));
        assert!(e.source().is_some());
    }
}
