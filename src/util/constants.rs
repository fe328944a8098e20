// Tailgate - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.
// Every bound on memory, time, or result size lives here so it can be
// audited in one place.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "Tailgate";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "Tailgate";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Tail behaviour
// =============================================================================

/// Size of the trailing window replayed as backlog before following (bytes).
pub const DEFAULT_TAIL_WINDOW_BYTES: u64 = 10 * 1024; // 10 KiB

/// Hard upper bound on the configurable trailing window.
pub const MAX_TAIL_WINDOW_BYTES: u64 = 1024 * 1024; // 1 MiB

/// How long a local tail waits for a change notification before polling the
/// file anyway (covers missed or coalesced watcher events).
pub const WATCH_WAIT_TIMEOUT_MS: u64 = 2_000;

/// Backoff applied after a transient local read error (e.g. mid-rotation).
pub const TRANSIENT_RETRY_BACKOFF_MS: u64 = 100;

/// Pause between empty reads on a remote follow stream.
pub const REMOTE_EMPTY_READ_BACKOFF_MS: u64 = 100;

/// Maximum bytes read from a local file in one follow cycle.
/// Prevents a large burst of new content from stalling the producer task.
pub const MAX_TAIL_READ_BYTES_PER_TICK: usize = 512 * 1_024; // 512 KiB

/// Maximum accumulated size of the partial (in-progress) line buffer for a
/// single tailed file.
///
/// Guards against unbounded growth when a tailed file produces no newlines
/// (binary content or an extremely long single line).
pub const MAX_TAIL_PARTIAL_BYTES: usize = MAX_TAIL_READ_BYTES_PER_TICK * 4; // 2 MiB

/// Capacity of the per-stream record channel between producer and consumer.
/// A slow consumer applies backpressure instead of growing memory.
pub const TAIL_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Remote access
// =============================================================================

/// Default SSH port when a server entry omits one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default maximum remote file size accepted for tailing (bytes).
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 100 * 1024 * 1024; // 100 MiB

/// Default idle timeout after which a pooled session is reaped (seconds).
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Minimum configurable idle timeout (seconds).
pub const MIN_IDLE_TIMEOUT_SECS: u64 = 10;

/// Maximum configurable idle timeout (seconds).
pub const MAX_IDLE_TIMEOUT_SECS: u64 = 86_400;

/// Default maximum number of pooled sessions across all servers.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Hard upper bound on the configurable pool size.
pub const ABSOLUTE_MAX_CONNECTIONS: usize = 256;

/// TCP connect and SSH handshake/authentication timeout (seconds).
pub const SSH_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Pause between retries of a non-blocking libssh2 call that would block
/// (ms). The session lock is not held while waiting.
pub const SSH_POLL_INTERVAL_MS: u64 = 10;

/// Upper bound on one short-lived remote command, from channel open to exit
/// status (seconds).
pub const SSH_COMMAND_TIMEOUT_SECS: u64 = 30;

/// SSH keepalive interval (seconds); also enables the liveness probe.
pub const SSH_KEEPALIVE_INTERVAL_SECS: u32 = 30;

/// Maximum number of descriptors returned by a remote directory listing.
pub const MAX_REMOTE_LIST_RESULTS: usize = 1_000;

/// Commands that may appear as the first token of a remote invocation.
pub const ALLOWED_REMOTE_COMMANDS: &[&str] = &["tail", "cat", "head", "ls", "find"];

/// Characters that are never permitted anywhere in a remote command line.
pub const FORBIDDEN_COMMAND_CHARS: &[char] = &[';', '|', '&', '$', '`', '>', '<', '\n', '\r'];

// =============================================================================
// Runtime
// =============================================================================

/// Default upper bound on tokio's blocking worker pool.
pub const DEFAULT_BLOCKING_THREADS: usize = 64;

/// Hard upper bound on the blocking worker pool.
pub const ABSOLUTE_MAX_BLOCKING_THREADS: usize = 512;

/// How often the CLI triggers idle-connection reaping (seconds).
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 60;

// =============================================================================
// Local discovery
// =============================================================================

/// Default filename glob for `[[log_directories]]` entries.
pub const DEFAULT_SCAN_PATTERN: &str = "*.log";

/// Maximum directory recursion depth when scanning a local log directory.
pub const MAX_SCAN_DEPTH: usize = 10;

/// Maximum number of files accepted from a single scanned directory.
pub const MAX_SCANNED_FILES_PER_DIR: usize = 1_000;

// =============================================================================
// Text
// =============================================================================

/// Encoding label used when a source does not declare one.
pub const DEFAULT_ENCODING: &str = "utf-8";

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum length of a log line included in debug output.
/// Prevents accidental exposure of sensitive data in long lines.
pub const DEBUG_MAX_LINE_PREVIEW: usize = 200;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";
