// Tailgate - platform/config.rs
//
// Configuration file location, config.toml loading, and startup validation.
//
// The raw TOML shape is deserialised once and converted into immutable,
// validated records (LogSource, ServerProfile, RemoteDirectory). Nothing
// downstream ever looks at the raw maps again.
//
// Validation policy: a malformed *entry* (missing host, unknown auth method,
// out-of-range limit) produces an actionable warning and is skipped or
// defaulted; only an unreadable or unparseable file is a hard error.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.

use crate::core::model::{Credential, LogSource, RemoteDirectory, ServerProfile};
use crate::core::{security, text};
use crate::util::constants;
use crate::util::error::ConfigError;
use directories::{BaseDirs, ProjectDirs};
use glob::Pattern;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Resolved platform paths for Tailgate configuration.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/tailgate/ or %APPDATA%\Tailgate\)
    pub config_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to current directory if platform dirs cannot be determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let config_dir = proj_dirs.config_dir().to_path_buf();
            tracing::debug!(config = %config_dir.display(), "Platform paths resolved");
            Self { config_dir }
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            Self {
                config_dir: PathBuf::from("."),
            }
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(constants::CONFIG_FILE_NAME)
    }
}

// =============================================================================
// Raw config.toml shape
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are silently ignored for forward compatibility.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub logging: LoggingSection,
    pub runtime: RuntimeSection,
    pub log_files: Vec<RawLogFile>,
    pub log_directories: Vec<RawLogDirectory>,
    pub remote_servers: Vec<RawServer>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
}

/// `[runtime]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub blocking_threads: Option<usize>,
    pub max_connections: Option<usize>,
    pub reap_interval_seconds: Option<u64>,
    pub tail_window_bytes: Option<u64>,
}

/// `[[log_files]]` entry: one explicitly named local file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawLogFile {
    pub name: Option<String>,
    pub path: Option<String>,
    pub encoding: Option<String>,
}

/// `[[log_directories]]` entry: a local directory scanned at startup.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawLogDirectory {
    pub name: Option<String>,
    pub scan_dir: Option<String>,
    pub pattern: Option<String>,
    pub recursive: Option<bool>,
    pub encoding: Option<String>,
}

/// `[[remote_servers]]` entry.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawServer {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    /// "key" (default) or "password".
    pub auth_method: Option<String>,
    pub key_path: Option<String>,
    pub key_passphrase: Option<String>,
    pub password: Option<String>,
    pub known_hosts: Option<String>,
    pub allowed_paths: Vec<String>,
    pub max_file_size: Option<u64>,
    pub idle_timeout_seconds: Option<u64>,
    pub logs: Vec<RawRemoteLog>,
}

/// `[[remote_servers.logs]]` entry.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawRemoteLog {
    pub name: Option<String>,
    pub path: Option<String>,
    /// "file" (default) or "directory".
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub pattern: Option<String>,
    pub recursive: Option<bool>,
    pub encoding: Option<String>,
}

// =============================================================================
// Validated configuration
// =============================================================================

/// Runtime tunables, validated against named constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub blocking_threads: usize,
    pub max_connections: usize,
    pub reap_interval: Duration,
    pub tail_window_bytes: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            blocking_threads: constants::DEFAULT_BLOCKING_THREADS,
            max_connections: constants::DEFAULT_MAX_CONNECTIONS,
            reap_interval: Duration::from_secs(constants::DEFAULT_REAP_INTERVAL_SECS),
            tail_window_bytes: constants::DEFAULT_TAIL_WINDOW_BYTES,
        }
    }
}

/// Validated application configuration derived from `config.toml`.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
    pub runtime: RuntimeSettings,
    pub sources: Vec<LogSource>,
    pub servers: Vec<Arc<ServerProfile>>,
    pub remote_directories: Vec<RemoteDirectory>,
}

/// Load and validate the config file at `path`.
///
/// A missing file yields defaults (no sources) and no warnings. An unreadable
/// or unparseable file is an error: without it there is nothing to tail.
pub fn load_config(path: &Path) -> Result<(AppConfig, Vec<String>), ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file found; using defaults");
        return Ok((AppConfig::default(), Vec::new()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config = parse_config(&content, path)?;
    tracing::info!(
        path = %path.display(),
        sources = config.0.sources.len(),
        servers = config.0.servers.len(),
        "Loaded config"
    );
    Ok(config)
}

/// Parse and validate config text. `path` is only used in error messages.
pub fn parse_config(content: &str, path: &Path) -> Result<(AppConfig, Vec<String>), ConfigError> {
    let raw: RawConfig = toml::from_str(content).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(validate(raw))
}

/// Convert the raw shape into validated records, accumulating warnings.
pub fn validate(raw: RawConfig) -> (AppConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();
    let mut config = AppConfig {
        runtime: validate_runtime(&raw.runtime, &mut warnings),
        ..AppConfig::default()
    };

    // -- Logging: level --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.clone());
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default (info).",
            ));
        }
    }

    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut push_source = |source: LogSource, warnings: &mut Vec<String>, sources: &mut Vec<LogSource>| {
        if seen_ids.insert(source.id.clone()) {
            sources.push(source);
        } else {
            warnings.push(format!(
                "{}. Keeping the first definition.",
                ConfigError::DuplicateId { id: source.id }
            ));
        }
    };

    // -- Local files --
    for (idx, entry) in raw.log_files.iter().enumerate() {
        let (Some(name), Some(path)) = (non_empty(&entry.name), non_empty(&entry.path)) else {
            warnings.push(format!(
                "[[log_files]] entry #{} needs both 'name' and 'path'. Skipped.",
                idx + 1
            ));
            continue;
        };
        let encoding = validate_encoding(entry.encoding.as_deref(), name, &mut warnings);
        let source = LogSource::local(name, expand_home(path), encoding);
        push_source(source, &mut warnings, &mut config.sources);
    }

    // -- Local directories --
    for entry in &raw.log_directories {
        let Some(scan_dir) = non_empty(&entry.scan_dir) else {
            warnings.push("[[log_directories]] entry without 'scan_dir'. Skipped.".to_string());
            continue;
        };
        let base_name = non_empty(&entry.name).unwrap_or("Scanned");
        let pattern = non_empty(&entry.pattern).unwrap_or(constants::DEFAULT_SCAN_PATTERN);
        let encoding = validate_encoding(entry.encoding.as_deref(), base_name, &mut warnings);
        let found = scan_local_directory(
            &expand_home(scan_dir),
            base_name,
            pattern,
            entry.recursive.unwrap_or(true),
            &encoding,
            &mut warnings,
        );
        for source in found {
            push_source(source, &mut warnings, &mut config.sources);
        }
    }

    // -- Remote servers --
    for (idx, entry) in raw.remote_servers.iter().enumerate() {
        let Some(server) = validate_server(entry, idx, &mut warnings) else {
            continue;
        };
        let server = Arc::new(server);

        for log in &entry.logs {
            let (Some(name), Some(path)) = (non_empty(&log.name), non_empty(&log.path)) else {
                warnings.push(format!(
                    "[[remote_servers.logs]] entry on '{}' needs both 'name' and 'path'. Skipped.",
                    server.name
                ));
                continue;
            };
            if !security::validate_path(path, &server.allowed_paths) {
                warnings.push(format!(
                    "Remote log '{}/{name}' path '{path}' is outside allowed_paths or denied; \
                     tailing it will be refused.",
                    server.name
                ));
            }
            let encoding = validate_encoding(log.encoding.as_deref(), name, &mut warnings);

            match log.kind.as_deref().unwrap_or("file") {
                "file" => {
                    let id = format!("{}/{name}", server.name);
                    let source = LogSource::remote(id, path, encoding, Arc::clone(&server));
                    push_source(source, &mut warnings, &mut config.sources);
                }
                "directory" => config.remote_directories.push(RemoteDirectory {
                    server: Arc::clone(&server),
                    name: name.to_string(),
                    path: path.to_string(),
                    pattern: non_empty(&log.pattern)
                        .unwrap_or(constants::DEFAULT_SCAN_PATTERN)
                        .to_string(),
                    recursive: log.recursive.unwrap_or(false),
                    encoding,
                }),
                other => warnings.push(format!(
                    "Remote log '{}/{name}' has type \"{other}\". Expected \"file\" or \"directory\". Skipped.",
                    server.name
                )),
            }
        }

        config.servers.push(server);
    }

    if !warnings.is_empty() {
        tracing::warn!(count = warnings.len(), "Config validation produced warnings");
    }

    (config, warnings)
}

fn validate_runtime(raw: &RuntimeSection, warnings: &mut Vec<String>) -> RuntimeSettings {
    let mut settings = RuntimeSettings::default();

    if let Some(threads) = raw.blocking_threads {
        if (1..=constants::ABSOLUTE_MAX_BLOCKING_THREADS).contains(&threads) {
            settings.blocking_threads = threads;
        } else {
            warnings.push(out_of_range(
                "runtime.blocking_threads",
                threads,
                format!("1-{}", constants::ABSOLUTE_MAX_BLOCKING_THREADS),
                constants::DEFAULT_BLOCKING_THREADS,
            ));
        }
    }

    if let Some(max) = raw.max_connections {
        if (1..=constants::ABSOLUTE_MAX_CONNECTIONS).contains(&max) {
            settings.max_connections = max;
        } else {
            warnings.push(out_of_range(
                "runtime.max_connections",
                max,
                format!("1-{}", constants::ABSOLUTE_MAX_CONNECTIONS),
                constants::DEFAULT_MAX_CONNECTIONS,
            ));
        }
    }

    if let Some(secs) = raw.reap_interval_seconds {
        if secs >= 1 {
            settings.reap_interval = Duration::from_secs(secs);
        } else {
            warnings.push(out_of_range(
                "runtime.reap_interval_seconds",
                secs,
                ">= 1".to_string(),
                constants::DEFAULT_REAP_INTERVAL_SECS,
            ));
        }
    }

    if let Some(bytes) = raw.tail_window_bytes {
        if (1..=constants::MAX_TAIL_WINDOW_BYTES).contains(&bytes) {
            settings.tail_window_bytes = bytes;
        } else {
            warnings.push(out_of_range(
                "runtime.tail_window_bytes",
                bytes,
                format!("1-{}", constants::MAX_TAIL_WINDOW_BYTES),
                constants::DEFAULT_TAIL_WINDOW_BYTES,
            ));
        }
    }

    settings
}

fn validate_server(raw: &RawServer, idx: usize, warnings: &mut Vec<String>) -> Option<ServerProfile> {
    let label = non_empty(&raw.name)
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{}", idx + 1));

    let Some(host) = non_empty(&raw.host) else {
        warnings.push(format!("[[remote_servers]] '{label}' has no 'host'. Skipped."));
        return None;
    };
    let Some(user) = non_empty(&raw.user) else {
        warnings.push(format!("[[remote_servers]] '{label}' has no 'user'. Skipped."));
        return None;
    };

    let credential = match raw.auth_method.as_deref().unwrap_or("key") {
        "key" => {
            let Some(key_path) = non_empty(&raw.key_path) else {
                warnings.push(format!(
                    "[[remote_servers]] '{label}' uses key auth but has no 'key_path'. Skipped."
                ));
                return None;
            };
            let path = expand_home(key_path);
            // Not fatal at load time: the key may be provisioned later. The
            // pool reports a missing key as a connection error per request.
            if !path.is_file() {
                warnings.push(format!(
                    "[[remote_servers]] '{label}': key file '{}' does not exist.",
                    path.display()
                ));
            }
            Credential::KeyFile {
                path,
                passphrase: raw.key_passphrase.clone(),
            }
        }
        "password" => {
            let Some(password) = non_empty(&raw.password) else {
                warnings.push(format!(
                    "[[remote_servers]] '{label}' uses password auth but has no 'password'. Skipped."
                ));
                return None;
            };
            Credential::Password(password.to_string())
        }
        other => {
            warnings.push(format!(
                "[[remote_servers]] '{label}': auth_method \"{other}\" is not supported. \
                 Expected \"key\" or \"password\". Skipped."
            ));
            return None;
        }
    };

    let port = raw.port.unwrap_or(constants::DEFAULT_SSH_PORT);
    let name = non_empty(&raw.name).unwrap_or(host);
    let mut profile = ServerProfile::new(name, host, port, user, credential);

    profile.allowed_paths = raw
        .allowed_paths
        .iter()
        .filter(|p| !p.trim().is_empty())
        .cloned()
        .collect();
    if profile.allowed_paths.is_empty() {
        warnings.push(format!(
            "[[remote_servers]] '{label}' has no allowed_paths; every remote path will be refused."
        ));
    }

    if let Some(max) = raw.max_file_size {
        if max > 0 {
            profile.max_file_size_bytes = max;
        } else {
            warnings.push(out_of_range(
                &format!("remote_servers.{label}.max_file_size"),
                max,
                "> 0".to_string(),
                constants::DEFAULT_MAX_FILE_SIZE_BYTES,
            ));
        }
    }

    if let Some(secs) = raw.idle_timeout_seconds {
        if (constants::MIN_IDLE_TIMEOUT_SECS..=constants::MAX_IDLE_TIMEOUT_SECS).contains(&secs) {
            profile.idle_timeout = Duration::from_secs(secs);
        } else {
            warnings.push(out_of_range(
                &format!("remote_servers.{label}.idle_timeout_seconds"),
                secs,
                format!(
                    "{}-{}",
                    constants::MIN_IDLE_TIMEOUT_SECS,
                    constants::MAX_IDLE_TIMEOUT_SECS
                ),
                constants::DEFAULT_IDLE_TIMEOUT_SECS,
            ));
        }
    }

    profile.known_hosts = non_empty(&raw.known_hosts).map(expand_home);

    Some(profile)
}

fn validate_encoding(label: Option<&str>, owner: &str, warnings: &mut Vec<String>) -> String {
    let label = label
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(constants::DEFAULT_ENCODING);
    if text::lookup_encoding(label).is_none() {
        warnings.push(format!(
            "'{owner}': encoding \"{label}\" is not recognised; lines will be decoded as UTF-8."
        ));
    }
    label.to_string()
}

/// Walk `root` and build one local source per file whose name matches
/// `pattern`. Ids are `<base_name>/<path relative to root>` with `/`
/// separators on every platform.
fn scan_local_directory(
    root: &Path,
    base_name: &str,
    pattern: &str,
    recursive: bool,
    encoding: &str,
    warnings: &mut Vec<String>,
) -> Vec<LogSource> {
    let pattern = match Pattern::new(pattern) {
        Ok(p) => p,
        Err(e) => {
            warnings.push(format!("'{base_name}': invalid pattern '{pattern}': {e}. Skipped."));
            return Vec::new();
        }
    };
    if !root.is_dir() {
        warnings.push(format!(
            "'{base_name}': scan_dir '{}' is not a directory. Skipped.",
            root.display()
        ));
        return Vec::new();
    }

    let max_depth = if recursive { constants::MAX_SCAN_DEPTH } else { 1 };
    let mut sources = Vec::new();

    for entry in walkdir::WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(root = %root.display(), error = %e, "Scan entry skipped");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        if !pattern.matches(file_name) {
            continue;
        }
        if sources.len() >= constants::MAX_SCANNED_FILES_PER_DIR {
            warnings.push(format!(
                "'{base_name}': more than {} matching files; the rest were ignored.",
                constants::MAX_SCANNED_FILES_PER_DIR
            ));
            break;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let id = format!("{base_name}/{}", relative.join("/"));
        sources.push(LogSource::local(id, entry.path(), encoding));
    }

    tracing::debug!(
        root = %root.display(),
        files = sources.len(),
        "Scanned local log directory"
    );
    sources
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

fn out_of_range(
    field: &str,
    value: impl std::fmt::Display,
    expected: String,
    default: impl std::fmt::Display,
) -> String {
    let err = ConfigError::ValueOutOfRange {
        field: field.to_string(),
        value: value.to_string(),
        expected,
    };
    format!("{err}. Using default ({default}).")
}
