// Tailgate - util/logging.rs
//
// tracing subscriber setup.
//
// Everything goes to stderr. stdout carries tailed lines and JSON listings
// and has to stay clean when piped. Credentials never reach a log macro
// anywhere in the crate.

use super::constants::{APP_NAME, APP_VERSION, DEFAULT_LOG_LEVEL};
use tracing_subscriber::EnvFilter;

/// Pick the filter directive: a non-empty `RUST_LOG` wins, then `--debug`,
/// then `[logging] level` from config.toml, then the built-in default.
fn directive(env: Option<String>, debug_flag: bool, config_level: Option<&str>) -> String {
    if let Some(env) = env.filter(|v| !v.trim().is_empty()) {
        return env;
    }
    if debug_flag {
        return "debug".to_string();
    }
    config_level.unwrap_or(DEFAULT_LOG_LEVEL).to_string()
}

/// Install the global subscriber. Only the first call has any effect, so
/// tests may call it freely.
pub fn init(debug_flag: bool, config_level: Option<&str>) {
    let directive = directive(std::env::var("RUST_LOG").ok(), debug_flag, config_level);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("Ignoring log filter '{directive}': {e}");
        EnvFilter::new(DEFAULT_LOG_LEVEL)
    });

    // Thread names tell scheduler work apart from blocking-pool reads.
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .compact()
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(app = APP_NAME, version = APP_VERSION, filter = %directive, "Logging initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_flag_and_config() {
        let chosen = directive(Some("tailgate=trace".into()), true, Some("warn"));
        assert_eq!(chosen, "tailgate=trace");
    }

    #[test]
    fn blank_env_falls_through_to_debug_flag() {
        assert_eq!(directive(Some("  ".into()), true, Some("warn")), "debug");
    }

    #[test]
    fn config_level_then_default() {
        assert_eq!(directive(None, false, Some("warn")), "warn");
        assert_eq!(directive(None, false, None), DEFAULT_LOG_LEVEL);
    }
}
