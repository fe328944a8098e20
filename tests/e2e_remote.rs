// Tailgate - tests/e2e_remote.rs
//
// End-to-end tests for remote tail, list and clear through the public
// service API, against an in-process fake host.
//
// The fake implements the public `RemoteConnector` / `RemoteSession` /
// `RemoteLineStream` traits and records every command it is sent, so the
// tests can assert not only on the records produced but also on exactly
// which remote commands were (or were not) issued.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tailgate::app::catalog::Catalog;
use tailgate::app::service::{ServiceSettings, TailService};
use tailgate::app::stream::TailStream;
use tailgate::core::model::{Credential, LogSource, RemoteDirectory, ServerProfile, TailRecord};
use tailgate::core::remote::{CommandOutput, RemoteConnector, RemoteLineStream, RemoteSession};
use tailgate::util::error::{RemoteError, TailgateError};

// =============================================================================
// Fake host
// =============================================================================

#[derive(Default)]
struct FakeHost {
    files: Mutex<HashMap<String, Vec<u8>>>,
    /// Size reported by the size query, overriding the real content length.
    size_override: Mutex<HashMap<String, u64>>,
    /// Lines the follow command produces before ending with EOF.
    follow_lines: Mutex<Vec<&'static str>>,
    /// When set, the follow command stays quiet after its lines instead of
    /// exiting, like `tail -F` on an idle file.
    endless: AtomicBool,
    /// Follow reads served, across all streams.
    reads: AtomicUsize,
    stream_closes: AtomicUsize,
    session_closes: AtomicUsize,
    listing: Mutex<Vec<String>>,
    truncate_stderr: Mutex<String>,
    commands: Mutex<Vec<String>>,
    connects: AtomicUsize,
    refuse: AtomicBool,
}

impl FakeHost {
    fn add_file(&self, path: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn quoted_path(command: &str) -> String {
        command.split('\'').nth(1).unwrap_or_default().to_string()
    }
}

struct FakeConnector(Arc<FakeHost>);

impl RemoteConnector for FakeConnector {
    fn connect(&self, profile: &ServerProfile) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        if self.0.refuse.load(Ordering::SeqCst) {
            return Err(RemoteError::AuthFailed {
                server_id: profile.id.clone(),
            });
        }
        Ok(Arc::new(FakeSession(Arc::clone(&self.0))))
    }
}

struct FakeSession(Arc<FakeHost>);

impl RemoteSession for FakeSession {
    fn is_alive(&self) -> bool {
        true
    }

    fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let host = &self.0;
        host.commands.lock().unwrap().push(command.to_string());
        let path = FakeHost::quoted_path(command);
        let mut out = CommandOutput::default();

        if command.starts_with("find") && command.contains("-maxdepth 0") {
            let size = host.size_override.lock().unwrap().get(&path).copied().or_else(|| {
                host.files.lock().unwrap().get(&path).map(|c| c.len() as u64)
            });
            if let Some(size) = size {
                out.stdout = size.to_string().into_bytes();
            }
        } else if let Some(rest) = command.strip_prefix("tail -c ") {
            let n: usize = rest.split_whitespace().next().unwrap().parse().unwrap();
            let files = host.files.lock().unwrap();
            let content = files.get(&path).cloned().unwrap_or_default();
            out.stdout = content[content.len().saturating_sub(n)..].to_vec();
        } else if let Some(rest) = command.strip_prefix("head -c ") {
            let n: usize = rest.split_whitespace().next().unwrap().parse().unwrap();
            let files = host.files.lock().unwrap();
            let content = files.get(&path).cloned().unwrap_or_default();
            out.stdout = content[..n.min(content.len())].to_vec();
        } else if command.starts_with("find") {
            out.stdout = host.listing.lock().unwrap().join("\n").into_bytes();
        } else if command.starts_with("truncate") {
            let stderr = host.truncate_stderr.lock().unwrap().clone();
            if stderr.is_empty() {
                host.add_file(&path, b"");
            } else {
                out.stderr = stderr.into_bytes();
                out.exit_status = 1;
            }
        }
        Ok(out)
    }

    fn open_stream(&self, command: &str) -> Result<Box<dyn RemoteLineStream>, RemoteError> {
        self.0.commands.lock().unwrap().push(command.to_string());
        let lines = self
            .0
            .follow_lines
            .lock()
            .unwrap()
            .iter()
            .map(|l| l.as_bytes().to_vec())
            .collect();
        Ok(Box::new(FakeStream {
            host: Arc::clone(&self.0),
            lines,
            timeouts: 2,
        }))
    }

    fn close(&self) {
        self.0.session_closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeStream {
    host: Arc<FakeHost>,
    lines: VecDeque<Vec<u8>>,
    /// Empty reads served before the first line, like a quiet file.
    timeouts: usize,
}

impl RemoteLineStream for FakeStream {
    fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        self.host.reads.fetch_add(1, Ordering::SeqCst);
        if self.timeouts > 0 {
            self.timeouts -= 1;
            std::thread::sleep(Duration::from_millis(10));
            return Ok(None);
        }
        match self.lines.pop_front() {
            Some(line) => Ok(Some(line)),
            None if self.host.endless.load(Ordering::SeqCst) => {
                std::thread::sleep(Duration::from_millis(10));
                Ok(None)
            }
            None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "remote command closed its output")),
        }
    }

    fn close(&mut self) {
        self.host.stream_closes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn web1() -> Arc<ServerProfile> {
    let mut profile = ServerProfile::new("web1", "web1", 22, "ops", Credential::Password("pw".into()));
    profile.allowed_paths = vec!["/var/log".to_string()];
    Arc::new(profile)
}

fn setup(sources: &[(&str, &str)], settings: ServiceSettings) -> (TailService, Arc<FakeHost>, Arc<ServerProfile>) {
    setup_on(web1(), sources, settings)
}

fn setup_on(
    server: Arc<ServerProfile>,
    sources: &[(&str, &str)],
    settings: ServiceSettings,
) -> (TailService, Arc<FakeHost>, Arc<ServerProfile>) {
    let host = Arc::new(FakeHost::default());
    let sources = sources
        .iter()
        .map(|(id, path)| LogSource::remote(*id, *path, "utf-8", Arc::clone(&server)))
        .collect();
    let directories = vec![RemoteDirectory {
        server: Arc::clone(&server),
        name: "nginx".into(),
        path: "/var/log/nginx".into(),
        pattern: "*.log".into(),
        recursive: false,
        encoding: "utf-8".into(),
    }];
    let svc = TailService::new(
        Catalog::new(sources, vec![Arc::clone(&server)], directories),
        Arc::new(FakeConnector(Arc::clone(&host))),
        settings,
    );
    (svc, host, server)
}

async fn collect(svc: &TailService, id: &str) -> Vec<TailRecord> {
    tokio::time::timeout(Duration::from_secs(10), svc.tail(id).collect())
        .await
        .expect("remote stream did not end")
}

async fn next(stream: &mut TailStream) -> Option<TailRecord> {
    tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("timed out waiting for a record")
}

/// Poll `done` until it holds, failing after a few seconds.
async fn eventually(what: &str, done: impl Fn() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("gave up waiting for {what}");
}

fn lines(records: &[TailRecord]) -> Vec<&str> {
    records
        .iter()
        .filter_map(|r| match r {
            TailRecord::Line(l) => Some(l.as_str()),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Security gate and size limit
// =============================================================================

#[tokio::test]
async fn e2e_denied_path_issues_no_remote_commands() {
    let (svc, host, _) = setup(&[("web1/passwd", "/etc/passwd")], ServiceSettings::default());

    let records = collect(&svc, "web1/passwd").await;
    assert_eq!(
        records,
        vec![TailRecord::Security("Access denied: /etc/passwd".into())]
    );
    assert!(records[0].to_string().starts_with("[SECURITY]"));
    assert!(host.commands().is_empty());
    assert_eq!(host.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn e2e_oversize_file_is_rejected_before_any_tail() {
    let (svc, host, _) = setup(&[("web1/big", "/var/log/big.log")], ServiceSettings::default());
    host.size_override
        .lock()
        .unwrap()
        .insert("/var/log/big.log".into(), 524_288_000);

    let records = collect(&svc, "web1/big").await;
    assert_eq!(records.len(), 1);
    let TailRecord::Error(message) = &records[0] else {
        panic!("expected an error record, got {records:?}");
    };
    assert!(message.contains("524288000"), "{message}");
    assert!(message.contains("104857600"), "{message}");
    assert!(host.commands().iter().all(|c| !c.starts_with("tail")));
}

#[tokio::test]
async fn e2e_connection_failure_is_a_terminal_error() {
    let (svc, host, _) = setup(&[("web1/app", "/var/log/app.log")], ServiceSettings::default());
    host.refuse.store(true, Ordering::SeqCst);

    let records = collect(&svc, "web1/app").await;
    assert_eq!(records.len(), 1);
    assert!(matches!(&records[0], TailRecord::Error(m) if m.contains("web1:22")));
    assert!(host.commands().is_empty());
    assert_eq!(svc.pooled_sessions().await, 0);
}

// =============================================================================
// Backlog and follow
// =============================================================================

#[tokio::test]
async fn e2e_backlog_then_follow_without_duplicates() {
    let (svc, host, _) = setup(&[("web1/app", "/var/log/app.log")], ServiceSettings::default());
    host.add_file("/var/log/app.log", b"l1\n\x1b[33ml2\x1b[0m\n");
    *host.follow_lines.lock().unwrap() = vec!["l3", "", "l4"];

    let records = collect(&svc, "web1/app").await;
    assert_eq!(lines(&records), vec!["l1", "l2", "l3", "l4"]);
    assert!(matches!(records.last(), Some(TailRecord::Error(_))));

    let commands = host.commands();
    assert_eq!(
        commands,
        vec![
            "find '/var/log/app.log' -maxdepth 0 -type f -printf %s".to_string(),
            "head -c 15 '/var/log/app.log'".to_string(),
            "tail -c +16 -F '/var/log/app.log'".to_string(),
        ]
    );
}

#[tokio::test]
async fn e2e_clipped_window_drops_partial_first_line() {
    let settings = ServiceSettings {
        tail_window_bytes: 8,
        ..ServiceSettings::default()
    };
    let (svc, host, _) = setup(&[("web1/app", "/var/log/app.log")], settings);
    host.add_file("/var/log/app.log", b"aaaa\nbbbb\ncccc\n");

    let records = collect(&svc, "web1/app").await;
    assert_eq!(lines(&records), vec!["cccc"]);
    assert!(host
        .commands()
        .contains(&"tail -c 8 '/var/log/app.log'".to_string()));
}

#[tokio::test]
async fn e2e_backlog_stops_at_the_measured_size() {
    let (svc, host, _) = setup(&[("web1/app", "/var/log/app.log")], ServiceSettings::default());
    // The file grew to 9 bytes after the size query saw 6.
    host.add_file("/var/log/app.log", b"l1\nl2\nl3\n");
    host.size_override
        .lock()
        .unwrap()
        .insert("/var/log/app.log".into(), 6);
    *host.follow_lines.lock().unwrap() = vec!["l3"];

    let records = collect(&svc, "web1/app").await;
    assert_eq!(lines(&records), vec!["l1", "l2", "l3"]);
    let commands = host.commands();
    assert_eq!(commands[1], "head -c 6 '/var/log/app.log'");
    assert_eq!(commands[2], "tail -c +7 -F '/var/log/app.log'");
}

#[tokio::test]
async fn e2e_empty_remote_file_skips_backlog() {
    let (svc, host, _) = setup(&[("web1/app", "/var/log/app.log")], ServiceSettings::default());
    host.add_file("/var/log/app.log", b"");
    *host.follow_lines.lock().unwrap() = vec!["first"];

    let records = collect(&svc, "web1/app").await;
    assert_eq!(lines(&records), vec!["first"]);
    let commands = host.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[1], "tail -c +1 -F '/var/log/app.log'");
}

#[tokio::test]
async fn e2e_sessions_are_pooled_across_tails() {
    let (svc, host, _) = setup(&[("web1/app", "/var/log/app.log")], ServiceSettings::default());
    host.add_file("/var/log/app.log", b"x\n");

    collect(&svc, "web1/app").await;
    collect(&svc, "web1/app").await;
    assert_eq!(host.connects.load(Ordering::SeqCst), 1);
    assert_eq!(svc.pooled_sessions().await, 1);

    svc.shutdown().await;
    assert_eq!(svc.pooled_sessions().await, 0);
    let records = collect(&svc, "web1/app").await;
    assert!(matches!(&records[..], [TailRecord::Error(_)]));
}

#[tokio::test]
async fn e2e_reaper_keeps_the_session_of_a_live_follow() {
    let mut server = ServerProfile::new("web1", "web1", 22, "ops", Credential::Password("pw".into()));
    server.allowed_paths = vec!["/var/log".to_string()];
    server.idle_timeout = Duration::from_millis(50);
    let (svc, host, _) = setup_on(
        Arc::new(server),
        &[("web1/app", "/var/log/app.log")],
        ServiceSettings::default(),
    );
    host.add_file("/var/log/app.log", b"x\n");
    host.endless.store(true, Ordering::SeqCst);

    let mut stream = svc.tail("web1/app");
    assert_eq!(next(&mut stream).await, Some(TailRecord::Line("x".into())));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(svc.reap_idle().await, 0);
    assert_eq!(svc.pooled_sessions().await, 1);
    assert_eq!(host.session_closes.load(Ordering::SeqCst), 0);
    let waited = tokio::time::timeout(Duration::from_millis(300), stream.next()).await;
    assert!(waited.is_err(), "follow ended after reaping: {waited:?}");

    // Once the consumer is gone the session is idle again and gets reaped.
    drop(stream);
    let mut reaped = 0;
    for _ in 0..500 {
        reaped = svc.reap_idle().await;
        if reaped > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(reaped, 1);
    assert_eq!(host.session_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn e2e_dropping_remote_stream_closes_it_and_stops_reading() {
    let (svc, host, _) = setup(&[("web1/app", "/var/log/app.log")], ServiceSettings::default());
    host.add_file("/var/log/app.log", b"x\n");
    host.endless.store(true, Ordering::SeqCst);

    let mut stream = svc.tail("web1/app");
    assert_eq!(next(&mut stream).await, Some(TailRecord::Line("x".into())));
    drop(stream);

    eventually("the follow stream to close", || {
        host.stream_closes.load(Ordering::SeqCst) == 1
    })
    .await;
    let reads = host.reads.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(host.reads.load(Ordering::SeqCst), reads, "reads continued after close");
    assert_eq!(host.stream_closes.load(Ordering::SeqCst), 1);
    // The pooled session outlives the stream.
    assert_eq!(host.session_closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn e2e_directory_entry_resolves_and_tails() {
    let (svc, host, _) = setup(&[], ServiceSettings::default());
    host.add_file("/var/log/nginx/access.log", b"GET /\n");

    let records = collect(&svc, "web1/nginx/access.log").await;
    assert_eq!(lines(&records), vec!["GET /"]);
    assert!(host.commands()[0].contains("'/var/log/nginx/access.log'"));
}

// =============================================================================
// List and clear
// =============================================================================

#[tokio::test]
async fn e2e_listing_is_capped_and_filtered() {
    let (svc, host, server) = setup(&[], ServiceSettings::default());
    let mut listing: Vec<String> = (0..1500).map(|i| format!("/var/log/app/{i}.log")).collect();
    listing.insert(0, "/var/log/app/server.key".to_string());
    *host.listing.lock().unwrap() = listing;

    let files = svc
        .list_remote_directory(&server, "/var/log/app", "*.log", false)
        .await
        .unwrap();
    assert_eq!(files.len(), 1000);
    assert_eq!(files[0].path, "/var/log/app/0.log");
    assert_eq!(files[0].name, "0.log");
    assert_eq!(
        host.commands(),
        vec!["find '/var/log/app' -maxdepth 1 -type f -name '*.log'".to_string()]
    );

    svc.list_remote_directory(&server, "/var/log/app", "*.log", true)
        .await
        .unwrap();
    assert_eq!(
        host.commands()[1],
        "find '/var/log/app' -type f -name '*.log'"
    );
}

#[tokio::test]
async fn e2e_listing_outside_allowed_paths_is_denied() {
    let (svc, host, server) = setup(&[], ServiceSettings::default());
    let err = svc
        .list_remote_directory(&server, "/home/ops", "*", true)
        .await
        .unwrap_err();
    assert!(matches!(err, TailgateError::Security(_)));
    assert!(host.commands().is_empty());
}

#[tokio::test]
async fn e2e_remote_clear_reports_stderr_as_failure() {
    let (svc, host, _) = setup(
        &[("web1/app", "/var/log/app.log"), ("web1/shadow", "/etc/shadow")],
        ServiceSettings::default(),
    );
    host.add_file("/var/log/app.log", b"data\n");

    assert!(svc.clear("web1/app").await);
    assert_eq!(host.commands(), vec!["truncate -s 0 '/var/log/app.log'".to_string()]);

    *host.truncate_stderr.lock().unwrap() = "truncate: Permission denied".into();
    assert!(!svc.clear("web1/app").await);

    assert!(!svc.clear("web1/shadow").await);
    assert_eq!(host.commands().len(), 2, "denied clear must not reach the host");
}
