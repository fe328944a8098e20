// Tailgate - platform/ssh.rs
//
// libssh2-backed implementation of the remote session traits.
//
// Session lifecycle:
//   1. TCP connect with a bounded timeout.
//   2. SSH handshake and optional known_hosts verification.
//   3. Key-file or password authentication per the profile.
//   4. Keepalive enabled; it doubles as the pool's liveness probe.
//   5. The session switches to non-blocking mode. libssh2 holds the session
//      lock for the whole of a blocking call, so one quiet follow read would
//      otherwise stall every other stream and command sharing the session.
//      A follow read that would block returns at once as an empty read;
//      commands retry with a short sleep outside the lock until their
//      deadline.
//
// # Security notes
// - Passwords and passphrases are passed straight to libssh2 and are never
//   logged.
// - A missing key file is reported before any network I/O happens.

use crate::core::model::{Credential, ServerProfile};
use crate::core::remote::{CommandOutput, RemoteConnector, RemoteLineStream, RemoteSession};
use crate::util::constants::{
    SSH_COMMAND_TIMEOUT_SECS, SSH_CONNECT_TIMEOUT_SECS, SSH_KEEPALIVE_INTERVAL_SECS,
    SSH_POLL_INTERVAL_MS,
};
use crate::util::error::RemoteError;
use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, Session};
use std::io::{self, BufRead, BufReader, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// LIBSSH2_ERROR_EAGAIN: a non-blocking call that would have blocked.
const LIBSSH2_ERROR_EAGAIN: i32 = -37;

/// Opens real SSH sessions.
#[derive(Debug, Clone)]
pub struct SshConnector {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(SSH_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(SSH_COMMAND_TIMEOUT_SECS),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteConnector for SshConnector {
    fn connect(&self, profile: &ServerProfile) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        let server_id = profile.id.clone();

        // Credential pre-flight: fail before touching the network.
        match &profile.credential {
            Credential::KeyFile { path, .. } if !path.is_file() => {
                return Err(RemoteError::MissingKeyFile {
                    server_id,
                    path: path.clone(),
                });
            }
            Credential::Password(pw) if pw.is_empty() => {
                return Err(RemoteError::MissingPassword { server_id });
            }
            _ => {}
        }

        let tcp = open_tcp(profile, self.connect_timeout)?;

        let ssh_err = |operation: &'static str| {
            let server_id = server_id.clone();
            move |source: ssh2::Error| RemoteError::Ssh {
                server_id,
                operation,
                source,
            }
        };

        let mut session = Session::new().map_err(ssh_err("session init"))?;
        session.set_timeout(self.connect_timeout.as_millis() as u32);
        session.set_tcp_stream(tcp);
        session.handshake().map_err(ssh_err("handshake"))?;

        if let Some(known_hosts) = &profile.known_hosts {
            verify_host_key(&session, profile, known_hosts)?;
        }

        match &profile.credential {
            Credential::KeyFile { path, passphrase } => session
                .userauth_pubkey_file(&profile.username, None, path, passphrase.as_deref())
                .map_err(ssh_err("public key authentication"))?,
            Credential::Password(password) => session
                .userauth_password(&profile.username, password)
                .map_err(ssh_err("password authentication"))?,
        }
        if !session.authenticated() {
            return Err(RemoteError::AuthFailed { server_id });
        }

        session.set_keepalive(true, SSH_KEEPALIVE_INTERVAL_SECS);
        session.set_blocking(false);

        tracing::info!(
            server = %server_id,
            user = %profile.username,
            "SSH session established"
        );

        Ok(Arc::new(SshSession {
            server_id,
            session,
            command_timeout: self.command_timeout,
            close_timeout: self.connect_timeout,
        }))
    }
}

fn open_tcp(profile: &ServerProfile, timeout: Duration) -> Result<TcpStream, RemoteError> {
    let connect_err = |source: io::Error| RemoteError::Connect {
        server_id: profile.id.clone(),
        source,
    };
    let addrs = (profile.host.as_str(), profile.port)
        .to_socket_addrs()
        .map_err(connect_err)?;

    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(connect_err(last_err))
}

fn verify_host_key(
    session: &Session,
    profile: &ServerProfile,
    known_hosts_file: &std::path::Path,
) -> Result<(), RemoteError> {
    let ssh_err = |operation: &'static str| {
        move |source: ssh2::Error| RemoteError::Ssh {
            server_id: profile.id.clone(),
            operation,
            source,
        }
    };
    let mut known_hosts = session.known_hosts().map_err(ssh_err("known_hosts init"))?;
    known_hosts
        .read_file(known_hosts_file, KnownHostFileKind::OpenSSH)
        .map_err(ssh_err("known_hosts read"))?;
    let (key, _) = session.host_key().ok_or_else(|| RemoteError::HostKeyMismatch {
        server_id: profile.id.clone(),
    })?;
    match known_hosts.check_port(&profile.host, profile.port, key) {
        CheckResult::Match => Ok(()),
        _ => {
            tracing::warn!(server = %profile.id, "Host key verification failed");
            Err(RemoteError::HostKeyMismatch {
                server_id: profile.id.clone(),
            })
        }
    }
}

// =============================================================================
// Session
// =============================================================================

struct SshSession {
    server_id: String,
    session: Session,
    command_timeout: Duration,
    close_timeout: Duration,
}

impl SshSession {
    fn ssh_err(&self, operation: &'static str) -> impl FnOnce(ssh2::Error) -> RemoteError + '_ {
        move |source| RemoteError::Ssh {
            server_id: self.server_id.clone(),
            operation,
            source,
        }
    }

    fn io_err(&self, operation: &'static str) -> impl FnOnce(io::Error) -> RemoteError + '_ {
        move |source| RemoteError::Io {
            server_id: self.server_id.clone(),
            operation,
            source,
        }
    }

    /// Open a channel and start `command` on it.
    fn start(&self, command: &str, deadline: Instant) -> Result<ssh2::Channel, RemoteError> {
        let mut channel =
            retry(deadline, || self.session.channel_session()).map_err(self.ssh_err("open channel"))?;
        retry(deadline, || channel.exec(command)).map_err(self.ssh_err("exec"))?;
        Ok(channel)
    }
}

impl RemoteSession for SshSession {
    fn is_alive(&self) -> bool {
        let deadline = Instant::now() + self.close_timeout;
        self.session.authenticated() && retry(deadline, || self.session.keepalive_send()).is_ok()
    }

    fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let deadline = Instant::now() + self.command_timeout;
        let mut channel = self.start(command, deadline)?;

        let stdout = read_all(&mut channel, deadline).map_err(self.io_err("read stdout"))?;
        let stderr =
            read_all(&mut channel.stderr(), deadline).map_err(self.io_err("read stderr"))?;

        retry(deadline, || channel.wait_close()).map_err(self.ssh_err("close channel"))?;
        let exit_status = channel.exit_status().map_err(self.ssh_err("exit status"))?;

        tracing::trace!(
            server = %self.server_id,
            command,
            exit_status,
            stdout_bytes = stdout.len(),
            "Remote command finished"
        );

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_status,
        })
    }

    fn open_stream(&self, command: &str) -> Result<Box<dyn RemoteLineStream>, RemoteError> {
        let channel = self.start(command, Instant::now() + self.command_timeout)?;
        tracing::debug!(server = %self.server_id, command, "Remote stream opened");
        Ok(Box::new(SshLineStream {
            reader: BufReader::new(channel),
            pending: Vec::new(),
            close_timeout: self.close_timeout,
            closed: false,
        }))
    }

    fn close(&self) {
        let deadline = Instant::now() + self.close_timeout;
        if let Err(e) = retry(deadline, || self.session.disconnect(None, "pool release", None)) {
            tracing::debug!(server = %self.server_id, error = %e, "SSH disconnect failed");
        }
    }
}

fn would_block(e: &ssh2::Error) -> bool {
    matches!(e.code(), ErrorCode::Session(LIBSSH2_ERROR_EAGAIN))
}

/// Repeat a non-blocking libssh2 call until it stops reporting EAGAIN or
/// `deadline` passes. The last error is returned on timeout.
fn retry<T>(
    deadline: Instant,
    mut op: impl FnMut() -> Result<T, ssh2::Error>,
) -> Result<T, ssh2::Error> {
    loop {
        match op() {
            Err(e) if would_block(&e) && Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(SSH_POLL_INTERVAL_MS));
            }
            result => return result,
        }
    }
}

/// Read a non-blocking channel stream to EOF.
fn read_all(reader: &mut impl Read, deadline: Instant) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(out),
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "remote command did not finish in time",
                    ));
                }
                std::thread::sleep(Duration::from_millis(SSH_POLL_INTERVAL_MS));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

// =============================================================================
// Line stream
// =============================================================================

struct SshLineStream {
    reader: BufReader<ssh2::Channel>,
    /// Bytes of a line whose newline has not arrived yet. Survives empty
    /// reads so no data is lost between calls.
    pending: Vec<u8>,
    close_timeout: Duration,
    closed: bool,
}

impl RemoteLineStream for SshLineStream {
    /// Never waits: with the session non-blocking, "no data yet" comes back
    /// as `WouldBlock` and is reported as an empty read.
    fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.reader.read_until(b'\n', &mut self.pending) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "remote command closed its output",
            )),
            Ok(_) if self.pending.ends_with(b"\n") => {
                let mut line = std::mem::take(&mut self.pending);
                line.pop();
                Ok(Some(line))
            }
            // EOF in the middle of a line: hand back what we have; the next
            // call reports the EOF.
            Ok(_) => Ok(Some(std::mem::take(&mut self.pending))),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let deadline = Instant::now() + self.close_timeout;
        let channel = self.reader.get_mut();
        if let Err(e) = retry(deadline, || channel.close()) {
            tracing::debug!(error = %e, "Remote stream close failed");
        }
    }
}

impl Drop for SshLineStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eagain_is_retried_until_success() {
        let mut attempts = 0;
        let result = retry(Instant::now() + Duration::from_secs(5), || {
            attempts += 1;
            if attempts < 3 {
                Err(ssh2::Error::new(ErrorCode::Session(LIBSSH2_ERROR_EAGAIN), "would block"))
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn retry_gives_up_at_deadline() {
        let mut attempts = 0;
        let result: Result<(), _> = retry(Instant::now(), || {
            attempts += 1;
            Err(ssh2::Error::new(ErrorCode::Session(LIBSSH2_ERROR_EAGAIN), "would block"))
        });
        assert!(would_block(&result.unwrap_err()));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut attempts = 0;
        let result: Result<(), _> = retry(Instant::now() + Duration::from_secs(5), || {
            attempts += 1;
            Err(ssh2::Error::new(ErrorCode::Session(-1), "socket error"))
        });
        assert!(!would_block(&result.unwrap_err()));
        assert_eq!(attempts, 1);
    }

    /// Reader that reports `WouldBlock` between chunks, like a channel whose
    /// data arrives in several packets.
    struct Trickle(Vec<Option<&'static [u8]>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            match self.0.remove(0) {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }
    }

    #[test]
    fn read_all_waits_through_would_block() {
        let mut reader = Trickle(vec![Some(&b"12"[..]), None, None, Some(&b"34"[..])]);
        let out = read_all(&mut reader, Instant::now() + Duration::from_secs(5)).unwrap();
        assert_eq!(out, b"1234");
    }

    #[test]
    fn read_all_times_out_on_a_stalled_command() {
        let mut reader = Trickle(vec![Some(&b"12"[..]), None]);
        let err = read_all(&mut reader, Instant::now()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
