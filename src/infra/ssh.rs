//! ssh2-backed implementation of the `RemoteShell` port.
//!
//! Every operation opens its own short-lived SSH session (connect →
//! authenticate → operate → drop), so no connection object ever crosses a
//! task boundary and the transport is released on every exit path. The
//! blocking ssh2 calls run inside `spawn_blocking`, gated by a semaphore so
//! that a fleet of N instances never needs more than a fixed number of
//! blocking workers.
//!
//! Host keys are trusted on first use. The hosts this tool talks to are
//! ephemeral instances created moments earlier, so there is no prior key to
//! pin against; this is a deliberate, documented weakening of transport
//! trust, not an oversight.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::application::ports::RemoteShell;
use crate::domain::{InstanceHandle, SessionError};

/// Blocking sessions allowed in flight at once, independent of fleet size.
pub const DEFAULT_MAX_SESSIONS: usize = 8;

const SSH_PORT: u16 = 22;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-call timeout applied to blocking ssh2 reads/writes.
const OP_TIMEOUT: Duration = Duration::from_secs(30);

/// `RemoteShell` over the blocking `ssh2` crate with a bounded worker pool.
pub struct Ssh2Shell {
    permits: Arc<Semaphore>,
}

impl Ssh2Shell {
    #[must_use]
    pub fn new(max_sessions: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_sessions.max(1))),
        }
    }

    /// Acquire a pool slot, then run `op` against a fresh session on a
    /// blocking worker. The permit is held for the whole blocking span.
    async fn with_session<T, F>(&self, host: &InstanceHandle, op: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&InstanceHandle, &ssh2::Session) -> Result<T, SessionError> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| remote(&host.hostname, "session pool closed"))?;
        let host = host.clone();
        let hostname = host.hostname.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let session = open_session(&host)?;
            op(&host, &session)
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(err) => Err(remote(&hostname, &format!("blocking worker failed: {err}"))),
        }
    }
}

#[async_trait]
impl RemoteShell for Ssh2Shell {
    async fn upload(
        &self,
        host: &InstanceHandle,
        local: &Path,
        remote_path: &str,
    ) -> Result<(), SessionError> {
        let local = local.to_path_buf();
        let remote_path = remote_path.to_owned();
        self.with_session(host, move |host, session| {
            let bytes = std::fs::read(&local).map_err(|err| {
                remote(&host.hostname, &format!("reading {}: {err}", local.display()))
            })?;
            scp_send(host, session, &remote_path, &bytes, 0o644)
        })
        .await
    }

    async fn exec_detached(
        &self,
        host: &InstanceHandle,
        script: &str,
        remote_path: &str,
        log_path: &str,
    ) -> Result<String, SessionError> {
        let script = script.to_owned();
        let remote_path = remote_path.to_owned();
        let log_path = log_path.to_owned();
        self.with_session(host, move |host, session| {
            scp_send(host, session, &remote_path, script.as_bytes(), 0o755)?;
            let (output, _) = run_command(host, session, &launch_command(&remote_path, &log_path))?;
            Ok(output)
        })
        .await
    }

    async fn path_exists(
        &self,
        host: &InstanceHandle,
        pattern: &str,
    ) -> Result<bool, SessionError> {
        let pattern = pattern.to_owned();
        self.with_session(host, move |host, session| {
            // Globs and $HOME in the pattern expand on the remote shell.
            let (_, status) = run_command(host, session, &format!("ls -d {pattern}"))?;
            Ok(status == 0)
        })
        .await
    }

    async fn list_matching(
        &self,
        host: &InstanceHandle,
        pattern: &str,
    ) -> Result<Vec<String>, SessionError> {
        let pattern = pattern.to_owned();
        self.with_session(host, move |host, session| {
            let (output, status) =
                run_command(host, session, &format!("ls -d {pattern} 2>/dev/null"))?;
            if status != 0 {
                // `ls` exits non-zero when the glob matched nothing.
                return Ok(Vec::new());
            }
            Ok(output
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_owned)
                .collect())
        })
        .await
    }

    async fn download(
        &self,
        host: &InstanceHandle,
        remote_path: &str,
        local: &Path,
        recursive: bool,
    ) -> Result<(), SessionError> {
        let remote_path = remote_path.to_owned();
        let local = local.to_path_buf();
        self.with_session(host, move |host, session| {
            if recursive {
                download_dir(host, session, &remote_path, &local)
            } else {
                download_file(host, session, &remote_path, &local)
            }
        })
        .await
    }
}

/// `nohup … &` detaches the payload from this session. The confirmation echo
/// is gated on the background PID still being alive, so a launch that dies
/// immediately produces empty output and trips the caller's retry signal.
fn launch_command(remote_path: &str, log_path: &str) -> String {
    format!(
        "nohup bash {remote_path} > {log_path} 2>&1 < /dev/null & pid=$!; kill -0 $pid 2>/dev/null && echo started:$pid"
    )
}

// ── Blocking internals ────────────────────────────────────────────────────────

fn open_session(host: &InstanceHandle) -> Result<ssh2::Session, SessionError> {
    let addr = (host.hostname.as_str(), SSH_PORT)
        .to_socket_addrs()
        .map_err(|err| network(&host.hostname, &format!("resolving address: {err}")))?
        .next()
        .ok_or_else(|| network(&host.hostname, "hostname resolved to no addresses"))?;

    let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .map_err(|err| network(&host.hostname, &err.to_string()))?;

    let mut session =
        ssh2::Session::new().map_err(|err| remote(&host.hostname, &err.to_string()))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|err| network(&host.hostname, &format!("handshake: {err}")))?;
    session.set_timeout(u32::try_from(OP_TIMEOUT.as_millis()).unwrap_or(30_000));

    session
        .userauth_pubkey_file(&host.username, None, &host.key_file, None)
        .map_err(|err| SessionError::Auth {
            host: host.hostname.clone(),
            user: host.username.clone(),
            reason: err.to_string(),
        })?;

    Ok(session)
}

fn run_command(
    host: &InstanceHandle,
    session: &ssh2::Session,
    command: &str,
) -> Result<(String, i32), SessionError> {
    let mut channel = session
        .channel_session()
        .map_err(|err| remote(&host.hostname, &format!("opening channel: {err}")))?;
    channel
        .exec(command)
        .map_err(|err| remote(&host.hostname, &format!("exec: {err}")))?;

    let mut output = String::new();
    // Best-effort read; a command that produced nothing before closing is
    // not an error here.
    let _ = channel.read_to_string(&mut output);
    let _ = channel.wait_close();
    let status = channel.exit_status().unwrap_or(-1);
    Ok((output, status))
}

fn scp_send(
    host: &InstanceHandle,
    session: &ssh2::Session,
    remote_path: &str,
    bytes: &[u8],
    mode: i32,
) -> Result<(), SessionError> {
    let mut channel = session
        .scp_send(Path::new(remote_path), mode, bytes.len() as u64, None)
        .map_err(|err| remote(&host.hostname, &format!("scp {remote_path}: {err}")))?;
    channel
        .write_all(bytes)
        .map_err(|err| remote(&host.hostname, &format!("scp write {remote_path}: {err}")))?;
    let _ = channel.send_eof();
    let _ = channel.wait_eof();
    let _ = channel.close();
    let _ = channel.wait_close();
    Ok(())
}

fn download_file(
    host: &InstanceHandle,
    session: &ssh2::Session,
    remote_path: &str,
    local: &Path,
) -> Result<(), SessionError> {
    let (mut channel, _stat) = session
        .scp_recv(Path::new(remote_path))
        .map_err(|err| remote(&host.hostname, &format!("scp recv {remote_path}: {err}")))?;
    let mut bytes = Vec::new();
    channel
        .read_to_end(&mut bytes)
        .map_err(|err| remote(&host.hostname, &format!("scp read {remote_path}: {err}")))?;
    let _ = channel.wait_close();
    std::fs::write(local, &bytes)
        .map_err(|err| remote(&host.hostname, &format!("writing {}: {err}", local.display())))
}

/// Recursive fetch: the remote side streams `tar -cz` of the directory and we
/// unpack it next to `local` so the directory lands under its own name.
fn download_dir(
    host: &InstanceHandle,
    session: &ssh2::Session,
    remote_path: &str,
    local: &Path,
) -> Result<(), SessionError> {
    let (parent, base) = match remote_path.rsplit_once('/') {
        Some((p, b)) if !p.is_empty() => (p.to_owned(), b.to_owned()),
        _ => (".".to_owned(), remote_path.to_owned()),
    };

    let mut channel = session
        .channel_session()
        .map_err(|err| remote(&host.hostname, &format!("opening channel: {err}")))?;
    channel
        .exec(&format!("tar -cz -C {parent} {base}"))
        .map_err(|err| remote(&host.hostname, &format!("tar {remote_path}: {err}")))?;

    let mut archive = Vec::new();
    channel
        .read_to_end(&mut archive)
        .map_err(|err| remote(&host.hostname, &format!("reading tar stream: {err}")))?;
    let _ = channel.wait_close();
    if channel.exit_status().unwrap_or(-1) != 0 {
        return Err(remote(&host.hostname, &format!("tar {remote_path} failed")));
    }

    let unpack_root = local.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let decoder = flate2::read::GzDecoder::new(archive.as_slice());
    tar::Archive::new(decoder)
        .unpack(&unpack_root)
        .map_err(|err| {
            remote(
                &host.hostname,
                &format!("unpacking into {}: {err}", unpack_root.display()),
            )
        })
}


fn network(host: &str, reason: &str) -> SessionError {
    SessionError::Network {
        host: host.to_owned(),
        reason: reason.to_owned(),
    }
}

fn remote(host: &str, reason: &str) -> SessionError {
    SessionError::Remote {
        host: host.to_owned(),
        reason: reason.to_owned(),
    }
}
