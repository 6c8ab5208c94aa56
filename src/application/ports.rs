//! Port trait definitions for the application layer.
//!
//! Ports are the contracts infrastructure must fulfill. This file imports
//! only from `crate::domain` — never from `crate::infra`, `crate::commands`,
//! or `crate::output`. All traits are object-safe (`async_trait`) so the
//! orchestrator can spawn tasks over `Arc<dyn …>` without generics leaking
//! through every service signature.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::{InstanceHandle, RunError, SessionError, TaskError};

/// Remote-shell transport to one host.
///
/// Every operation is self-contained: implementations establish whatever
/// connection they need for the duration of the call and release it on all
/// exit paths. No connection object is ever shared across concurrent tasks.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Push a local file to `remote` on the host.
    async fn upload(
        &self,
        host: &InstanceHandle,
        local: &Path,
        remote: &str,
    ) -> Result<(), SessionError>;

    /// Upload `script` to `remote_path`, mark it executable and launch it
    /// detached, redirecting into `log_path`. Returns whatever output was
    /// observable before the session closed — best-effort only; empty output
    /// is a launch-failure signal, never a job-failure signal.
    async fn exec_detached(
        &self,
        host: &InstanceHandle,
        script: &str,
        remote_path: &str,
        log_path: &str,
    ) -> Result<String, SessionError>;

    /// Whether any path matching `pattern` exists on the host.
    async fn path_exists(
        &self,
        host: &InstanceHandle,
        pattern: &str,
    ) -> Result<bool, SessionError>;

    /// Paths matching `pattern` on the host.
    async fn list_matching(
        &self,
        host: &InstanceHandle,
        pattern: &str,
    ) -> Result<Vec<String>, SessionError>;

    /// Fetch `remote` (a file, or a directory when `recursive`) into `local`.
    async fn download(
        &self,
        host: &InstanceHandle,
        remote: &str,
        local: &Path,
        recursive: bool,
    ) -> Result<(), SessionError>;
}

/// Terminate hook into the external provisioning API.
///
/// Provisioning itself is out of scope; the core only ever calls `terminate`,
/// and only from teardown when the fleet file enables it.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn terminate(&self, handle: &InstanceHandle) -> Result<(), TaskError>;
}

/// Resolver for URL workload-config references.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    /// Download `url` into `dest_dir`, returning the local path.
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, RunError>;
}

/// Progress reporting without depending on the presentation layer.
/// Sync trait — no async needed.
pub trait ProgressReporter: Send + Sync {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

/// Reporter that swallows everything; used by tests and `--quiet` paths.
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn step(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warn(&self, _: &str) {}
}
