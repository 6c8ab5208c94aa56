//! Identity of a provisioned remote host.

use std::path::PathBuf;

use serde::Serialize;

/// Connection identity for one provisioned host.
///
/// Produced by the provisioning collaborator (or supplied directly in the
/// fleet file for pre-provisioned hosts) and read-only to the core. The
/// hostname is already resolved by the time a handle reaches the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceHandle {
    /// Opaque instance id (e.g. a cloud instance id).
    pub id: String,
    /// Human-readable name, used to namespace local result directories.
    pub name: String,
    /// Region the host lives in, passed through to the terminate hook.
    pub region: String,
    /// Network address (DNS name or IP) for the remote shell.
    pub hostname: String,
    /// Login identity on the host.
    pub username: String,
    /// Path to the private key material, `~` already expanded.
    #[serde(skip)]
    pub key_file: PathBuf,
}

impl std::fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}@{})", self.name, self.username, self.hostname)
    }
}
