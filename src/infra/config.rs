//! Fleet file loading.
//!
//! The fleet file is the already-resolved job description: one record per
//! pre-provisioned host plus run-wide policy defaults. Region/image
//! resolution and instance creation happen upstream; a record that fails
//! validation fails that host only.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::application::services::exec::RetryPolicy;
use crate::application::services::lifecycle::LifecyclePolicies;
use crate::domain::{
    InstanceHandle, InstanceSpec, InstanceTask, RemoteLayout, ScriptParams, SpecError, UploadSpec,
};

/// Run-wide policy defaults, overridable per host where it makes sense.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Defaults {
    pub boot_timeout_secs: u64,
    pub completion_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub exec_retries: u32,
    pub exec_backoff_secs: u64,
    pub max_concurrent_sessions: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            boot_timeout_secs: 1200,
            completion_timeout_secs: 1200,
            poll_interval_secs: 60,
            exec_retries: 2,
            exec_backoff_secs: 10,
            max_concurrent_sessions: crate::infra::ssh::DEFAULT_MAX_SESSIONS,
        }
    }
}

/// Remote filesystem layout overrides; every field falls back to the
/// well-known default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutRecord {
    pub boot_flag: Option<String>,
    pub completion_flag: Option<String>,
    pub results_glob: Option<String>,
    pub log_path: Option<String>,
    pub script_path: Option<String>,
}

impl LayoutRecord {
    fn resolve(&self) -> RemoteLayout {
        let base = RemoteLayout::default();
        RemoteLayout {
            boot_flag: self.boot_flag.clone().unwrap_or(base.boot_flag),
            completion_flag: self.completion_flag.clone().unwrap_or(base.completion_flag),
            results_glob: self.results_glob.clone().unwrap_or(base.results_glob),
            log_path: self.log_path.clone().unwrap_or(base.log_path),
            script_path: self.script_path.clone().unwrap_or(base.script_path),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadRecord {
    pub local: PathBuf,
    pub remote: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptRecord {
    pub exec_mode: Option<String>,
    pub output_dir: Option<String>,
    pub extra_args: Option<String>,
}

/// One pre-provisioned host as written in the fleet file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostRecord {
    /// Set to `false` to keep the host listed but leave it out of the run.
    #[serde(default = "default_true")]
    pub deploy: bool,
    pub name: Option<String>,
    pub instance_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub key_file: Option<PathBuf>,
    pub post_run_script: Option<PathBuf>,
    #[serde(default)]
    pub workload_configs: Vec<String>,
    #[serde(default)]
    pub uploads: Vec<UploadRecord>,
    pub boot_timeout_secs: Option<u64>,
    pub completion_timeout_secs: Option<u64>,
    #[serde(default)]
    pub script: ScriptRecord,
}

/// The whole fleet file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetFile {
    /// Run name; local results land under `<name>/results/<instance>/`.
    pub name: String,
    #[serde(default)]
    pub results_dir: Option<PathBuf>,
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub teardown_on_success: bool,
    #[serde(default)]
    pub terminate_command: Option<Vec<String>>,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub remote: LayoutRecord,
    pub hosts: Vec<HostRecord>,
}

impl FleetFile {
    /// Loads and parses a fleet file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading fleet file {}", path.display()))?;
        let file: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing fleet file {}", path.display()))?;
        anyhow::ensure!(!file.hosts.is_empty(), "fleet file declares no hosts");
        Ok(file)
    }

    /// Builds one task per host record; a record that fails validation
    /// yields an error for that host only.
    #[must_use]
    pub fn resolve_tasks(&self) -> Vec<Result<InstanceTask, SpecError>> {
        self.hosts
            .iter()
            .enumerate()
            .map(|(idx, record)| self.resolve_host(idx, record))
            .collect()
    }

    /// Shared policy block for this run.
    #[must_use]
    pub fn policies(&self) -> LifecyclePolicies {
        LifecyclePolicies {
            poll_interval: Duration::from_secs(self.defaults.poll_interval_secs.max(1)),
            retry: RetryPolicy {
                max_retries: self.defaults.exec_retries,
                backoff: Duration::from_secs(self.defaults.exec_backoff_secs),
            },
            layout: self.remote.resolve(),
            results_root: PathBuf::from(&self.name)
                .join(self.results_dir.clone().unwrap_or_else(|| PathBuf::from("results"))),
            staging_dir: self
                .staging_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("downloaded_configs")),
            teardown: self.teardown_on_success,
        }
    }

    fn resolve_host(&self, idx: usize, record: &HostRecord) -> Result<InstanceTask, SpecError> {
        let label = record
            .name
            .clone()
            .or_else(|| record.instance_id.clone())
            .or_else(|| record.hostname.clone())
            .unwrap_or_else(|| format!("host-{}", idx + 1));

        let hostname = required(&label, "hostname", record.hostname.clone())?;
        let username = required(&label, "username", record.username.clone())?;
        let key_file = record
            .key_file
            .clone()
            .ok_or_else(|| SpecError::missing(&label, "key_file"))?;
        let post_run_script = record
            .post_run_script
            .clone()
            .ok_or_else(|| SpecError::missing(&label, "post_run_script"))?;

        let handle = InstanceHandle {
            id: record.instance_id.clone().unwrap_or_else(|| label.clone()),
            name: label.clone(),
            region: record.region.clone().unwrap_or_default(),
            hostname,
            username,
            key_file: expand_home(&key_file),
        };

        let defaults = &self.defaults;
        let spec = InstanceSpec {
            deploy: record.deploy,
            workload_configs: record.workload_configs.clone(),
            post_run_script,
            uploads: record
                .uploads
                .iter()
                .map(|u| UploadSpec {
                    local: expand_home(&u.local),
                    remote: u.remote.clone(),
                })
                .collect(),
            completion_timeout: Duration::from_secs(
                record
                    .completion_timeout_secs
                    .unwrap_or(defaults.completion_timeout_secs),
            ),
            boot_timeout: Duration::from_secs(
                record.boot_timeout_secs.unwrap_or(defaults.boot_timeout_secs),
            ),
            params: ScriptParams {
                exec_mode: record
                    .script
                    .exec_mode
                    .clone()
                    .unwrap_or_else(|| ScriptParams::default().exec_mode),
                output_dir: record
                    .script
                    .output_dir
                    .clone()
                    .unwrap_or_else(|| ScriptParams::default().output_dir),
                extra_args: record.script.extra_args.clone().unwrap_or_default(),
            },
        };
        spec.validate(&label)?;

        Ok(InstanceTask::new(handle, spec))
    }
}

fn default_true() -> bool {
    true
}

fn required(instance: &str, field: &str, value: Option<String>) -> Result<String, SpecError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SpecError::missing(instance, field))
}

/// Expands a leading `~/` against the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}
