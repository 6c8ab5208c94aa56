//! Immutable per-host job descriptions and the remote filesystem layout.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::domain::error::SpecError;

/// One extra file to push to the host before execution.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSpec {
    pub local: PathBuf,
    pub remote: String,
}

/// Parameters substituted into the post-run script template.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptParams {
    /// Execution mode flag passed to the benchmark payload.
    pub exec_mode: String,
    /// Destination the payload writes its output to.
    pub output_dir: String,
    /// Free-form additional arguments, appended verbatim.
    pub extra_args: String,
}

impl Default for ScriptParams {
    fn default() -> Self {
        Self {
            exec_mode: "full".to_owned(),
            output_dir: "$HOME".to_owned(),
            extra_args: String::new(),
        }
    }
}

/// Immutable job description for one target host.
///
/// Built with validation from a raw fleet-file record; never mutated by the
/// core. A spec that fails validation fails that task only.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSpec {
    /// Whether this host participates in the run. A listed host with
    /// `deploy: false` is skipped entirely — no session, no report.
    pub deploy: bool,
    /// Workload config references, run sequentially against the same host.
    /// Each is a local path or an http(s) URL.
    pub workload_configs: Vec<String>,
    /// Post-run script template rendered and executed per config.
    pub post_run_script: PathBuf,
    /// Extra files to upload before execution.
    pub uploads: Vec<UploadSpec>,
    /// How long the payload may take to write its completion flag.
    pub completion_timeout: Duration,
    /// How long the host may take to write its boot-readiness flag.
    pub boot_timeout: Duration,
    /// Template parameters for the post-run script.
    pub params: ScriptParams,
}

impl InstanceSpec {
    /// Validates the required fields of a spec under construction.
    ///
    /// # Errors
    ///
    /// Returns a [`SpecError`] naming the instance and the offending field.
    pub fn validate(&self, instance: &str) -> Result<(), SpecError> {
        if self.workload_configs.is_empty() {
            return Err(SpecError::missing(instance, "workload_configs"));
        }
        if self.workload_configs.iter().any(|c| c.trim().is_empty()) {
            return Err(SpecError::InvalidField {
                instance: instance.to_owned(),
                field: "workload_configs".to_owned(),
                reason: "empty config reference".to_owned(),
            });
        }
        if self.post_run_script.as_os_str().is_empty() {
            return Err(SpecError::missing(instance, "post_run_script"));
        }
        if self.completion_timeout.is_zero() {
            return Err(SpecError::missing(instance, "completion_timeout_secs"));
        }
        Ok(())
    }
}

/// Well-known paths on each remote host.
///
/// These must match what the startup automation and the benchmark payload
/// write; they are configuration constants, never discovered.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteLayout {
    /// Marker written by the host's own startup automation.
    pub boot_flag: String,
    /// Marker written by the benchmark payload on completion.
    pub completion_flag: String,
    /// Glob matching result directories produced by the payload.
    pub results_glob: String,
    /// Log file the detached script redirects into.
    pub log_path: String,
    /// Where the rendered post-run script is uploaded.
    pub script_path: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            boot_flag: "/tmp/startup_complete.flag".to_owned(),
            completion_flag: "/tmp/benchmark_complete.flag".to_owned(),
            results_glob: "$HOME/results-*".to_owned(),
            log_path: "benchmark.log".to_owned(),
            script_path: "run_benchmark.sh".to_owned(),
        }
    }
}
