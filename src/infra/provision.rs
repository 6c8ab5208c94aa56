//! Terminate hook into the external provisioning API.
//!
//! The core never provisions instances itself; the fleet file may name an
//! argv template (e.g. a cloud CLI invocation) that is run once per teardown
//! with `{instance_id}` and `{region}` substituted.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;

use crate::application::ports::Provisioner;
use crate::domain::{InstanceHandle, TaskError};

const TERMINATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Runs a configured argv template to terminate one instance.
pub struct CommandProvisioner {
    argv: Vec<String>,
}

impl CommandProvisioner {
    /// # Errors
    ///
    /// Returns an error if the template is empty.
    pub fn new(argv: Vec<String>) -> anyhow::Result<Self> {
        anyhow::ensure!(!argv.is_empty(), "terminate_command must not be empty");
        Ok(Self { argv })
    }

    fn render(&self, handle: &InstanceHandle) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{instance_id}", &handle.id)
                    .replace("{region}", &handle.region)
            })
            .collect()
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn terminate(&self, handle: &InstanceHandle) -> Result<(), TaskError> {
        let argv = self.render(handle);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| TaskError::Provisioning("empty terminate command".to_owned()))?;
        tracing::info!(instance = %handle.name, command = %argv.join(" "), "running terminate hook");

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| TaskError::Provisioning(format!("spawning {program}: {err}")))?;

        // Guarantee the child dies if the hook hangs; a dropped future alone
        // does not kill a spawned process.
        tokio::select! {
            status = child.wait() => {
                let status = status
                    .map_err(|err| TaskError::Provisioning(format!("waiting for {program}: {err}")))?;
                if status.success() {
                    Ok(())
                } else {
                    Err(TaskError::Provisioning(format!(
                        "{program} exited with {status}"
                    )))
                }
            }
            () = tokio::time::sleep(TERMINATE_TIMEOUT) => {
                let _ = child.kill().await;
                Err(TaskError::Provisioning(format!(
                    "{program} timed out after {}s",
                    TERMINATE_TIMEOUT.as_secs()
                )))
            }
        }
    }
}

/// Provisioner used when no terminate hook is configured: teardown becomes a
/// logged no-op and the host is left running.
pub struct UnmanagedProvisioner;

#[async_trait]
impl Provisioner for UnmanagedProvisioner {
    async fn terminate(&self, handle: &InstanceHandle) -> Result<(), TaskError> {
        tracing::warn!(instance = %handle.name, "no terminate hook configured; leaving instance running");
        Ok(())
    }
}
