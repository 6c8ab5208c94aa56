//! Script execution with bounded retry.

use std::time::Duration;

use crate::application::ports::RemoteShell;
use crate::domain::InstanceHandle;

/// Retry bounds for detached script launches.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt (`max_retries = 2` means at most 3
    /// attempts total).
    pub max_retries: u32,
    /// Fixed sleep between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_secs(10),
        }
    }
}

/// Outcome of a launch sequence.
#[derive(Debug)]
pub struct LaunchOutcome {
    /// Best-effort output captured from the last attempt; may be empty.
    pub output: String,
    /// Attempts actually made.
    pub attempts: u32,
}

/// Uploads and launches `script` detached on the host, retrying on empty
/// capture.
///
/// Empty captured output signals the upload/launch itself failed (a running
/// job produces at least the shell echo); it says nothing about the job's
/// eventual result. After the final failed attempt the task proceeds anyway —
/// the completion-flag wait will surface the real failure. Every attempt is
/// logged with its retry count for after-the-fact forensics.
pub async fn run_script_with_retry(
    shell: &dyn RemoteShell,
    host: &InstanceHandle,
    script: &str,
    remote_path: &str,
    log_path: &str,
    policy: RetryPolicy,
) -> LaunchOutcome {
    let total = policy.max_retries + 1;
    let mut last_output = String::new();

    for attempt in 1..=total {
        match shell.exec_detached(host, script, remote_path, log_path).await {
            Ok(output) if !output.trim().is_empty() => {
                tracing::info!(instance = %host.name, attempt, "script launched");
                return LaunchOutcome {
                    output,
                    attempts: attempt,
                };
            }
            Ok(output) => {
                tracing::warn!(instance = %host.name, attempt, of = total, "script launch captured no output");
                last_output = output;
            }
            Err(err) => {
                tracing::warn!(instance = %host.name, attempt, of = total, %err, "script launch failed");
            }
        }
        if attempt < total {
            tokio::time::sleep(policy.backoff).await;
        }
    }

    tracing::warn!(instance = %host.name, attempts = total, "launch retries exhausted, proceeding to completion wait");
    LaunchOutcome {
        output: last_output,
        attempts: total,
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::domain::SessionError;

    fn host() -> InstanceHandle {
        InstanceHandle {
            id: "i-1".into(),
            name: "bench-1".into(),
            region: "us-east-1".into(),
            hostname: "203.0.113.9".into(),
            username: "ubuntu".into(),
            key_file: PathBuf::from("/tmp/key.pem"),
        }
    }

    /// Shell that fails `exec_detached` a set number of times, then succeeds.
    struct FlakyShell {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RemoteShell for FlakyShell {
        async fn upload(&self, _: &InstanceHandle, _: &Path, _: &str) -> Result<(), SessionError> {
            unimplemented!()
        }
        async fn exec_detached(
            &self,
            _: &InstanceHandle,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<String, SessionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Ok(String::new())
            } else {
                Ok("nohup: appending output\n".to_owned())
            }
        }
        async fn path_exists(&self, _: &InstanceHandle, _: &str) -> Result<bool, SessionError> {
            unimplemented!()
        }
        async fn list_matching(
            &self,
            _: &InstanceHandle,
            _: &str,
        ) -> Result<Vec<String>, SessionError> {
            unimplemented!()
        }
        async fn download(
            &self,
            _: &InstanceHandle,
            _: &str,
            _: &Path,
            _: bool,
        ) -> Result<(), SessionError> {
            unimplemented!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success_does_not_retry() {
        let shell = FlakyShell {
            failures_before_success: 0,
            calls: AtomicU32::new(0),
        };
        let outcome = run_script_with_retry(
            &shell,
            &host(),
            "#!/bin/bash",
            "run.sh",
            "bench.log",
            RetryPolicy::default(),
        )
        .await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(shell.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded_at_max_retries_plus_one() {
        let shell = FlakyShell {
            failures_before_success: 10,
            calls: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_secs(10),
        };
        let outcome =
            run_script_with_retry(&shell, &host(), "#!/bin/bash", "run.sh", "bench.log", policy)
                .await;
        // max_retries = 2 → at most 3 upload/launch attempts, then fall through.
        assert_eq!(outcome.attempts, 3);
        assert_eq!(shell.calls.load(Ordering::SeqCst), 3);
        assert!(outcome.output.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_capture_triggers_retry_then_succeeds() {
        let shell = FlakyShell {
            failures_before_success: 1,
            calls: AtomicU32::new(0),
        };
        let outcome = run_script_with_retry(
            &shell,
            &host(),
            "#!/bin/bash",
            "run.sh",
            "bench.log",
            RetryPolicy::default(),
        )
        .await;
        assert_eq!(outcome.attempts, 2);
        assert!(!outcome.output.is_empty());
    }
}
