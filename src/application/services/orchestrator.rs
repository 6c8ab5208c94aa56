//! Fan-out scheduler: every instance task runs concurrently to a terminal
//! state.

use chrono::Utc;

use crate::application::services::lifecycle::{TaskContext, run_task};
use crate::domain::{InstanceTask, TaskReport, TaskState};

/// Runs all `tasks` concurrently and returns their terminal reports in input
/// order. Tasks whose spec disables deployment are dropped up front and
/// produce no report.
///
/// No ordering is imposed between instances and no task is aborted because a
/// sibling failed; the orchestrator's whole failure surface is the returned
/// report vector. Returns only after every task is `Done` or `Failed`.
pub async fn run_all(mut tasks: Vec<InstanceTask>, ctx: TaskContext) -> Vec<TaskReport> {
    tasks.retain(|task| {
        if !task.spec.deploy {
            tracing::info!(instance = %task.handle.name, "deploy disabled, skipping host");
        }
        task.spec.deploy
    });
    for task in &tasks {
        ctx.registry.insert(task.handle.clone());
    }

    let handles: Vec<_> = tasks
        .into_iter()
        .map(|task| {
            let ctx = ctx.clone();
            let name = task.handle.name.clone();
            let id = task.handle.id.clone();
            (name, id, tokio::spawn(run_task(task, ctx)))
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for (name, id, handle) in handles {
        match handle.await {
            Ok(report) => {
                debug_assert!(report.state.is_terminal());
                reports.push(report);
            }
            // A panicked task must not take its siblings down; report it
            // failed and keep draining.
            Err(err) => {
                tracing::error!(instance = %name, %err, "task panicked");
                reports.push(TaskReport {
                    id,
                    instance: name,
                    state: TaskState::Failed,
                    runs: Vec::new(),
                    error: Some(format!("task panicked: {err}")),
                    finished_at: Utc::now(),
                });
            }
        }
    }

    let still_active = ctx.registry.len();
    tracing::info!(
        tasks = reports.len(),
        still_registered = still_active,
        "fleet run finished"
    );
    reports
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::{ConfigFetcher, NullReporter, Provisioner, RemoteShell};
    use crate::application::services::exec::RetryPolicy;
    use crate::application::services::lifecycle::LifecyclePolicies;
    use crate::domain::{
        ActiveInstanceRegistry, InstanceHandle, InstanceSpec, RemoteLayout, RunError,
        ScriptParams, SessionError, TaskError,
    };

    /// Host whose boot flag appears after a fixed delay; completion is
    /// immediate once booted.
    struct DelayedBootShell {
        boot_delay: Duration,
        epoch: tokio::time::Instant,
    }

    #[async_trait]
    impl RemoteShell for DelayedBootShell {
        async fn upload(&self, _: &InstanceHandle, _: &Path, _: &str) -> Result<(), SessionError> {
            Ok(())
        }
        async fn exec_detached(
            &self,
            _: &InstanceHandle,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<String, SessionError> {
            Ok("launched\n".to_owned())
        }
        async fn path_exists(
            &self,
            _: &InstanceHandle,
            pattern: &str,
        ) -> Result<bool, SessionError> {
            if pattern.contains("startup") {
                Ok(self.epoch.elapsed() >= self.boot_delay)
            } else {
                Ok(true)
            }
        }
        async fn list_matching(
            &self,
            _: &InstanceHandle,
            _: &str,
        ) -> Result<Vec<String>, SessionError> {
            Ok(Vec::new())
        }
        async fn download(
            &self,
            _: &InstanceHandle,
            _: &str,
            _: &Path,
            _: bool,
        ) -> Result<(), SessionError> {
            Ok(())
        }
    }

    struct NoopProvisioner;

    #[async_trait]
    impl Provisioner for NoopProvisioner {
        async fn terminate(&self, _: &InstanceHandle) -> Result<(), TaskError> {
            Ok(())
        }
    }

    struct NoFetch;

    #[async_trait]
    impl ConfigFetcher for NoFetch {
        async fn fetch(&self, url: &str, _: &Path) -> Result<PathBuf, RunError> {
            Err(RunError::Resolution {
                reference: url.to_owned(),
                reason: "fetch disabled in tests".to_owned(),
            })
        }
    }

    fn handle(id: &str) -> InstanceHandle {
        InstanceHandle {
            id: id.to_owned(),
            name: format!("host-{id}"),
            region: "us-east-1".to_owned(),
            hostname: "203.0.113.7".to_owned(),
            username: "ubuntu".to_owned(),
            key_file: PathBuf::from("/tmp/key.pem"),
        }
    }

    fn spec(dir: &Path, boot_timeout: Duration) -> InstanceSpec {
        let script = dir.join("run.sh");
        std::fs::write(&script, "bench {config_file}\n").expect("write script");
        let config = dir.join("cfg.yml");
        std::fs::write(&config, "workload: x\n").expect("write config");
        InstanceSpec {
            deploy: true,
            workload_configs: vec![config.to_string_lossy().into_owned()],
            post_run_script: script,
            uploads: Vec::new(),
            completion_timeout: Duration::from_secs(30),
            boot_timeout,
            params: ScriptParams::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_boot_failure_does_not_disturb_the_other_task() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        // Boot appears at 5s; boot budget is 10s. A second host never boots.
        let shell = Arc::new(DelayedBootShell {
            boot_delay: Duration::from_secs(5),
            epoch: tokio::time::Instant::now(),
        });
        let ctx = TaskContext {
            shell,
            provisioner: Arc::new(NoopProvisioner),
            fetcher: Arc::new(NoFetch),
            registry: Arc::new(ActiveInstanceRegistry::new()),
            reporter: Arc::new(NullReporter),
            policies: Arc::new(LifecyclePolicies {
                poll_interval: Duration::from_secs(1),
                retry: RetryPolicy {
                    max_retries: 0,
                    backoff: Duration::from_secs(1),
                },
                layout: RemoteLayout::default(),
                results_root: dir.path().to_path_buf(),
                staging_dir: dir.path().join("staging"),
                teardown: false,
            }),
        };

        let fast = InstanceTask::new(handle("i-fast"), spec(dir.path(), Duration::from_secs(10)));
        // Same 5s boot delay, but a 3s budget — this one times out at boot.
        let slow = InstanceTask::new(handle("i-slow"), spec(dir.path(), Duration::from_secs(3)));

        let started = tokio::time::Instant::now();
        let reports = run_all(vec![fast, slow], ctx).await;
        let elapsed = started.elapsed();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].instance, "host-i-fast");
        assert_eq!(reports[0].state, TaskState::Done);
        assert_eq!(reports[1].state, TaskState::Failed);
        // Both bounded by the slower task's own budget, not the sum.
        assert!(elapsed < Duration::from_secs(15), "took {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_host_is_skipped_without_a_report() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let shell = Arc::new(DelayedBootShell {
            boot_delay: Duration::ZERO,
            epoch: tokio::time::Instant::now(),
        });
        let ctx = TaskContext {
            shell,
            provisioner: Arc::new(NoopProvisioner),
            fetcher: Arc::new(NoFetch),
            registry: Arc::new(ActiveInstanceRegistry::new()),
            reporter: Arc::new(NullReporter),
            policies: Arc::new(LifecyclePolicies {
                poll_interval: Duration::from_secs(1),
                retry: RetryPolicy {
                    max_retries: 0,
                    backoff: Duration::from_secs(1),
                },
                layout: RemoteLayout::default(),
                results_root: dir.path().to_path_buf(),
                staging_dir: dir.path().join("staging"),
                teardown: false,
            }),
        };

        let active = InstanceTask::new(handle("i-on"), spec(dir.path(), Duration::from_secs(10)));
        let mut parked_spec = spec(dir.path(), Duration::from_secs(10));
        parked_spec.deploy = false;
        let parked = InstanceTask::new(handle("i-off"), parked_spec);

        let reports = run_all(vec![active, parked], ctx.clone()).await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].instance, "host-i-on");
        assert!(
            !ctx.registry.contains("i-off"),
            "skipped host must never be registered"
        );
    }
}
