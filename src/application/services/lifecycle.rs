//! Lifecycle state machine for one instance task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::application::ports::{ConfigFetcher, ProgressReporter, Provisioner, RemoteShell};
use crate::application::services::collect::collect_artifacts;
use crate::application::services::exec::{RetryPolicy, run_script_with_retry};
use crate::application::services::poll::{PollPolicy, wait_for_marker};
use crate::domain::{
    ActiveInstanceRegistry, InstanceHandle, InstanceTask, RemoteLayout, RunError, RunRecord,
    ScriptTemplate, TaskError, TaskReport, TaskState,
};

/// Policy knobs shared by every task in one deployment.
#[derive(Debug, Clone)]
pub struct LifecyclePolicies {
    /// Interval between marker checks (boot and completion).
    pub poll_interval: Duration,
    /// Retry bounds for detached script launches.
    pub retry: RetryPolicy,
    /// Well-known paths on each host.
    pub layout: RemoteLayout,
    /// Local directory results are collected under (one subdir per instance).
    pub results_root: PathBuf,
    /// Local staging directory for URL workload configs.
    pub staging_dir: PathBuf,
    /// Whether teardown terminates the instance after its configs ran.
    pub teardown: bool,
}

/// Everything a task needs besides its own state; cheap to clone per spawn.
#[derive(Clone)]
pub struct TaskContext {
    pub shell: Arc<dyn RemoteShell>,
    pub provisioner: Arc<dyn Provisioner>,
    pub fetcher: Arc<dyn ConfigFetcher>,
    pub registry: Arc<ActiveInstanceRegistry>,
    pub reporter: Arc<dyn ProgressReporter>,
    pub policies: Arc<LifecyclePolicies>,
}

/// Drives one task from `Registered` to `Done` or `Failed`.
///
/// Boot timeout is the only abort path: a host that never signals readiness
/// is unusable and the task fails without running any workload. Failures
/// inside the per-config loop are recorded on that run, artifact collection
/// still happens, and the loop continues — a broken workload on a reachable
/// host must not block retrieving diagnostics for it or later configs.
pub async fn run_task(mut task: InstanceTask, ctx: TaskContext) -> TaskReport {
    let host = task.handle.clone();
    let policies = &*ctx.policies;

    task.transition(TaskState::AwaitingBoot);
    ctx.reporter
        .step(&format!("{host}: waiting for boot readiness..."));
    let boot_policy = PollPolicy::new(task.spec.boot_timeout, policies.poll_interval);
    if !wait_for_marker(&*ctx.shell, &host, &policies.layout.boot_flag, boot_policy).await {
        let err = TaskError::BootTimeout {
            timeout: task.spec.boot_timeout,
        };
        ctx.reporter.warn(&format!("{}: {err}", host.name));
        task.last_error = Some(err.to_string());
        task.transition(TaskState::Failed);
        return task.into_report(Utc::now());
    }
    ctx.reporter.success(&format!("{}: host ready", host.name));

    let template = match tokio::fs::read_to_string(&task.spec.post_run_script).await {
        Ok(body) => Ok(ScriptTemplate::new(body)),
        Err(err) => Err(format!(
            "cannot read post-run script {}: {err}",
            task.spec.post_run_script.display()
        )),
    };

    let configs = task.spec.workload_configs.clone();
    for config in &configs {
        let record = run_one_config(&mut task, &host, config, template.as_ref(), &ctx).await;
        if let Some(err) = &record.error {
            ctx.reporter
                .warn(&format!("{}: config '{config}' failed: {err}", host.name));
        } else if record.completed {
            ctx.reporter.success(&format!(
                "{}: config '{config}' complete ({} artifacts)",
                host.name, record.artifacts
            ));
        } else {
            ctx.reporter.warn(&format!(
                "{}: config '{config}' did not complete in time",
                host.name
            ));
        }
        task.runs.push(record);
    }

    task.transition(TaskState::Teardown);
    if policies.teardown {
        ctx.reporter
            .step(&format!("{}: terminating instance...", host.name));
        match ctx.provisioner.terminate(&host).await {
            Ok(()) => {
                ctx.registry.remove(&host.id);
            }
            Err(err) => {
                tracing::error!(instance = %host.name, %err, "teardown failed");
                task.last_error = Some(err.to_string());
                task.transition(TaskState::Failed);
                return task.into_report(Utc::now());
            }
        }
    }

    task.transition(TaskState::Done);
    task.into_report(Utc::now())
}

/// One iteration of the per-config loop.
///
/// On error, execution and the completion wait are skipped, but collection
/// still runs so the log (and any partial output) comes back.
async fn run_one_config(
    task: &mut InstanceTask,
    host: &InstanceHandle,
    config: &str,
    template: Result<&ScriptTemplate, &String>,
    ctx: &TaskContext,
) -> RunRecord {
    let policies = &*ctx.policies;
    let mut completed = false;

    let launch = async {
        task.transition(TaskState::UploadingArtifacts);
        let remote_config = stage_and_upload(task, host, config, ctx).await?;

        task.transition(TaskState::Executing);
        let template = template.map_err(|err| RunError::Resolution {
            reference: task.spec.post_run_script.display().to_string(),
            reason: err.clone(),
        })?;
        let script = template.render(&remote_config, &task.spec.params)?;
        let outcome = run_script_with_retry(
            &*ctx.shell,
            host,
            &script,
            &policies.layout.script_path,
            &policies.layout.log_path,
            policies.retry,
        )
        .await;
        Ok::<u32, RunError>(outcome.attempts)
    }
    .await;

    if launch.is_ok() {
        task.transition(TaskState::AwaitingCompletion);
        let completion = PollPolicy::new(task.spec.completion_timeout, policies.poll_interval);
        completed = wait_for_marker(
            &*ctx.shell,
            host,
            &policies.layout.completion_flag,
            completion,
        )
        .await;
    }

    task.transition(TaskState::CollectingArtifacts);
    let collected =
        collect_artifacts(&*ctx.shell, host, &policies.layout, &policies.results_root).await;

    RunRecord {
        config: config.to_owned(),
        completed,
        attempts: *launch.as_ref().unwrap_or(&0),
        artifacts: collected.artifacts,
        log_fetched: collected.log_fetched,
        error: launch.err().map(|e| e.to_string()),
    }
}

/// Resolves a workload-config reference to a local file and pushes it (plus
/// any declared extra uploads) to the host. Returns the remote config path
/// the rendered script will see.
async fn stage_and_upload(
    task: &InstanceTask,
    host: &InstanceHandle,
    config: &str,
    ctx: &TaskContext,
) -> Result<String, RunError> {
    let local = if config.starts_with("http://") || config.starts_with("https://") {
        ctx.fetcher.fetch(config, &ctx.policies.staging_dir).await?
    } else {
        let path = PathBuf::from(config);
        if !path.is_file() {
            return Err(RunError::Resolution {
                reference: config.to_owned(),
                reason: "no such local file".to_owned(),
            });
        }
        path
    };

    let basename = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| RunError::Resolution {
            reference: config.to_owned(),
            reason: "reference has no file name".to_owned(),
        })?;

    // Uploaded relative to the login home, and referenced the same way: the
    // detached script runs from that home too, so no absolute home path is
    // ever synthesized (root's home is not under /home).
    ctx.shell.upload(host, &local, &basename).await?;

    for upload in &task.spec.uploads {
        ctx.shell.upload(host, &upload.local, &upload.remote).await?;
    }

    Ok(basename)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::NullReporter;
    use crate::domain::{InstanceSpec, ScriptParams, SessionError};

    fn handle() -> InstanceHandle {
        InstanceHandle {
            id: "i-1".into(),
            name: "bench-1".into(),
            region: "us-east-1".into(),
            hostname: "203.0.113.9".into(),
            username: "ubuntu".into(),
            key_file: PathBuf::from("/tmp/key.pem"),
        }
    }

    fn spec(dir: &Path, config_exists: bool) -> InstanceSpec {
        let script = dir.join("run.sh");
        std::fs::File::create(&script)
            .and_then(|mut f| f.write_all(b"bench --config {config_file} {extra_args}\n"))
            .expect("write script");
        let config = dir.join("small.yml");
        if config_exists {
            std::fs::write(&config, "workload: small\n").expect("write config");
        }
        InstanceSpec {
            deploy: true,
            workload_configs: vec![config.to_string_lossy().into_owned()],
            post_run_script: script,
            uploads: Vec::new(),
            completion_timeout: Duration::from_secs(20),
            boot_timeout: Duration::from_secs(10),
            params: ScriptParams::default(),
        }
    }

    /// Configurable fake host: marker presence per flag, exec call counting.
    struct FakeShell {
        boot_ready: bool,
        completes: bool,
        exec_calls: AtomicU32,
        uploads: Mutex<Vec<String>>,
        scripts: Mutex<Vec<String>>,
    }

    impl FakeShell {
        fn new(boot_ready: bool, completes: bool) -> Self {
            Self {
                boot_ready,
                completes,
                exec_calls: AtomicU32::new(0),
                uploads: Mutex::new(Vec::new()),
                scripts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteShell for FakeShell {
        async fn upload(
            &self,
            _: &InstanceHandle,
            _: &Path,
            remote: &str,
        ) -> Result<(), SessionError> {
            self.uploads.lock().expect("lock").push(remote.to_owned());
            Ok(())
        }
        async fn exec_detached(
            &self,
            _: &InstanceHandle,
            script: &str,
            _: &str,
            _: &str,
        ) -> Result<String, SessionError> {
            self.exec_calls.fetch_add(1, Ordering::SeqCst);
            self.scripts.lock().expect("lock").push(script.to_owned());
            Ok("launched\n".to_owned())
        }
        async fn path_exists(
            &self,
            _: &InstanceHandle,
            pattern: &str,
        ) -> Result<bool, SessionError> {
            if pattern.contains("startup") {
                Ok(self.boot_ready)
            } else {
                Ok(self.completes)
            }
        }
        async fn list_matching(
            &self,
            _: &InstanceHandle,
            _: &str,
        ) -> Result<Vec<String>, SessionError> {
            Ok(if self.completes {
                vec!["/home/ubuntu/results-small".to_owned()]
            } else {
                Vec::new()
            })
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

    struct CountingProvisioner {
        terminated: AtomicU32,
    }

    #[async_trait]
    impl Provisioner for CountingProvisioner {
        async fn terminate(&self, _: &InstanceHandle) -> Result<(), TaskError> {
            self.terminated.fetch_add(1, Ordering::SeqCst);
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

    fn ctx(
        shell: Arc<FakeShell>,
        provisioner: Arc<CountingProvisioner>,
        results_root: PathBuf,
        teardown: bool,
    ) -> TaskContext {
        TaskContext {
            shell,
            provisioner,
            fetcher: Arc::new(NoFetch),
            registry: Arc::new(ActiveInstanceRegistry::new()),
            reporter: Arc::new(NullReporter),
            policies: Arc::new(LifecyclePolicies {
                poll_interval: Duration::from_secs(2),
                retry: RetryPolicy {
                    max_retries: 1,
                    backoff: Duration::from_secs(1),
                },
                layout: RemoteLayout::default(),
                results_root,
                staging_dir: PathBuf::from("staging"),
                teardown,
            }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn boot_timeout_fails_without_running_workload() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let shell = Arc::new(FakeShell::new(false, false));
        let prov = Arc::new(CountingProvisioner {
            terminated: AtomicU32::new(0),
        });
        let ctx = ctx(shell.clone(), prov.clone(), dir.path().to_path_buf(), true);
        ctx.registry.insert(handle());

        let task = InstanceTask::new(handle(), spec(dir.path(), true));
        let report = run_task(task, ctx.clone()).await;

        assert_eq!(report.state, TaskState::Failed);
        assert!(report.runs.is_empty(), "no workload may run after boot timeout");
        assert_eq!(shell.exec_calls.load(Ordering::SeqCst), 0);
        assert_eq!(prov.terminated.load(Ordering::SeqCst), 0);
        assert!(ctx.registry.contains("i-1"), "failed host stays registered");
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_reaches_done_and_tears_down() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let shell = Arc::new(FakeShell::new(true, true));
        let prov = Arc::new(CountingProvisioner {
            terminated: AtomicU32::new(0),
        });
        let ctx = ctx(shell.clone(), prov.clone(), dir.path().to_path_buf(), true);
        ctx.registry.insert(handle());

        let task = InstanceTask::new(handle(), spec(dir.path(), true));
        let report = run_task(task, ctx.clone()).await;

        assert_eq!(report.state, TaskState::Done);
        assert!(report.succeeded());
        assert_eq!(report.runs.len(), 1);
        assert!(report.runs[0].completed);
        assert_eq!(report.runs[0].attempts, 1);
        assert_eq!(report.runs[0].artifacts, 1);
        assert!(report.runs[0].log_fetched);
        assert_eq!(prov.terminated.load(Ordering::SeqCst), 1);
        assert!(!ctx.registry.contains("i-1"), "teardown removes the id");

        // The config is referenced relative to the login home, never through
        // a synthesized absolute home path.
        let scripts = shell.scripts.lock().expect("lock");
        assert!(scripts[0].contains("--config small.yml"));
        assert!(!scripts[0].contains("/home/"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_config_fails_iteration_but_still_collects_log() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let shell = Arc::new(FakeShell::new(true, false));
        let prov = Arc::new(CountingProvisioner {
            terminated: AtomicU32::new(0),
        });
        let ctx = ctx(shell.clone(), prov.clone(), dir.path().to_path_buf(), false);

        let task = InstanceTask::new(handle(), spec(dir.path(), false));
        let report = run_task(task, ctx).await;

        // Resolution failure is not fatal to the task.
        assert_eq!(report.state, TaskState::Done);
        assert!(!report.succeeded());
        assert_eq!(report.runs.len(), 1);
        assert!(report.runs[0].error.as_deref().is_some_and(|e| e.contains("no such local file")));
        assert!(report.runs[0].log_fetched, "log retrieval must still happen");
        assert_eq!(report.runs[0].attempts, 0);
        assert_eq!(shell.exec_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_timeout_is_recorded_not_fatal() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let shell = Arc::new(FakeShell::new(true, false));
        let prov = Arc::new(CountingProvisioner {
            terminated: AtomicU32::new(0),
        });
        let ctx = ctx(shell.clone(), prov.clone(), dir.path().to_path_buf(), true);
        ctx.registry.insert(handle());

        let task = InstanceTask::new(handle(), spec(dir.path(), true));
        let report = run_task(task, ctx.clone()).await;

        assert_eq!(report.state, TaskState::Done);
        assert!(!report.runs[0].completed);
        assert!(report.runs[0].log_fetched);
        // Teardown still runs for an incomplete-but-finished task.
        assert_eq!(prov.terminated.load(Ordering::SeqCst), 1);
    }
}
