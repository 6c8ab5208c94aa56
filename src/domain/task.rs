//! Per-instance unit of work and its lifecycle states.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::instance::InstanceHandle;
use crate::domain::spec::InstanceSpec;

/// Lifecycle states of one instance task.
///
/// The per-config loop (`UploadingArtifacts` through `CollectingArtifacts`)
/// repeats once per workload config. `Failed` is absorbing and reachable only
/// from `AwaitingBoot` (boot timeout), task construction, or a failed
/// teardown — failures inside the per-config loop are recorded on the run,
/// not fatal to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Registered,
    AwaitingBoot,
    UploadingArtifacts,
    Executing,
    AwaitingCompletion,
    CollectingArtifacts,
    Teardown,
    Done,
    Failed,
}

impl TaskState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Registered => "registered",
            Self::AwaitingBoot => "awaiting-boot",
            Self::UploadingArtifacts => "uploading-artifacts",
            Self::Executing => "executing",
            Self::AwaitingCompletion => "awaiting-completion",
            Self::CollectingArtifacts => "collecting-artifacts",
            Self::Teardown => "teardown",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one workload-config iteration.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    /// The config reference this iteration ran.
    pub config: String,
    /// Whether the completion flag was observed within the timeout.
    pub completed: bool,
    /// Launch attempts made for this iteration (0 if launch was never
    /// reached).
    pub attempts: u32,
    /// Number of result artifacts downloaded.
    pub artifacts: usize,
    /// Whether the remote log file was retrieved.
    pub log_fetched: bool,
    /// Error that failed this iteration, if any.
    pub error: Option<String>,
}

/// The core's mutable unit of work: one handle, one spec, one state machine.
///
/// Owned exclusively by the coroutine executing it; the registry holds only
/// the handle.
#[derive(Debug)]
pub struct InstanceTask {
    pub handle: InstanceHandle,
    pub spec: InstanceSpec,
    pub state: TaskState,
    pub last_error: Option<String>,
    pub runs: Vec<RunRecord>,
}

impl InstanceTask {
    #[must_use]
    pub fn new(handle: InstanceHandle, spec: InstanceSpec) -> Self {
        Self {
            handle,
            spec,
            state: TaskState::Registered,
            last_error: None,
            runs: Vec::new(),
        }
    }

    /// Transition to `state`, tracing the edge.
    pub fn transition(&mut self, state: TaskState) {
        tracing::debug!(instance = %self.handle.name, from = %self.state, to = %state, "state transition");
        self.state = state;
    }

    /// Produce the terminal report for this task.
    #[must_use]
    pub fn into_report(self, finished_at: DateTime<Utc>) -> TaskReport {
        TaskReport {
            id: self.handle.id,
            instance: self.handle.name,
            state: self.state,
            runs: self.runs,
            error: self.last_error,
            finished_at,
        }
    }
}

/// Terminal summary of one task, returned by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: String,
    pub instance: String,
    pub state: TaskState,
    pub runs: Vec<RunRecord>,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl TaskReport {
    /// A task is successful only when it reached `Done` and every run
    /// observed its completion flag.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Done && self.runs.iter().all(|r| r.completed && r.error.is_none())
    }
}
