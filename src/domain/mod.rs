//! Pure domain types — no I/O, no async, no presentation.

pub mod error;
pub mod instance;
pub mod registry;
pub mod script;
pub mod spec;
pub mod task;

pub use error::{RunError, SessionError, SpecError, TaskError, TemplateError};
pub use instance::InstanceHandle;
pub use registry::ActiveInstanceRegistry;
pub use script::ScriptTemplate;
pub use spec::{InstanceSpec, RemoteLayout, ScriptParams, UploadSpec};
pub use task::{InstanceTask, RunRecord, TaskReport, TaskState};
