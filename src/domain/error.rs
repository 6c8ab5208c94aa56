//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use std::time::Duration;

use thiserror::Error;

// ── Transport errors ──────────────────────────────────────────────────────────

/// Failures of a single remote-shell operation against one host.
///
/// These are transient at the call sites that matter: flag polling treats any
/// variant as "marker not observed yet" and script execution retries within
/// its local budget. They never cross task boundaries.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication failed for {user}@{host}: {reason}")]
    Auth {
        host: String,
        user: String,
        reason: String,
    },

    #[error("cannot reach {host}: {reason}")]
    Network { host: String, reason: String },

    #[error("remote operation on {host} failed: {reason}")]
    Remote { host: String, reason: String },
}

// ── Task-fatal errors ─────────────────────────────────────────────────────────

/// Errors that move an instance task to the `Failed` state.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("host did not signal boot readiness within {}s", timeout.as_secs())]
    BootTimeout { timeout: Duration },

    #[error("provisioning operation failed: {0}")]
    Provisioning(String),
}

// ── Per-iteration errors ──────────────────────────────────────────────────────

/// Errors confined to one workload-config iteration.
///
/// A `RunError` fails that iteration only: the lifecycle records it, still
/// collects whatever artifacts exist, and moves on to the next config.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot resolve workload config '{reference}': {reason}")]
    Resolution { reference: String, reason: String },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

// ── Script template errors ────────────────────────────────────────────────────

/// Rendering failures of the post-run script template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("script template left placeholder '{{{name}}}' unresolved")]
    Unresolved { name: String },
}

// ── Spec construction errors ──────────────────────────────────────────────────

/// Validation failures when building an instance spec from raw config.
///
/// Fatal for that instance only; the rest of the fleet proceeds.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("instance '{instance}' is missing required field '{field}'")]
    MissingField { instance: String, field: String },

    #[error("instance '{instance}' has invalid '{field}': {reason}")]
    InvalidField {
        instance: String,
        field: String,
        reason: String,
    },
}

impl SpecError {
    pub fn missing(instance: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            instance: instance.into(),
            field: field.into(),
        }
    }
}
