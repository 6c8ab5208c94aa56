//! Flag-polling protocol: bounded wait for a marker file on a remote host.

use std::time::Duration;

use crate::application::ports::RemoteShell;
use crate::domain::InstanceHandle;

/// Bounds for one polling loop.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub max_wait: Duration,
    pub interval: Duration,
}

impl PollPolicy {
    #[must_use]
    pub fn new(max_wait: Duration, interval: Duration) -> Self {
        Self { max_wait, interval }
    }
}

/// Polls for `marker` on `host` until it appears or `policy.max_wait` elapses.
///
/// The first check happens immediately, so an already-satisfied marker
/// returns `true` without sleeping. A failed check (connection refused,
/// auth hiccup while the host settles) counts as "not found yet" — only the
/// exhausted wait budget produces `false`, and that outcome is always
/// surfaced to the caller. Suspends only the calling task.
pub async fn wait_for_marker(
    shell: &dyn RemoteShell,
    host: &InstanceHandle,
    marker: &str,
    policy: PollPolicy,
) -> bool {
    let started = tokio::time::Instant::now();
    loop {
        match shell.path_exists(host, marker).await {
            Ok(true) => {
                tracing::info!(instance = %host.name, marker, elapsed_secs = started.elapsed().as_secs(), "marker observed");
                return true;
            }
            Ok(false) => {}
            Err(err) => {
                tracing::debug!(instance = %host.name, marker, %err, "poll check failed, treating as not found");
            }
        }
        if started.elapsed() >= policy.max_wait {
            tracing::warn!(instance = %host.name, marker, waited_secs = policy.max_wait.as_secs(), "marker never observed");
            return false;
        }
        tokio::time::sleep(policy.interval).await;
    }
}
