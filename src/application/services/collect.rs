//! Result collection from a finished (or given-up-on) host.

use std::path::Path;

use crate::application::ports::RemoteShell;
use crate::domain::{InstanceHandle, RemoteLayout};

/// What collection managed to retrieve.
#[derive(Debug, Default, Clone, Copy)]
pub struct CollectOutcome {
    /// Result directories downloaded.
    pub artifacts: usize,
    /// Whether the remote log file came back.
    pub log_fetched: bool,
}

fn basename(remote: &str) -> &str {
    remote.rsplit('/').next().unwrap_or(remote)
}

/// Downloads everything matching the results glob plus the remote log file
/// into `local_root/<instance name>/`.
///
/// The log fetch happens unconditionally — a host whose completion flag was
/// never observed still yields its log for forensics. Zero glob matches is
/// not an error here; that failure is visible through the absent completion
/// flag, not through this collector.
pub async fn collect_artifacts(
    shell: &dyn RemoteShell,
    host: &InstanceHandle,
    layout: &RemoteLayout,
    local_root: &Path,
) -> CollectOutcome {
    let dest = local_root.join(&host.name);
    if let Err(err) = std::fs::create_dir_all(&dest) {
        tracing::error!(instance = %host.name, dir = %dest.display(), %err, "cannot create local results directory");
        return CollectOutcome::default();
    }

    let mut outcome = CollectOutcome::default();

    match shell.list_matching(host, &layout.results_glob).await {
        Ok(matches) if matches.is_empty() => {
            tracing::warn!(instance = %host.name, glob = %layout.results_glob, "no result artifacts on host");
        }
        Ok(matches) => {
            for remote in matches {
                let local = dest.join(basename(&remote));
                match shell.download(host, &remote, &local, true).await {
                    Ok(()) => {
                        tracing::info!(instance = %host.name, %remote, local = %local.display(), "artifact downloaded");
                        outcome.artifacts += 1;
                    }
                    Err(err) => {
                        tracing::warn!(instance = %host.name, %remote, %err, "artifact download failed");
                    }
                }
            }
        }
        Err(err) => {
            tracing::warn!(instance = %host.name, glob = %layout.results_glob, %err, "listing result artifacts failed");
        }
    }

    let log_local = dest.join(basename(&layout.log_path));
    match shell
        .download(host, &layout.log_path, &log_local, false)
        .await
    {
        Ok(()) => outcome.log_fetched = true,
        Err(err) => {
            tracing::warn!(instance = %host.name, log = %layout.log_path, %err, "log retrieval failed");
        }
    }

    outcome
}
