//! URL workload-config staging via ureq.

use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::application::ports::ConfigFetcher;
use crate::domain::RunError;

/// Downloads are capped so a misconfigured URL cannot fill the disk.
const MAX_CONFIG_BYTES: u64 = 64 * 1024 * 1024;

/// Blocking HTTP fetcher run on the blocking pool.
pub struct UreqFetcher;

#[async_trait]
impl ConfigFetcher for UreqFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, RunError> {
        let url = url.to_owned();
        let dest_dir = dest_dir.to_path_buf();
        let joined = tokio::task::spawn_blocking(move || fetch_blocking(&url, &dest_dir)).await;
        match joined {
            Ok(result) => result,
            Err(err) => Err(RunError::Resolution {
                reference: "<staging worker>".to_owned(),
                reason: err.to_string(),
            }),
        }
    }
}

fn fetch_blocking(url: &str, dest_dir: &Path) -> Result<PathBuf, RunError> {
    let resolution = |reason: String| RunError::Resolution {
        reference: url.to_owned(),
        reason,
    };

    let basename = url
        .rsplit('/')
        .next()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| resolution("URL has no file name component".to_owned()))?;

    std::fs::create_dir_all(dest_dir)
        .map_err(|err| resolution(format!("creating staging dir: {err}")))?;
    let local = dest_dir.join(basename);

    let response = ureq::get(url)
        .call()
        .map_err(|err| resolution(err.to_string()))?;

    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_CONFIG_BYTES)
        .read_to_end(&mut bytes)
        .map_err(|err| resolution(format!("reading body: {err}")))?;

    std::fs::write(&local, &bytes)
        .map_err(|err| resolution(format!("writing {}: {err}", local.display())))?;
    tracing::info!(url, local = %local.display(), "workload config staged");
    Ok(local)
}
