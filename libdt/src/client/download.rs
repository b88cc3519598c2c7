//! Fetches the platform-specific worker binary from the data transfer
//! service when no local binary is configured.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, info};
use tokio::io::AsyncWriteExt;

use crate::config::WorkerConfig;
use crate::error::DtError;
use crate::models::Status;
use crate::worker::ensure_executable;

#[cfg(windows)]
const BIN_EXT: &str = ".exe";
#[cfg(not(windows))]
const BIN_EXT: &str = "";

/// Ensures `config` points at a usable worker binary, downloading one from
/// the data transfer service if necessary. Downloads are keyed by the
/// service's build hash, so a matching cached binary is reused as-is.
pub(crate) async fn prepare_platform_binary(
    config: &WorkerConfig,
    download_dir: &Path,
    timeout: Duration,
) -> Result<(), DtError> {
    if let Some(path) = config.path() {
        if path.exists() {
            debug!("Using existing binary: {}", path.display());
            return Ok(());
        }
        return Err(DtError::Binary(format!(
            "binary not found: {}",
            path.display()
        )));
    }

    let base = config.data_transfer_url();
    let base = base.trim_end_matches('/');
    let session = reqwest::Client::builder()
        .danger_accept_invalid_certs(config.insecure())
        .timeout(timeout)
        .build()?;

    let resp = session
        .get(format!("{base}/"))
        .send()
        .await
        .map_err(|e| DtError::Connect(format!("failed to reach {base}: {e}")))?;
    if !resp.status().is_success() {
        return Err(DtError::Binary(format!(
            "service returned {} while checking for a worker binary",
            resp.status()
        )));
    }
    let status: Status = resp.json().await?;
    let hash = status
        .build_info
        .and_then(|b| b.version_hash)
        .unwrap_or_else(|| "unknown".to_string());

    let bin_dir = download_dir.join("worker");
    let bin_path = bin_dir.join(format!("dtworker-{hash}{BIN_EXT}"));
    if bin_path.exists() {
        debug!("Reusing downloaded binary: {}", bin_path.display());
        config.set_path(&bin_path);
        return Ok(());
    }

    let platform = platform_string()?;
    let url = format!("{base}/binaries/worker/{platform}/dtworker{BIN_EXT}");
    info!("Downloading worker binary from {url}");
    tokio::fs::create_dir_all(&bin_dir).await?;

    if let Err(e) = download_to(&session, &url, &bin_path).await {
        let _ = tokio::fs::remove_file(&bin_path).await;
        return Err(e);
    }

    ensure_executable(&bin_path)?;
    config.set_path(&bin_path);
    Ok(())
}

async fn download_to(
    session: &reqwest::Client,
    url: &str,
    path: &Path,
) -> Result<(), DtError> {
    let resp = session.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(DtError::Binary(format!(
            "binary download failed with {}",
            resp.status()
        )));
    }
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(())
}

fn platform_string() -> Result<String, DtError> {
    let os = match std::env::consts::OS {
        "linux" => "lin",
        "windows" => "win",
        "macos" => "darwin",
        other => {
            return Err(DtError::Binary(format!(
                "no worker binary available for OS {other}"
            )));
        }
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => {
            return Err(DtError::Binary(format!(
                "no worker binary available for arch {other}"
            )));
        }
    };
    Ok(format!("{os}-{arch}"))
}
