// SPDX-License-Identifier: GPL-3.0-only

//! Hugging Face model fetch with a content-addressed blob cache.
//!
//! Files land in the standard HF hub layout: blobs named by SHA-256 with
//! snapshot symlinks, so a cache shared with other tools is reused as-is.

use crate::models::WhisperModelId;
use anyhow::{Context, Result};
use futures_util::StreamExt;
use log::{debug, info, warn};
use ring::digest::{Context as DigestContext, SHA256};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const MODEL_FILES: [&str; 3] = ["config.json", "tokenizer.json", "model.safetensors"];
const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const CONNECT_TIMEOUT_SECS: u64 = 30;
const PROGRESS_LOG_BYTES: u64 = 64 * 1024 * 1024;

fn hf_url(model_id: &str, revision: &str, filename: &str) -> String {
    format!("https://huggingface.co/{model_id}/resolve/{revision}/{filename}")
}

/// Snapshot symlink path and blobs directory for one cached file.
fn cache_paths(model_id: &str, revision: &str, filename: &str) -> Result<(PathBuf, PathBuf)> {
    let cache_dir = dirs::cache_dir()
        .context("cannot determine cache directory")?
        .join("huggingface")
        .join("hub");

    let model_folder = format!("models--{}", model_id.replace('/', "--"));
    let snapshot_dir = cache_dir
        .join(&model_folder)
        .join("snapshots")
        .join(revision);

    Ok((snapshot_dir.join(filename), cache_dir.join(&model_folder).join("blobs")))
}

/// Resolve the local paths for a model's files, fetching anything missing.
/// Blocking; never call from inside an async runtime.
///
/// # Errors
///
/// Returns an error when the cache location is unavailable or a download
/// fails.
pub fn ensure_model_files(model: WhisperModelId) -> Result<Vec<PathBuf>> {
    if let Ok(paths) = cached_model_files(model) {
        return Ok(paths);
    }

    info!(
        "Downloading {} ({} MB approx)…",
        model,
        model.size_mb()
    );
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build download runtime")?;
    runtime.block_on(fetch_model_files(model))?;
    cached_model_files(model)
}

/// The cached paths for a model, erroring if any file is missing.
///
/// # Errors
///
/// Returns an error naming the first missing file.
pub fn cached_model_files(model: WhisperModelId) -> Result<Vec<PathBuf>> {
    let (model_id, revision) = model.model_and_revision();
    let mut paths = Vec::with_capacity(MODEL_FILES.len());
    for filename in MODEL_FILES {
        let (symlink_path, _) = cache_paths(model_id, revision, filename)?;
        if !symlink_path.exists() {
            anyhow::bail!("model file not found: {filename}");
        }
        paths.push(symlink_path);
    }
    Ok(paths)
}

async fn fetch_model_files(model: WhisperModelId) -> Result<()> {
    let (model_id, revision) = model.model_and_revision();
    for filename in MODEL_FILES {
        fetch_one(model_id, revision, filename).await?;
    }
    Ok(())
}

async fn fetch_one(model_id: &str, revision: &str, filename: &str) -> Result<()> {
    let (symlink_path, blobs_dir) = cache_paths(model_id, revision, filename)?;
    if symlink_path.exists() {
        info!("File already cached: {filename}");
        return Ok(());
    }

    let url = hf_url(model_id, revision, filename);
    fs::create_dir_all(&blobs_dir).await?;
    let blob_path = download_and_hash(&url, &blobs_dir).await?;

    if let Some(parent) = symlink_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    #[cfg(unix)]
    {
        // Relative link from snapshots/<revision>/ up to blobs/<sha256>.
        let mut relative = PathBuf::new();
        relative.push("..");
        relative.push("..");
        relative.push("blobs");
        relative.push(blob_path.file_name().context("blob path has no file name")?);
        if let Err(e) = std::os::unix::fs::symlink(&relative, &symlink_path) {
            warn!("Failed to create symlink for {filename}: {e}; copying instead");
            fs::copy(&blob_path, &symlink_path).await?;
        }
    }
    #[cfg(not(unix))]
    {
        fs::copy(&blob_path, &symlink_path).await?;
    }

    info!("Downloaded {filename}");
    Ok(())
}

/// Stream a URL into `blobs_dir`, hashing while writing, and finalize the
/// file under its SHA-256 name.
async fn download_and_hash(url: &str, blobs_dir: &Path) -> Result<PathBuf> {
    debug!("Downloading {url} into {}", blobs_dir.display());

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()?;

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        anyhow::bail!("download failed with status {}: {url}", response.status());
    }
    let total_bytes = response.content_length();

    let temp_path = blobs_dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
    let mut file = fs::File::create(&temp_path).await?;
    let mut stream = response.bytes_stream();
    let mut hasher = DigestContext::new(&SHA256);
    let mut downloaded: u64 = 0;
    let mut next_progress_log = PROGRESS_LOG_BYTES;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        if downloaded >= next_progress_log {
            match total_bytes {
                Some(total) => info!(
                    "Downloaded {} / {} MB",
                    downloaded / (1024 * 1024),
                    total / (1024 * 1024)
                ),
                None => info!("Downloaded {} MB", downloaded / (1024 * 1024)),
            }
            next_progress_log += PROGRESS_LOG_BYTES;
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    let digest = hasher.finish();
    let hash_hex = digest.as_ref().iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    });
    let final_path = blobs_dir.join(hash_hex);

    match fs::metadata(&final_path).await {
        Ok(md) if md.len() > 0 => {
            let _ = fs::remove_file(&temp_path).await;
        }
        _ => {
            fs::rename(&temp_path, &final_path).await?;
        }
    }

    debug!("Stored blob at {}", final_path.display());
    Ok(final_path)
}
