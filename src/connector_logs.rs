//! CI log connector.
//!
//! Walks a folder of build logs and splits each file into one chunk per
//! pipeline stage. A chunk starts at a line matching the stage marker
//! (Jenkins' `[Pipeline] stage: <name>` by default) and runs up to the next
//! marker or the end of the file. Lines before the first marker form a chunk
//! with stage `"unknown"`.
//!
//! Files are chunked on the blocking pool, at most `workers` at a time.
//! Output order is deterministic: files sorted by path, then chunks in file
//! order.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use regex::Regex;
use walkdir::WalkDir;

use commit_harness_core::models::LogChunk;

const UNKNOWN_STAGE: &str = "unknown";

/// Every file under `dir` whose extension is `extension`, sorted by path.
pub fn find_log_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("Log folder does not exist: {}", dir.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// Split one log's text into stage chunks.
pub fn chunk_log(text: &str, source: &str, marker: &Regex) -> Vec<LogChunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut stage = UNKNOWN_STAGE.to_string();

    for line in text.split_inclusive('\n') {
        if let Some(caps) = marker.captures(line) {
            if !current.is_empty() {
                chunks.push(LogChunk {
                    source: source.to_string(),
                    stage: stage.clone(),
                    text: std::mem::take(&mut current),
                    ordinal: chunks.len(),
                });
            }
            stage = caps
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_else(|| UNKNOWN_STAGE.to_string());
        }
        current.push_str(line);
    }

    if !current.is_empty() {
        chunks.push(LogChunk {
            source: source.to_string(),
            stage,
            text: current,
            ordinal: chunks.len(),
        });
    }

    chunks
}

/// Read and chunk one file. Invalid UTF-8 is replaced rather than rejected.
pub fn chunk_log_file(path: &Path, marker: &Regex) -> Result<Vec<LogChunk>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read log {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(chunk_log(&text, &path.display().to_string(), marker))
}

/// Find and chunk every log under `dir`, `workers` files at a time.
pub async fn chunk_all_logs(
    dir: &Path,
    extension: &str,
    marker: &Regex,
    workers: usize,
) -> Result<Vec<LogChunk>> {
    let files = find_log_files(dir, extension)?;
    tracing::debug!(dir = %dir.display(), files = files.len(), "log files found");

    let per_file: Vec<Result<Vec<LogChunk>>> = stream::iter(files)
        .map(|path| {
            let marker = marker.clone();
            async move {
                tokio::task::spawn_blocking(move || chunk_log_file(&path, &marker))
                    .await
                    .context("log chunking task failed")?
            }
        })
        .buffered(workers.max(1))
        .collect()
        .await;

    let mut chunks = Vec::new();
    for result in per_file {
        chunks.extend(result?);
    }

    tracing::info!(dir = %dir.display(), chunks = chunks.len(), "logs chunked");
    Ok(chunks)
}
