//! Append-only pipeline log with file-based persistence.
//!
//! Each call gets its own newline-delimited JSON file at
//! `<logs_dir>/<user_id>/<call_sid>.jsonl`. Re-processing the same call
//! appends, so the file is a full history of every attempt.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::PipelineLogEntry;

/// File-based log store using JSONL format
pub struct PipelineLogStore {
    /// Root directory holding one sub-directory per user
    base_dir: PathBuf,
}

impl PipelineLogStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Path to the log file for one call
    pub fn log_path(&self, user_id: &str, call_sid: &str) -> PathBuf {
        self.base_dir
            .join(sanitize_component(user_id))
            .join(format!("{}.jsonl", sanitize_component(call_sid)))
    }

    /// Append entries in order
    pub async fn append(
        &self,
        user_id: &str,
        call_sid: &str,
        entries: &[PipelineLogEntry],
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let path = self.log_path(user_id, call_sid);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;

        let mut buf = String::new();
        for entry in entries {
            let json = serde_json::to_string(entry).context("Failed to serialize log entry")?;
            buf.push_str(&json);
            buf.push('\n');
        }

        file.write_all(buf.as_bytes())
            .await
            .context("Failed to write log entries")?;
        file.flush().await.context("Failed to flush log entries")?;

        Ok(())
    }

    /// Replay all entries for one call in order
    pub async fn replay(&self, user_id: &str, call_sid: &str) -> Result<Vec<PipelineLogEntry>> {
        let path = self.log_path(user_id, call_sid);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut entries = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let entry: PipelineLogEntry = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse log entry: {}", line))?;
            entries.push(entry);
        }

        Ok(entries)
    }
}

/// Keep ids usable as single path components
fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
