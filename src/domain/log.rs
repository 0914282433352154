//! Pipeline log entries.
//!
//! Every stage of a `process()` call records one entry. Entries are returned
//! to the caller and appended to the per-call JSONL log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single step record in a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineLogEntry {
    /// Stage this entry belongs to
    pub step: PipelineStep,

    /// Outcome of the stage
    pub status: LogStatus,

    /// Human-readable summary (NO secrets, NO transcript text)
    pub message: String,

    /// When this entry was recorded
    pub timestamp: DateTime<Utc>,

    /// Structured details (ids, durations, error strings)
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl PipelineLogEntry {
    /// Create a new entry with the current timestamp and empty meta
    pub fn new(step: PipelineStep, status: LogStatus, message: impl Into<String>) -> Self {
        Self {
            step,
            status,
            message: message.into(),
            timestamp: Utc::now(),
            meta: serde_json::Value::Object(Default::default()),
        }
    }

    /// Attach structured metadata
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    /// Record a duration in milliseconds under `durationMs`
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.insert_meta("durationMs", serde_json::json!(duration_ms));
        self
    }

    /// Record an error message under `error`
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.insert_meta("error", serde_json::Value::String(error.into()));
        self
    }

    fn insert_meta(&mut self, key: &str, value: serde_json::Value) {
        if !self.meta.is_object() {
            self.meta = serde_json::Value::Object(Default::default());
        }
        if let Some(map) = self.meta.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }
}

/// Pipeline stages, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    /// Webhook accepted and record looked up or created
    Ingest,

    /// Transcript obtained (or reused)
    Transcribe,

    /// Job fields extracted from the transcript
    Extract,

    /// Draft persisted onto the record
    Persist,

    /// Downstream materialization / confirmation outcome
    Notify,
}

/// Outcome of a pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Pending,
    Skipped,
    Completed,
    Failed,
}

impl Default for LogStatus {
    fn default() -> Self {
        Self::Pending
    }
}
