//! Voicemail records and the webhook that creates them.
//!
//! A record is created once per (call_sid, user_id) and mutated in place as
//! the pipeline advances it through its states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::extraction::JobExtraction;
use super::log::PipelineLogEntry;

/// Pipeline state of a voicemail record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoicemailStatus {
    Pending,
    Transcribing,
    Transcribed,
    Processed,
    Failed,
}

impl VoicemailStatus {
    fn rank(&self) -> u8 {
        match self {
            VoicemailStatus::Pending => 0,
            VoicemailStatus::Transcribing => 1,
            VoicemailStatus::Transcribed => 2,
            VoicemailStatus::Processed => 3,
            VoicemailStatus::Failed => 4,
        }
    }

    /// Status only moves forward, except that anything non-terminal may fail.
    /// Re-asserting the current status is allowed.
    pub fn can_transition_to(&self, next: VoicemailStatus) -> bool {
        if *self == next {
            return true;
        }
        match (self, next) {
            (VoicemailStatus::Failed, _) => false,
            (VoicemailStatus::Processed, VoicemailStatus::Failed) => false,
            (_, VoicemailStatus::Failed) => true,
            _ => next.rank() > self.rank(),
        }
    }

    /// True when `next` moves the record strictly forward
    pub fn advances_to(&self, next: VoicemailStatus) -> bool {
        *self != next && self.can_transition_to(next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoicemailStatus::Pending => "pending",
            VoicemailStatus::Transcribing => "transcribing",
            VoicemailStatus::Transcribed => "transcribed",
            VoicemailStatus::Processed => "processed",
            VoicemailStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(VoicemailStatus::Pending),
            "transcribing" => Some(VoicemailStatus::Transcribing),
            "transcribed" => Some(VoicemailStatus::Transcribed),
            "processed" => Some(VoicemailStatus::Processed),
            "failed" => Some(VoicemailStatus::Failed),
            _ => None,
        }
    }
}

impl Default for VoicemailStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for VoicemailStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted representation of one inbound call's recording, transcript and draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicemailRecord {
    pub id: Uuid,
    pub call_sid: String,
    pub user_id: String,
    pub from_number: String,
    pub to_number: String,
    pub recording_url: String,
    pub recording_sid: Option<String>,
    /// Recording length in seconds
    pub recording_duration: Option<u32>,
    pub status: VoicemailStatus,
    pub transcript: Option<String>,
    pub transcript_confidence: Option<f64>,
    pub transcript_vendor: Option<String>,
    pub job_draft: Option<JobExtraction>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VoicemailRecord {
    /// Build a fresh `pending` record from creation input
    pub fn from_new(input: NewVoicemail) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            call_sid: input.call_sid,
            user_id: input.user_id,
            from_number: input.from_number,
            to_number: input.to_number,
            recording_url: input.recording_url,
            recording_sid: input.recording_sid,
            recording_duration: input.recording_duration,
            status: VoicemailStatus::Pending,
            transcript: None,
            transcript_confidence: None,
            transcript_vendor: None,
            job_draft: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update in place. Fields left `None` are untouched;
    /// `updated_at` is always refreshed.
    pub fn apply(&mut self, update: VoicemailUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(transcript) = update.transcript {
            self.transcript = Some(transcript);
        }
        if let Some(confidence) = update.transcript_confidence {
            self.transcript_confidence = Some(confidence);
        }
        if let Some(vendor) = update.transcript_vendor {
            self.transcript_vendor = Some(vendor);
        }
        if let Some(draft) = update.job_draft {
            self.job_draft = Some(draft);
        }
        if let Some(error) = update.last_error {
            self.last_error = Some(error);
        }
        self.updated_at = Utc::now();
    }

    /// Persisted transcript, if one is present and non-empty
    pub fn stored_transcript(&self) -> Option<&str> {
        self.transcript
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }
}

/// Input for creating a voicemail record
#[derive(Debug, Clone, PartialEq)]
pub struct NewVoicemail {
    pub call_sid: String,
    pub user_id: String,
    pub from_number: String,
    pub to_number: String,
    pub recording_url: String,
    pub recording_sid: Option<String>,
    pub recording_duration: Option<u32>,
}

impl From<&VoicemailWebhookInput> for NewVoicemail {
    fn from(webhook: &VoicemailWebhookInput) -> Self {
        Self {
            call_sid: webhook.call_sid.clone(),
            user_id: webhook.user_id.clone(),
            from_number: webhook.from.clone(),
            to_number: webhook.to.clone(),
            recording_url: webhook.recording_url.clone(),
            recording_sid: webhook.recording_sid.clone(),
            recording_duration: webhook.recording_duration,
        }
    }
}

/// Partial update for a voicemail record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoicemailUpdate {
    pub status: Option<VoicemailStatus>,
    pub transcript: Option<String>,
    pub transcript_confidence: Option<f64>,
    pub transcript_vendor: Option<String>,
    pub job_draft: Option<JobExtraction>,
    pub last_error: Option<String>,
}

impl VoicemailUpdate {
    pub fn status(status: VoicemailStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(VoicemailStatus::Failed),
            last_error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Inbound call webhook, as posted by the telephony provider.
///
/// Accepts camelCase field names and Twilio's PascalCase parameter names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicemailWebhookInput {
    #[serde(alias = "CallSid")]
    pub call_sid: String,

    pub user_id: String,

    #[serde(alias = "From")]
    pub from: String,

    #[serde(alias = "To")]
    pub to: String,

    #[serde(default, alias = "RecordingUrl")]
    pub recording_url: String,

    #[serde(default, alias = "RecordingSid")]
    pub recording_sid: Option<String>,

    #[serde(
        default,
        alias = "RecordingDuration",
        deserialize_with = "deserialize_seconds"
    )]
    pub recording_duration: Option<u32>,

    #[serde(default, alias = "TranscriptionText")]
    pub transcription_text: Option<String>,

    #[serde(default, alias = "TranscriptionStatus")]
    pub transcription_status: Option<String>,

    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

impl VoicemailWebhookInput {
    /// Transcript supplied by the provider, if it completed and is non-empty
    pub fn supplied_transcript(&self) -> Option<&str> {
        let completed = self
            .transcription_status
            .as_deref()
            .map(|status| status.eq_ignore_ascii_case("completed"))
            .unwrap_or(true);

        if !completed {
            return None;
        }

        self.transcription_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

/// Providers send durations as either numbers or numeric strings
fn deserialize_seconds<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u32),
        Text(String),
    }

    match Option::<Seconds>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Seconds::Number(n)) => Ok(Some(n)),
        Some(Seconds::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Seconds::Text(s)) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// What `process()` hands back to its caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicemailProcessingResult {
    pub record: VoicemailRecord,
    pub transcript: Option<String>,
    pub job_draft: Option<JobExtraction>,
    pub logs: Vec<PipelineLogEntry>,
}
