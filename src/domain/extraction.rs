//! Transcripts and job drafts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output of a speech-to-text vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptResult {
    pub text: String,

    /// Vendor confidence in the range 0..=1
    pub confidence: f64,

    /// Which vendor produced the text (e.g. "whisper", "carrier")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
}

impl TranscriptResult {
    pub fn new(text: impl Into<String>, confidence: f64, vendor: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            vendor: Some(vendor.into()),
        }
    }
}

/// How urgent the caller said the job is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Emergency,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Emergency => "emergency",
        }
    }

    /// Parse a vendor-supplied urgency label, case-insensitively
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Urgency::Low),
            "medium" => Some(Urgency::Medium),
            "high" => Some(Urgency::High),
            "emergency" => Some(Urgency::Emergency),
            _ => None,
        }
    }
}

/// Structured job fields inferred from a call transcript (the "job draft").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExtraction {
    /// Model confidence in the range 0..=1
    pub confidence: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_required: Option<bool>,

    pub extracted_at: DateTime<Utc>,

    /// Vendor round-trip time in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
}

impl JobExtraction {
    /// An empty draft with the given confidence, stamped now
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence,
            client_name: None,
            client_phone: None,
            client_email: None,
            service_type: None,
            description: None,
            scheduled_date: None,
            scheduled_time: None,
            location: None,
            estimated_price: None,
            urgency: None,
            follow_up_required: None,
            extracted_at: Utc::now(),
            processing_time: None,
        }
    }

    /// True when the draft names a service or describes the work
    pub fn has_job_content(&self) -> bool {
        non_blank(&self.service_type) || non_blank(&self.description)
    }

    /// True when the draft carries any scheduling hint
    pub fn has_schedule(&self) -> bool {
        non_blank(&self.scheduled_date) || non_blank(&self.scheduled_time)
    }
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}
