//! Adapter interfaces for external vendors.
//!
//! The pipeline only sees three single-method traits; concrete vendors are
//! picked once from configuration and handed in at construction.

pub mod gemini;
pub mod openai;
pub mod prompts;
pub mod twilio;
pub mod whisper;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::{
    ExtractionSettings, ExtractionVendor, MessagingSettings, MessagingVendor,
    TranscriptionSettings, TranscriptionVendor,
};
use crate::domain::{JobExtraction, TranscriptResult, Urgency};

pub use gemini::GeminiExtractor;
pub use openai::OpenAiExtractor;
pub use twilio::TwilioSender;
pub use whisper::WhisperTranscriber;

/// What a transcription vendor may know about the call
#[derive(Debug, Clone, Default)]
pub struct TranscriptionContext {
    pub call_sid: String,
    pub user_id: String,
    /// Recording length in seconds
    pub recording_duration: Option<u32>,
    /// ISO-639-1 hint, if configured
    pub language: Option<String>,
}

/// What an extraction vendor may know about the call
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    pub call_sid: String,
    pub user_id: String,
    pub from_number: String,
    /// Anchor for relative dates ("tomorrow")
    pub received_at: DateTime<Utc>,
    /// Country/carrier hint from the forwarding setup
    pub country_hint: Option<String>,
}

/// Speech-to-text boundary
#[async_trait]
pub trait TranscriptionAdapter: Send + Sync {
    async fn transcribe(
        &self,
        recording_url: &str,
        context: &TranscriptionContext,
    ) -> Result<TranscriptResult>;
}

/// Transcript → job draft boundary
#[async_trait]
pub trait JobExtractionAdapter: Send + Sync {
    async fn extract(&self, transcript: &str, context: &ExtractionContext)
        -> Result<JobExtraction>;
}

/// Outbound confirmation boundary. Returns the vendor message id.
#[async_trait]
pub trait ConfirmationSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<String>;
}

/// Shared HTTP client with the configured timeout
pub fn http_client(timeout_seconds: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .context("Failed to build HTTP client")
}

/// Build the configured transcription adapter
pub fn build_transcriber(
    settings: &TranscriptionSettings,
    timeout_seconds: u64,
) -> Result<Box<dyn TranscriptionAdapter>> {
    match settings.vendor {
        TranscriptionVendor::Whisper => {
            let api_key = settings
                .api_key
                .clone()
                .context("Whisper transcription requires an OpenAI API key (OPENAI_API_KEY)")?;
            let mut adapter = WhisperTranscriber::new(
                http_client(timeout_seconds)?,
                api_key,
                settings.model.clone(),
            );
            if let (Some(user), Some(pass)) =
                (&settings.recording_username, &settings.recording_password)
            {
                adapter = adapter.with_recording_auth(user.clone(), pass.clone());
            }
            Ok(Box::new(adapter))
        }
    }
}

/// Build the configured extraction adapter
pub fn build_extractor(
    settings: &ExtractionSettings,
    timeout_seconds: u64,
) -> Result<Box<dyn JobExtractionAdapter>> {
    let client = http_client(timeout_seconds)?;
    match settings.vendor {
        ExtractionVendor::Openai => {
            let api_key = settings
                .api_key
                .clone()
                .context("OpenAI extraction requires OPENAI_API_KEY")?;
            Ok(Box::new(OpenAiExtractor::new(
                client,
                api_key,
                settings.model.clone(),
            )))
        }
        ExtractionVendor::Gemini => {
            let api_key = settings
                .api_key
                .clone()
                .context("Gemini extraction requires GEMINI_API_KEY")?;
            Ok(Box::new(GeminiExtractor::new(
                client,
                api_key,
                settings.model.clone(),
            )))
        }
    }
}

/// Build the configured confirmation sender, if messaging is enabled
pub fn build_confirmation_sender(
    settings: &MessagingSettings,
    timeout_seconds: u64,
) -> Result<Option<Box<dyn ConfirmationSender>>> {
    match settings.vendor {
        MessagingVendor::None => Ok(None),
        MessagingVendor::Twilio => {
            let account_sid = settings
                .account_sid
                .clone()
                .context("Twilio messaging requires messaging.account_sid")?;
            let auth_token = settings
                .auth_token
                .clone()
                .context("Twilio messaging requires TWILIO_AUTH_TOKEN")?;
            let from_number = settings
                .from_number
                .clone()
                .context("Twilio messaging requires messaging.from_number")?;
            Ok(Some(Box::new(TwilioSender::new(
                http_client(timeout_seconds)?,
                account_sid,
                auth_token,
                from_number,
            ))))
        }
    }
}

/// Raw model output. Every field is optional except confidence.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractionPayload {
    confidence: f64,
    #[serde(default)]
    client_name: Option<String>,
    #[serde(default)]
    client_phone: Option<String>,
    #[serde(default)]
    client_email: Option<String>,
    #[serde(default)]
    service_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    scheduled_date: Option<String>,
    #[serde(default)]
    scheduled_time: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    estimated_price: Option<f64>,
    #[serde(default)]
    urgency: Option<String>,
    #[serde(default)]
    follow_up_required: Option<bool>,
}

/// Strictly parse a model's JSON reply into a draft.
///
/// Markdown code fences are tolerated. Anything else that does not fit the
/// draft shape (non-JSON, confidence outside 0..=1, unknown urgency) is an
/// error rather than a default.
pub fn parse_extraction(raw: &str) -> Result<JobExtraction> {
    let json = strip_code_fence(raw);
    let payload: ExtractionPayload =
        serde_json::from_str(json).context("Extraction output is not a valid draft object")?;

    if !payload.confidence.is_finite() || !(0.0..=1.0).contains(&payload.confidence) {
        anyhow::bail!(
            "Extraction confidence {} is outside 0..=1",
            payload.confidence
        );
    }

    let urgency = match clean(payload.urgency) {
        Some(label) => Some(
            Urgency::parse(&label)
                .with_context(|| format!("Unknown urgency '{}' in extraction output", label))?,
        ),
        None => None,
    };

    let mut draft = JobExtraction::new(payload.confidence);
    draft.client_name = clean(payload.client_name);
    draft.client_phone = clean(payload.client_phone);
    draft.client_email = clean(payload.client_email);
    draft.service_type = clean(payload.service_type);
    draft.description = clean(payload.description);
    draft.scheduled_date = clean(payload.scheduled_date);
    draft.scheduled_time = clean(payload.scheduled_time);
    draft.location = clean(payload.location);
    draft.estimated_price = payload.estimated_price;
    draft.urgency = urgency;
    draft.follow_up_required = payload.follow_up_required;

    Ok(draft)
}

/// Blank strings and literal "null" placeholders become `None`
fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_draft() {
        let draft = parse_extraction(
            r#"{
                "confidence": 0.92,
                "clientName": "Dana",
                "clientPhone": "+15551230000",
                "serviceType": "Plumbing",
                "scheduledDate": "2024-06-02",
                "scheduledTime": "2:00 PM",
                "estimatedPrice": 180.5,
                "urgency": "High",
                "followUpRequired": true
            }"#,
        )
        .unwrap();

        assert_eq!(draft.confidence, 0.92);
        assert_eq!(draft.client_name.as_deref(), Some("Dana"));
        assert_eq!(draft.urgency, Some(Urgency::High));
        assert_eq!(draft.estimated_price, Some(180.5));
        assert_eq!(draft.follow_up_required, Some(true));
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"confidence\": 0.4, \"description\": \"  \"}\n```";
        let draft = parse_extraction(raw).unwrap();

        assert_eq!(draft.confidence, 0.4);
        assert_eq!(draft.description, None);
    }

    #[test]
    fn test_malformed_output_is_an_error() {
        assert!(parse_extraction("Sure! Here is the job: plumbing").is_err());
        assert!(parse_extraction(r#"{"serviceType": "Plumbing"}"#).is_err());
        assert!(parse_extraction(r#"{"confidence": 1.7}"#).is_err());
        assert!(parse_extraction(r#"{"confidence": 0.9, "urgency": "whenever"}"#).is_err());
        assert!(parse_extraction(r#"{"confidence": 0.9, "estimatedPrice": "$150"}"#).is_err());
    }

    #[test]
    fn test_null_placeholders_become_none() {
        let draft =
            parse_extraction(r#"{"confidence": 0.5, "clientName": "null", "location": null}"#)
                .unwrap();
        assert_eq!(draft.client_name, None);
        assert_eq!(draft.location, None);
    }

    #[test]
    fn test_build_extractor_requires_key() {
        let settings = ExtractionSettings::default();
        assert!(build_extractor(&settings, 5).is_err());
    }

    #[test]
    fn test_messaging_disabled_builds_no_sender() {
        let sender = build_confirmation_sender(&MessagingSettings::default(), 5).unwrap();
        assert!(sender.is_none());
    }
}
