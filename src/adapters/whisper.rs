//! Whisper transcription backend.
//!
//! Downloads the recording from the carrier and uploads it to the OpenAI
//! transcription endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use super::{TranscriptionAdapter, TranscriptionContext};
use crate::domain::TranscriptResult;

const TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Used when the response carries no segments to score
const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Whisper verbose_json output
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    avg_logprob: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
    /// Basic-auth for carrier-hosted recordings
    recording_auth: Option<(String, String)>,
}

impl WhisperTranscriber {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
            recording_auth: None,
        }
    }

    pub fn with_recording_auth(mut self, username: String, password: String) -> Self {
        self.recording_auth = Some((username, password));
        self
    }

    async fn download(&self, recording_url: &str) -> Result<Vec<u8>> {
        let mut request = self.client.get(recording_url);
        if let Some((user, pass)) = &self.recording_auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .context("Failed to download recording")?;

        if !response.status().is_success() {
            anyhow::bail!("Recording download failed with status {}", response.status());
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read recording body")?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl TranscriptionAdapter for WhisperTranscriber {
    async fn transcribe(
        &self,
        recording_url: &str,
        context: &TranscriptionContext,
    ) -> Result<TranscriptResult> {
        let audio = self.download(recording_url).await?;
        debug!(call_sid = %context.call_sid, bytes = audio.len(), "Downloaded recording");

        let file_part = Part::bytes(audio)
            .file_name(recording_file_name(recording_url))
            .mime_str("audio/mpeg")?;

        let mut form = Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .part("file", file_part);

        if let Some(language) = &context.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(TRANSCRIPTION_URL)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Failed to call Whisper API")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Whisper response")?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            anyhow::bail!("Whisper API error ({}): {}", status, message);
        }

        let whisper: WhisperOutput =
            serde_json::from_str(&body).context("Failed to parse Whisper JSON")?;

        let text = whisper.text.trim();
        if text.is_empty() {
            anyhow::bail!("Whisper returned an empty transcript");
        }

        Ok(TranscriptResult::new(
            text,
            segment_confidence(&whisper.segments),
            "whisper",
        ))
    }
}

/// exp(mean avg_logprob), clamped to 0..=1
fn segment_confidence(segments: &[WhisperSegment]) -> f64 {
    let logprobs: Vec<f64> = segments.iter().filter_map(|s| s.avg_logprob).collect();
    if logprobs.is_empty() {
        return DEFAULT_CONFIDENCE;
    }

    let mean = logprobs.iter().sum::<f64>() / logprobs.len() as f64;
    mean.exp().clamp(0.0, 1.0)
}

/// Carrier URLs often lack an extension; Whisper sniffs by file name
fn recording_file_name(url: &str) -> String {
    let last = url
        .split('?')
        .next()
        .and_then(|path| path.rsplit('/').next())
        .unwrap_or("recording");

    if last.contains('.') {
        last.to_string()
    } else {
        format!("{}.mp3", if last.is_empty() { "recording" } else { last })
    }
}
