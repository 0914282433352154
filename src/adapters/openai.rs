//! OpenAI chat-completions extraction backend.

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use super::prompts::{extraction_prompt, EXTRACTION_SYSTEM};
use super::{parse_extraction, ExtractionContext, JobExtractionAdapter};
use crate::domain::JobExtraction;

const CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct OpenAiExtractor {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiExtractor {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }

    fn request_body(&self, transcript: &str, context: &ExtractionContext) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": EXTRACTION_SYSTEM },
                { "role": "user", "content": extraction_prompt(transcript, context) },
            ],
        })
    }
}

#[async_trait]
impl JobExtractionAdapter for OpenAiExtractor {
    async fn extract(
        &self,
        transcript: &str,
        context: &ExtractionContext,
    ) -> Result<JobExtraction> {
        let start = Instant::now();

        let response = self
            .client
            .post(CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(transcript, context))
            .send()
            .await
            .context("Failed to call OpenAI API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error ({}): {}", status, body);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("OpenAI returned no content")?;

        debug!(call_sid = %context.call_sid, "OpenAI extraction returned {} bytes", content.len());

        let mut draft = parse_extraction(&content)?;
        draft.extracted_at = Utc::now();
        draft.processing_time = Some(start.elapsed().as_millis() as u64);
        Ok(draft)
    }
}
