//! Google Gemini extraction backend.

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use super::prompts::{extraction_prompt, EXTRACTION_SYSTEM};
use super::{parse_extraction, ExtractionContext, JobExtractionAdapter};
use crate::domain::JobExtraction;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    text: Option<String>,
}

pub struct GeminiExtractor {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiExtractor {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }

    fn api_url(&self) -> String {
        format!("{}/{}:generateContent", API_BASE, self.model)
    }
}

#[async_trait]
impl JobExtractionAdapter for GeminiExtractor {
    async fn extract(
        &self,
        transcript: &str,
        context: &ExtractionContext,
    ) -> Result<JobExtraction> {
        let start = Instant::now();

        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": EXTRACTION_SYSTEM }] },
            "contents": [{
                "role": "user",
                "parts": [{ "text": extraction_prompt(transcript, context) }],
            }],
            "generationConfig": {
                "temperature": 0,
                "responseMimeType": "application/json",
            },
        });

        let response = self
            .client
            .post(self.api_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to call Gemini API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        let text: String = generated
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            anyhow::bail!("Gemini returned no content");
        }

        let mut draft = parse_extraction(&text)?;
        draft.extracted_at = Utc::now();
        draft.processing_time = Some(start.elapsed().as_millis() as u64);
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url() {
        let extractor = GeminiExtractor::new(
            reqwest::Client::new(),
            "KEY".to_string(),
            "gemini-1.5-flash".to_string(),
        );
        assert_eq!(
            extractor.api_url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }
}
