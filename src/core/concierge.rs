//! Top-level entry point: process a webhook, materialize the draft, keep the log.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::adapters::{build_confirmation_sender, build_extractor, build_transcriber};
use crate::config::ResolvedConfig;
use crate::domain::{
    LogStatus, PipelineLogEntry, PipelineStep, VoicemailProcessingResult, VoicemailRecord,
    VoicemailWebhookInput,
};
use crate::store::SqliteStore;

use super::error::PipelineError;
use super::log_store::PipelineLogStore;
use super::materializer::{JobMaterializer, MaterializationOutcome, MaterializationResult};
use super::pipeline::{PipelineOptions, VoicemailPipeline};

/// Everything one webhook delivery produced
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConciergeOutcome {
    pub processing: VoicemailProcessingResult,
    pub materialization: Option<MaterializationResult>,
}

/// Pipeline plus the optional materializer and log sink
pub struct Concierge {
    pipeline: VoicemailPipeline,
    materializer: Option<JobMaterializer>,
    log_store: Option<PipelineLogStore>,
}

impl Concierge {
    pub fn new(pipeline: VoicemailPipeline) -> Self {
        Self {
            pipeline,
            materializer: None,
            log_store: None,
        }
    }

    pub fn with_materializer(mut self, materializer: JobMaterializer) -> Self {
        self.materializer = Some(materializer);
        self
    }

    pub fn with_log_store(mut self, log_store: PipelineLogStore) -> Self {
        self.log_store = Some(log_store);
        self
    }

    /// Stop after the draft is persisted
    pub fn without_materializer(mut self) -> Self {
        self.materializer = None;
        self
    }

    pub fn with_country_hint(mut self, country: impl Into<String>) -> Self {
        self.pipeline = self.pipeline.with_country_hint(country);
        self
    }

    /// Wire the configured vendors against a SQLite store
    pub fn from_config(config: &ResolvedConfig, store: Arc<SqliteStore>) -> Result<Self> {
        let transcriber = build_transcriber(&config.transcription, config.http_timeout_seconds)?;
        let extractor = build_extractor(&config.extraction, config.http_timeout_seconds)?;

        let pipeline = VoicemailPipeline::new(store.clone(), transcriber.into(), extractor.into())
            .with_options(PipelineOptions {
                reextract_on_retry: config.materialization.reextract_on_retry,
                language: config.transcription.language.clone(),
                country_hint: None,
            });

        let mut materializer = JobMaterializer::new(store, config.materialization.clone());
        if let Some(sender) =
            build_confirmation_sender(&config.messaging, config.http_timeout_seconds)?
        {
            materializer = materializer.with_confirmation_sender(sender.into());
        }

        Ok(Self::new(pipeline)
            .with_materializer(materializer)
            .with_log_store(PipelineLogStore::new(config.logs_dir())))
    }

    /// Process a webhook and, when a materializer is set, act on the draft
    #[instrument(skip(self, webhook), fields(call_sid = %webhook.call_sid, user_id = %webhook.user_id))]
    pub async fn handle(
        &self,
        webhook: &VoicemailWebhookInput,
    ) -> Result<ConciergeOutcome, PipelineError> {
        let (result, logs) = self.pipeline.process_with_log(webhook).await;

        let mut processing = match result {
            Ok(processing) => processing,
            Err(e) => {
                self.persist_logs(&webhook.user_id, &webhook.call_sid, &logs)
                    .await;
                return Err(e);
            }
        };

        let materialization = match (&self.materializer, &processing.job_draft) {
            (Some(materializer), Some(draft)) => {
                let result = materializer
                    .materialize_for_caller(
                        draft,
                        &webhook.user_id,
                        &webhook.call_sid,
                        Some(&webhook.from),
                    )
                    .await;
                processing.logs.push(notify_entry(&result));
                Some(result)
            }
            _ => None,
        };

        self.persist_logs(&webhook.user_id, &webhook.call_sid, &processing.logs)
            .await;

        Ok(ConciergeOutcome {
            processing,
            materialization,
        })
    }

    /// Materialize the stored draft of an already processed record
    pub async fn materialize_record(
        &self,
        record: &VoicemailRecord,
    ) -> Result<MaterializationResult> {
        let materializer = self
            .materializer
            .as_ref()
            .context("No materializer configured")?;
        let draft = record
            .job_draft
            .as_ref()
            .with_context(|| format!("Voicemail {} has no job draft yet", record.call_sid))?;

        let result = materializer
            .materialize_for_caller(
                draft,
                &record.user_id,
                &record.call_sid,
                Some(&record.from_number),
            )
            .await;

        self.persist_logs(&record.user_id, &record.call_sid, &[notify_entry(&result)])
            .await;
        Ok(result)
    }

    /// Logging must never fail a delivery
    async fn persist_logs(&self, user_id: &str, call_sid: &str, logs: &[PipelineLogEntry]) {
        let Some(store) = &self.log_store else {
            return;
        };
        match store.append(user_id, call_sid, logs).await {
            Ok(()) => info!(entries = logs.len(), "Pipeline log written"),
            Err(e) => warn!(error = %format!("{:#}", e), "Failed to write pipeline log"),
        }
    }
}

/// Summarize a materialization as the final `notify` log entry
pub fn notify_entry(result: &MaterializationResult) -> PipelineLogEntry {
    let (status, message) = match result.outcome {
        MaterializationOutcome::SkippedNoContent => {
            (LogStatus::Skipped, "No job content in draft")
        }
        MaterializationOutcome::BelowThreshold => {
            (LogStatus::Skipped, "Draft below confidence threshold; held for review")
        }
        MaterializationOutcome::Attempted if !result.job_created => {
            (LogStatus::Failed, "Job could not be created")
        }
        MaterializationOutcome::Attempted if result.caveats.is_empty() => {
            (LogStatus::Completed, "Job materialized")
        }
        MaterializationOutcome::Attempted => (LogStatus::Completed, "Job materialized with caveats"),
    };

    let mut entry = PipelineLogEntry::new(PipelineStep::Notify, status, message).with_meta(
        serde_json::json!({
            "outcome": result.outcome,
            "clientId": result.client_id,
            "jobId": result.job_id,
            "calendarEventId": result.calendar_event_id,
            "confirmationSent": result.confirmation_sent,
            "caveats": result.caveats,
        }),
    );
    if let Some(error) = &result.error {
        entry = entry.with_error(error.clone());
    }
    entry
}
