//! Voicemail processing state machine.
//!
//! `process()` walks one webhook through ingest, transcript acquisition,
//! extraction and persistence. Every stage writes its result to the record
//! before the next one starts, so a redelivered webhook resumes from whatever
//! was already persisted.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::adapters::{
    ExtractionContext, JobExtractionAdapter, TranscriptionAdapter, TranscriptionContext,
};
use crate::domain::{
    JobExtraction, LogStatus, NewVoicemail, PipelineLogEntry, PipelineStep, TranscriptResult,
    VoicemailProcessingResult, VoicemailRecord, VoicemailStatus, VoicemailUpdate,
    VoicemailWebhookInput,
};
use crate::store::VoicemailRepository;

use super::error::PipelineError;

/// Confidence attached to carrier-supplied transcription text
pub const CARRIER_TRANSCRIPT_CONFIDENCE: f64 = 0.5;

/// Vendor tag for carrier-supplied transcription text
pub const CARRIER_TRANSCRIPT_VENDOR: &str = "carrier";

/// Knobs that change how a redelivered webhook is handled
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Run extraction again when the record already holds a draft
    pub reextract_on_retry: bool,
    /// Language hint passed to the transcriber
    pub language: Option<String>,
    /// Country hint passed to the extractor
    pub country_hint: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            reextract_on_retry: true,
            language: None,
            country_hint: None,
        }
    }
}

/// Drives a voicemail record from `pending` to `processed`
pub struct VoicemailPipeline {
    repo: Arc<dyn VoicemailRepository>,
    transcriber: Arc<dyn TranscriptionAdapter>,
    extractor: Arc<dyn JobExtractionAdapter>,
    options: PipelineOptions,
}

impl VoicemailPipeline {
    pub fn new(
        repo: Arc<dyn VoicemailRepository>,
        transcriber: Arc<dyn TranscriptionAdapter>,
        extractor: Arc<dyn JobExtractionAdapter>,
    ) -> Self {
        Self {
            repo,
            transcriber,
            extractor,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_country_hint(mut self, country: impl Into<String>) -> Self {
        self.options.country_hint = Some(country.into());
        self
    }

    /// Process one webhook delivery
    pub async fn process(
        &self,
        webhook: &VoicemailWebhookInput,
    ) -> Result<VoicemailProcessingResult, PipelineError> {
        self.process_with_log(webhook).await.0
    }

    /// Like `process`, but also hands back the log entries written before a
    /// failure. On success the entries equal `result.logs`.
    #[instrument(skip(self, webhook), fields(call_sid = %webhook.call_sid, user_id = %webhook.user_id))]
    pub async fn process_with_log(
        &self,
        webhook: &VoicemailWebhookInput,
    ) -> (
        Result<VoicemailProcessingResult, PipelineError>,
        Vec<PipelineLogEntry>,
    ) {
        let mut logs = Vec::new();
        let result = self.run(webhook, &mut logs).await;

        match &result {
            Ok((record, _, _)) => info!(status = %record.status, "Voicemail processed"),
            Err(e) => warn!(error = %e, "Voicemail processing stopped"),
        }

        let result = result.map(|(record, transcript, job_draft)| VoicemailProcessingResult {
            record,
            transcript: Some(transcript),
            job_draft: Some(job_draft),
            logs: logs.clone(),
        });

        (result, logs)
    }

    async fn run(
        &self,
        webhook: &VoicemailWebhookInput,
        logs: &mut Vec<PipelineLogEntry>,
    ) -> Result<(VoicemailRecord, String, JobExtraction), PipelineError> {
        let record = self.ingest(webhook, logs).await?;
        let (record, transcript) = self.acquire_transcript(webhook, record, logs).await?;
        let (record, draft) = self.extract(webhook, record, &transcript, logs).await?;
        Ok((record, transcript, draft))
    }

    /// Find-or-create the record for this (call_sid, user_id)
    async fn ingest(
        &self,
        webhook: &VoicemailWebhookInput,
        logs: &mut Vec<PipelineLogEntry>,
    ) -> Result<VoicemailRecord, PipelineError> {
        let start = Instant::now();

        let (record, created) = match self.repo.upsert(NewVoicemail::from(webhook)).await {
            Ok(found) => found,
            Err(e) => {
                logs.push(
                    PipelineLogEntry::new(
                        PipelineStep::Ingest,
                        LogStatus::Failed,
                        "Failed to store voicemail record",
                    )
                    .with_error(e.to_string()),
                );
                return Err(PipelineError::Ingest(e));
            }
        };

        let meta = serde_json::json!({
            "recordId": record.id,
            "created": created,
            "status": record.status,
        });

        if record.status == VoicemailStatus::Failed {
            logs.push(
                PipelineLogEntry::new(
                    PipelineStep::Ingest,
                    LogStatus::Failed,
                    "Voicemail previously failed; not reprocessing",
                )
                .with_meta(meta)
                .with_error(record.last_error.clone().unwrap_or_default()),
            );
            return Err(PipelineError::Terminal {
                call_sid: record.call_sid,
            });
        }

        let message = if created {
            "Voicemail record created"
        } else {
            "Existing voicemail record found"
        };
        debug!(record_id = %record.id, created, "Ingested voicemail");

        logs.push(
            PipelineLogEntry::new(PipelineStep::Ingest, LogStatus::Completed, message)
                .with_meta(meta)
                .with_duration(start.elapsed().as_millis() as u64),
        );

        Ok(record)
    }

    /// Stored transcript, then carrier text, then the transcription adapter
    async fn acquire_transcript(
        &self,
        webhook: &VoicemailWebhookInput,
        record: VoicemailRecord,
        logs: &mut Vec<PipelineLogEntry>,
    ) -> Result<(VoicemailRecord, String), PipelineError> {
        if let Some(text) = record.stored_transcript() {
            let text = text.to_string();
            logs.push(
                PipelineLogEntry::new(
                    PipelineStep::Transcribe,
                    LogStatus::Skipped,
                    "Reusing stored transcript",
                )
                .with_meta(serde_json::json!({ "vendor": record.transcript_vendor })),
            );
            return Ok((record, text));
        }

        if let Some(text) = webhook.supplied_transcript() {
            let result = TranscriptResult::new(
                text,
                CARRIER_TRANSCRIPT_CONFIDENCE,
                CARRIER_TRANSCRIPT_VENDOR,
            );
            logs.push(
                PipelineLogEntry::new(
                    PipelineStep::Transcribe,
                    LogStatus::Skipped,
                    "Using carrier-supplied transcription",
                )
                .with_meta(serde_json::json!({
                    "vendor": CARRIER_TRANSCRIPT_VENDOR,
                    "confidence": result.confidence,
                })),
            );
            return self.store_transcript(record, result, logs).await;
        }

        if record.recording_url.trim().is_empty() {
            let reason = "No recording URL or transcription text";
            logs.push(PipelineLogEntry::new(
                PipelineStep::Transcribe,
                LogStatus::Failed,
                reason,
            ));
            self.mark_failed(&record, reason, PipelineStep::Transcribe, logs)
                .await?;
            return Err(PipelineError::Transcription(reason.to_string()));
        }

        let record = match self.advance(&record, VoicemailStatus::Transcribing) {
            Some(update) => {
                self.save(&record, update, PipelineStep::Transcribe, logs)
                    .await?
            }
            None => record,
        };

        let context = TranscriptionContext {
            call_sid: record.call_sid.clone(),
            user_id: record.user_id.clone(),
            recording_duration: record.recording_duration,
            language: self.options.language.clone(),
        };

        let start = Instant::now();
        let result = match self
            .transcriber
            .transcribe(&record.recording_url, &context)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                let message = format!("{:#}", e);
                logs.push(
                    PipelineLogEntry::new(
                        PipelineStep::Transcribe,
                        LogStatus::Failed,
                        "Transcription failed",
                    )
                    .with_duration(start.elapsed().as_millis() as u64)
                    .with_error(message.clone()),
                );
                return Err(PipelineError::Transcription(message));
            }
        };

        if result.text.trim().is_empty() {
            let reason = "Transcription returned no text";
            logs.push(
                PipelineLogEntry::new(PipelineStep::Transcribe, LogStatus::Failed, reason)
                    .with_duration(start.elapsed().as_millis() as u64),
            );
            self.mark_failed(&record, reason, PipelineStep::Transcribe, logs)
                .await?;
            return Err(PipelineError::Transcription(reason.to_string()));
        }

        logs.push(
            PipelineLogEntry::new(
                PipelineStep::Transcribe,
                LogStatus::Completed,
                "Recording transcribed",
            )
            .with_meta(serde_json::json!({
                "vendor": result.vendor,
                "confidence": result.confidence,
            }))
            .with_duration(start.elapsed().as_millis() as u64),
        );

        self.store_transcript(record, result, logs).await
    }

    /// Persist the transcript and move the record to `transcribed`
    async fn store_transcript(
        &self,
        record: VoicemailRecord,
        result: TranscriptResult,
        logs: &mut Vec<PipelineLogEntry>,
    ) -> Result<(VoicemailRecord, String), PipelineError> {
        let mut update = self
            .advance(&record, VoicemailStatus::Transcribed)
            .unwrap_or_default();
        update.transcript = Some(result.text.clone());
        update.transcript_confidence = Some(result.confidence);
        update.transcript_vendor = result.vendor;

        let record = self
            .save(&record, update, PipelineStep::Transcribe, logs)
            .await?;
        Ok((record, result.text))
    }

    /// Run (or reuse) extraction and persist the draft
    async fn extract(
        &self,
        webhook: &VoicemailWebhookInput,
        record: VoicemailRecord,
        transcript: &str,
        logs: &mut Vec<PipelineLogEntry>,
    ) -> Result<(VoicemailRecord, JobExtraction), PipelineError> {
        let reuse = if self.options.reextract_on_retry {
            None
        } else {
            record.job_draft.clone()
        };

        let draft = match reuse {
            Some(draft) => {
                logs.push(
                    PipelineLogEntry::new(
                        PipelineStep::Extract,
                        LogStatus::Skipped,
                        "Reusing stored job draft",
                    )
                    .with_meta(serde_json::json!({ "confidence": draft.confidence })),
                );
                draft
            }
            None => {
                let context = ExtractionContext {
                    call_sid: record.call_sid.clone(),
                    user_id: record.user_id.clone(),
                    from_number: record.from_number.clone(),
                    received_at: webhook.received_at.unwrap_or(record.created_at),
                    country_hint: self.options.country_hint.clone(),
                };

                let start = Instant::now();
                match self.extractor.extract(transcript, &context).await {
                    Ok(draft) => {
                        logs.push(
                            PipelineLogEntry::new(
                                PipelineStep::Extract,
                                LogStatus::Completed,
                                "Job details extracted",
                            )
                            .with_meta(serde_json::json!({
                                "confidence": draft.confidence,
                                "hasJobContent": draft.has_job_content(),
                            }))
                            .with_duration(start.elapsed().as_millis() as u64),
                        );
                        draft
                    }
                    Err(e) => {
                        let message = format!("{:#}", e);
                        logs.push(
                            PipelineLogEntry::new(
                                PipelineStep::Extract,
                                LogStatus::Failed,
                                "Extraction failed",
                            )
                            .with_duration(start.elapsed().as_millis() as u64)
                            .with_error(message.clone()),
                        );
                        return Err(PipelineError::Extraction(message));
                    }
                }
            }
        };

        let mut update = self
            .advance(&record, VoicemailStatus::Processed)
            .unwrap_or_default();
        update.job_draft = Some(draft.clone());

        let record = self.save(&record, update, PipelineStep::Persist, logs).await?;

        logs.push(
            PipelineLogEntry::new(PipelineStep::Persist, LogStatus::Completed, "Job draft saved")
                .with_meta(serde_json::json!({ "status": record.status })),
        );

        Ok((record, draft))
    }

    /// A status update, only when it moves the record forward
    fn advance(&self, record: &VoicemailRecord, next: VoicemailStatus) -> Option<VoicemailUpdate> {
        record
            .status
            .advances_to(next)
            .then(|| VoicemailUpdate::status(next))
    }

    async fn save(
        &self,
        record: &VoicemailRecord,
        update: VoicemailUpdate,
        step: PipelineStep,
        logs: &mut Vec<PipelineLogEntry>,
    ) -> Result<VoicemailRecord, PipelineError> {
        match self.repo.update(record.id, update).await {
            Ok(updated) => Ok(updated),
            Err(e) => {
                logs.push(
                    PipelineLogEntry::new(step, LogStatus::Failed, "Failed to persist voicemail")
                        .with_error(e.to_string()),
                );
                Err(PipelineError::Persist(e))
            }
        }
    }

    async fn mark_failed(
        &self,
        record: &VoicemailRecord,
        reason: &str,
        step: PipelineStep,
        logs: &mut Vec<PipelineLogEntry>,
    ) -> Result<VoicemailRecord, PipelineError> {
        warn!(call_sid = %record.call_sid, reason, "Marking voicemail failed");
        self.save(record, VoicemailUpdate::failed(reason), step, logs)
            .await
    }
}
