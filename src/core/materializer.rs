//! Turns a confident job draft into business records.
//!
//! Four independent side effects run in order: resolve or create the client,
//! create the job, schedule a calendar event, text a confirmation. None of
//! them is transactional with the others. Progress is checkpointed as a
//! `MaterializationSaga` after every step, so running the same call again
//! skips what already succeeded and retries the rest.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::ConfirmationSender;
use crate::config::MaterializationSettings;
use crate::domain::{
    Client, JobExtraction, MaterializationSaga, NewCalendarEvent, NewClient, NewJob,
    SagaStepKind, Urgency,
};
use crate::store::{BusinessStore, StoreError};

use super::datetime::DateTimeResolver;
use super::error::MaterializationError;

/// Title used when the draft names no service
pub const DEFAULT_JOB_TITLE: &str = "New job from voicemail";

/// Client name used when neither the draft nor the call identifies the caller
pub const UNKNOWN_CLIENT_NAME: &str = "Unknown caller";

const URGENT_REMINDER_MINUTES: u32 = 30;
const DEFAULT_REMINDER_MINUTES: u32 = 60;

/// Whether materialization ran at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaterializationOutcome {
    /// Draft had neither a service type nor a description
    SkippedNoContent,
    /// Confidence at or below the threshold; kept for human review
    BelowThreshold,
    /// Side effects were attempted (some may have failed)
    Attempted,
}

/// What a materialization did
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializationResult {
    pub outcome: MaterializationOutcome,
    pub job_created: bool,
    pub client_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub calendar_event_id: Option<Uuid>,
    pub confirmation_sent: bool,
    /// First failure, if any
    pub error: Option<String>,
    /// Everything that did not go to plan
    pub caveats: Vec<String>,
    pub saga: Option<MaterializationSaga>,
}

impl MaterializationResult {
    fn new(outcome: MaterializationOutcome) -> Self {
        Self {
            outcome,
            job_created: false,
            client_id: None,
            job_id: None,
            calendar_event_id: None,
            confirmation_sent: false,
            error: None,
            caveats: Vec::new(),
            saga: None,
        }
    }

    fn record_failure(&mut self, error: MaterializationError) {
        let message = error.to_string();
        warn!(error = %message, "Materialization step failed");
        if self.error.is_none() {
            self.error = Some(message.clone());
        }
        self.caveats.push(message);
    }

    fn caveat(&mut self, message: impl Into<String>) {
        self.caveats.push(message.into());
    }
}

/// Creates clients, jobs, calendar events and confirmations from drafts
pub struct JobMaterializer {
    store: Arc<dyn BusinessStore>,
    sender: Option<Arc<dyn ConfirmationSender>>,
    resolver: DateTimeResolver,
    settings: MaterializationSettings,
}

impl JobMaterializer {
    pub fn new(store: Arc<dyn BusinessStore>, settings: MaterializationSettings) -> Self {
        Self {
            store,
            sender: None,
            resolver: DateTimeResolver::new(),
            settings,
        }
    }

    pub fn with_confirmation_sender(mut self, sender: Arc<dyn ConfirmationSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Materialize one draft for `user_id`, originating from call `call_id`
    pub async fn materialize(
        &self,
        draft: &JobExtraction,
        user_id: &str,
        call_id: &str,
    ) -> MaterializationResult {
        self.materialize_for_caller(draft, user_id, call_id, None)
            .await
    }

    /// Like `materialize`, with the calling number as a fallback client phone
    #[instrument(skip(self, draft), fields(confidence = draft.confidence))]
    pub async fn materialize_for_caller(
        &self,
        draft: &JobExtraction,
        user_id: &str,
        call_id: &str,
        caller: Option<&str>,
    ) -> MaterializationResult {
        if !draft.has_job_content() {
            debug!("Draft has no service type or description; skipping");
            return MaterializationResult::new(MaterializationOutcome::SkippedNoContent);
        }

        if draft.confidence <= self.settings.confidence_threshold {
            info!(
                threshold = self.settings.confidence_threshold,
                "Draft below confidence threshold; leaving for review"
            );
            return MaterializationResult::new(MaterializationOutcome::BelowThreshold);
        }

        let mut result = MaterializationResult::new(MaterializationOutcome::Attempted);
        let mut saga = self.load_saga(draft, user_id, call_id, &mut result).await;

        let client = self
            .client_step(draft, user_id, caller, &mut saga, &mut result)
            .await;
        self.checkpoint(&saga, &mut result).await;

        let job = self
            .job_step(draft, user_id, call_id, client.as_ref(), &mut saga, &mut result)
            .await;
        self.checkpoint(&saga, &mut result).await;

        self.calendar_step(draft, user_id, client.as_ref(), job.as_ref(), &mut saga, &mut result)
            .await;
        self.checkpoint(&saga, &mut result).await;

        self.confirmation_step(client.as_ref(), job.as_ref(), &mut saga, &mut result)
            .await;
        self.checkpoint(&saga, &mut result).await;

        info!(
            job_created = result.job_created,
            caveats = result.caveats.len(),
            "Materialization finished"
        );

        result.saga = Some(saga);
        result
    }

    async fn load_saga(
        &self,
        draft: &JobExtraction,
        user_id: &str,
        call_id: &str,
        result: &mut MaterializationResult,
    ) -> MaterializationSaga {
        let hash = draft_hash(draft);

        match self.store.load_saga(user_id, call_id).await {
            Ok(Some(mut saga)) => {
                if saga.draft_hash != hash {
                    result.caveat("Draft changed since the previous attempt; completed steps kept");
                    saga.draft_hash = hash;
                }
                debug!("Resuming saved materialization");
                saga
            }
            Ok(None) => MaterializationSaga::new(user_id, call_id, hash),
            Err(e) => {
                result.record_failure(MaterializationError::Saga(e));
                MaterializationSaga::new(user_id, call_id, hash)
            }
        }
    }

    async fn checkpoint(&self, saga: &MaterializationSaga, result: &mut MaterializationResult) {
        if let Err(e) = self.store.save_saga(saga).await {
            result.record_failure(MaterializationError::Saga(e));
        }
    }

    async fn client_step(
        &self,
        draft: &JobExtraction,
        user_id: &str,
        caller: Option<&str>,
        saga: &mut MaterializationSaga,
        result: &mut MaterializationResult,
    ) -> Option<Client> {
        if let Some(id) = saga.completed_entity(SagaStepKind::Client).and_then(parse_id) {
            match self.store.get_client(id).await {
                Ok(Some(client)) => {
                    result.client_id = Some(client.id);
                    return Some(client);
                }
                Ok(None) => {
                    result.caveat(format!("Previously resolved client {} no longer exists", id))
                }
                Err(e) => {
                    result.record_failure(MaterializationError::Client(e.to_string()));
                    return None;
                }
            }
        }

        match self.resolve_client(draft, user_id, caller).await {
            Ok(client) => {
                saga.mark_completed(SagaStepKind::Client, Some(client.id.to_string()));
                result.client_id = Some(client.id);
                Some(client)
            }
            Err(e) => {
                saga.mark_failed(SagaStepKind::Client, e.to_string());
                result.record_failure(MaterializationError::Client(e.to_string()));
                None
            }
        }
    }

    /// Phone match, then name match, then create.
    ///
    /// The draft's phone wins over the calling number.
    async fn resolve_client(
        &self,
        draft: &JobExtraction,
        user_id: &str,
        caller: Option<&str>,
    ) -> Result<Client, StoreError> {
        let phone = non_blank(&draft.client_phone)
            .or_else(|| caller.map(str::trim).filter(|c| !c.is_empty()));
        let name = non_blank(&draft.client_name);

        if let Some(phone) = phone {
            if let Some(client) = self.store.find_client_by_phone(user_id, phone).await? {
                debug!(client_id = %client.id, "Matched client by phone");
                return Ok(client);
            }
        }

        if let Some(name) = name {
            if let Some(client) = self.store.find_client_by_name(user_id, name).await? {
                debug!(client_id = %client.id, "Matched client by name");
                return Ok(client);
            }
        }

        let display_name = name.or(phone).unwrap_or(UNKNOWN_CLIENT_NAME);

        let client = self
            .store
            .create_client(NewClient {
                user_id: user_id.to_string(),
                name: display_name.to_string(),
                phone: phone.map(str::to_string),
                email: non_blank(&draft.client_email).map(str::to_string),
                address: non_blank(&draft.location).map(str::to_string),
            })
            .await?;

        info!(client_id = %client.id, "Created client");
        Ok(client)
    }

    async fn job_step(
        &self,
        draft: &JobExtraction,
        user_id: &str,
        call_id: &str,
        client: Option<&Client>,
        saga: &mut MaterializationSaga,
        result: &mut MaterializationResult,
    ) -> Option<JobRef> {
        let title = job_title(draft);

        if let Some(id) = saga.completed_entity(SagaStepKind::Job).and_then(parse_id) {
            result.job_created = true;
            result.job_id = Some(id);
            return Some(JobRef { id, title });
        }

        let scheduled_at = self.resolve_schedule(draft);
        let input = NewJob {
            user_id: user_id.to_string(),
            client_id: client.map(|c| c.id),
            title: title.clone(),
            description: non_blank(&draft.description).map(str::to_string),
            location: non_blank(&draft.location).map(str::to_string),
            estimated_price: draft.estimated_price,
            urgency: draft.urgency,
            scheduled_at,
            notes: format!("Created from voicemail {}", call_id),
        };

        match self.store.create_job(input).await {
            Ok(job) => {
                info!(job_id = %job.id, "Created job");
                saga.mark_completed(SagaStepKind::Job, Some(job.id.to_string()));
                result.job_created = true;
                result.job_id = Some(job.id);
                Some(JobRef { id: job.id, title })
            }
            Err(e) => {
                saga.mark_failed(SagaStepKind::Job, e.to_string());
                result.record_failure(MaterializationError::Job(e.to_string()));
                None
            }
        }
    }

    async fn calendar_step(
        &self,
        draft: &JobExtraction,
        user_id: &str,
        client: Option<&Client>,
        job: Option<&JobRef>,
        saga: &mut MaterializationSaga,
        result: &mut MaterializationResult,
    ) {
        if let Some(id) = saga
            .completed_entity(SagaStepKind::CalendarEvent)
            .and_then(parse_id)
        {
            result.calendar_event_id = Some(id);
            return;
        }

        if !draft.has_schedule() {
            saga.mark_skipped(SagaStepKind::CalendarEvent);
            return;
        }

        let Some(job) = job else {
            saga.mark_skipped(SagaStepKind::CalendarEvent);
            result.caveat("Calendar event skipped: no job to attach it to");
            return;
        };

        let Some(starts_at) = self.resolve_schedule(draft) else {
            saga.mark_skipped(SagaStepKind::CalendarEvent);
            result.caveat("Calendar event skipped: scheduled date could not be resolved");
            return;
        };

        let ends_at = starts_at + Duration::minutes(i64::from(self.settings.event_duration_minutes));
        let input = NewCalendarEvent {
            user_id: user_id.to_string(),
            job_id: job.id,
            client_id: client.map(|c| c.id),
            title: job.title.clone(),
            starts_at,
            ends_at,
            reminder_minutes: reminder_minutes(draft.urgency),
            location: non_blank(&draft.location).map(str::to_string),
        };

        match self.store.create_calendar_event(input).await {
            Ok(event) => {
                info!(event_id = %event.id, starts_at = %event.starts_at, "Created calendar event");
                saga.mark_completed(SagaStepKind::CalendarEvent, Some(event.id.to_string()));
                result.calendar_event_id = Some(event.id);
            }
            Err(e) => {
                saga.mark_failed(SagaStepKind::CalendarEvent, e.to_string());
                result.record_failure(MaterializationError::CalendarEvent(e.to_string()));
            }
        }
    }

    async fn confirmation_step(
        &self,
        client: Option<&Client>,
        job: Option<&JobRef>,
        saga: &mut MaterializationSaga,
        result: &mut MaterializationResult,
    ) {
        if saga.is_completed(SagaStepKind::Confirmation) {
            result.confirmation_sent = true;
            return;
        }

        let Some((client, phone)) = client.and_then(|c| c.phone.as_deref().map(|p| (c, p))) else {
            saga.mark_skipped(SagaStepKind::Confirmation);
            return;
        };

        let Some(sender) = &self.sender else {
            saga.mark_skipped(SagaStepKind::Confirmation);
            result.caveat("Confirmation skipped: messaging is not configured");
            return;
        };

        let body = confirmation_body(client, job);
        match sender.send(phone, &body).await {
            Ok(message_id) => {
                info!(%message_id, "Sent confirmation");
                saga.mark_completed(SagaStepKind::Confirmation, Some(message_id));
                result.confirmation_sent = true;
            }
            Err(e) => {
                let message = format!("{:#}", e);
                saga.mark_failed(SagaStepKind::Confirmation, message.clone());
                result.record_failure(MaterializationError::Confirmation(message));
            }
        }
    }

    fn resolve_schedule(&self, draft: &JobExtraction) -> Option<NaiveDateTime> {
        self.resolver.resolve(
            draft.scheduled_date.as_deref(),
            draft.scheduled_time.as_deref(),
        )
    }
}

/// Job id and title carried between steps
#[derive(Debug, Clone)]
struct JobRef {
    id: Uuid,
    title: String,
}

fn job_title(draft: &JobExtraction) -> String {
    non_blank(&draft.service_type)
        .unwrap_or(DEFAULT_JOB_TITLE)
        .to_string()
}

/// Only `high` gets the short lead time
fn reminder_minutes(urgency: Option<Urgency>) -> u32 {
    match urgency {
        Some(Urgency::High) => URGENT_REMINDER_MINUTES,
        _ => DEFAULT_REMINDER_MINUTES,
    }
}

fn confirmation_body(client: &Client, job: Option<&JobRef>) -> String {
    let first_name = client
        .name
        .split_whitespace()
        .next()
        .filter(|n| !n.starts_with('+'))
        .unwrap_or("there");

    match job {
        Some(job) => format!(
            "Hi {}, thanks for your message. We've logged your {} request and will be in touch shortly to confirm.",
            first_name,
            job.title.to_lowercase()
        ),
        None => format!(
            "Hi {}, thanks for your message. We'll be in touch shortly.",
            first_name
        ),
    }
}

/// Stable hash of the draft's content, ignoring extraction timestamps
fn draft_hash(draft: &JobExtraction) -> String {
    let mut content = serde_json::to_value(draft).unwrap_or_default();
    if let Some(fields) = content.as_object_mut() {
        fields.remove("extractedAt");
        fields.remove("processingTime");
    }
    let digest = Sha256::digest(content.to_string().as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_id(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value).ok()
}
