//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use concierge::adapters::{
    ConfirmationSender, ExtractionContext, JobExtractionAdapter, TranscriptionAdapter,
    TranscriptionContext,
};
use concierge::domain::{
    CalendarEvent, Client, Job, JobExtraction, MaterializationSaga, NewCalendarEvent, NewClient,
    NewJob, TranscriptResult, VoicemailWebhookInput,
};
use concierge::store::{BusinessStore, MemoryStore, StoreError};

/// Webhook with a recording and no carrier transcript
pub fn webhook(call_sid: &str) -> VoicemailWebhookInput {
    serde_json::from_value(serde_json::json!({
        "callSid": call_sid,
        "userId": "u1",
        "from": "+15551230000",
        "to": "+15559990000",
        "recordingUrl": format!("https://recordings.example.com/{}.mp3", call_sid),
    }))
    .unwrap()
}

/// A confident plumbing draft scheduled for 2024-06-02 at 2 PM
pub fn plumbing_draft(confidence: f64) -> JobExtraction {
    let mut draft = JobExtraction::new(confidence);
    draft.client_name = Some("Dana Whitfield".to_string());
    draft.client_phone = Some("+15551230000".to_string());
    draft.service_type = Some("Plumbing".to_string());
    draft.description = Some("Kitchen sink is leaking".to_string());
    draft.location = Some("123 Oak St".to_string());
    draft.scheduled_date = Some("2024-06-02".to_string());
    draft.scheduled_time = Some("2:00 PM".to_string());
    draft
}

/// Transcriber returning a fixed result or error, counting calls
pub struct FakeTranscriber {
    response: Mutex<Result<TranscriptResult, String>>,
    calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn ok(text: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Ok(TranscriptResult::new(text, 0.93, "fake"))),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Err(message.to_string())),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn succeed_with(&self, text: &str) {
        *self.response.lock().unwrap() = Ok(TranscriptResult::new(text, 0.93, "fake"));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionAdapter for FakeTranscriber {
    async fn transcribe(
        &self,
        _recording_url: &str,
        _context: &TranscriptionContext,
    ) -> Result<TranscriptResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.response.lock().unwrap() {
            Ok(result) => Ok(result.clone()),
            Err(message) => Err(anyhow::anyhow!("{}", message)),
        }
    }
}

/// Extractor returning a fixed draft or error, recording the transcripts it saw
pub struct FakeExtractor {
    response: Mutex<Result<JobExtraction, String>>,
    transcripts: Mutex<Vec<String>>,
}

impl FakeExtractor {
    pub fn ok(draft: JobExtraction) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Ok(draft)),
            transcripts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Err(message.to_string())),
            transcripts: Mutex::new(Vec::new()),
        })
    }

    pub fn succeed_with(&self, draft: JobExtraction) {
        *self.response.lock().unwrap() = Ok(draft);
    }

    pub fn calls(&self) -> usize {
        self.transcripts.lock().unwrap().len()
    }

    pub fn transcripts(&self) -> Vec<String> {
        self.transcripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobExtractionAdapter for FakeExtractor {
    async fn extract(
        &self,
        transcript: &str,
        _context: &ExtractionContext,
    ) -> Result<JobExtraction> {
        self.transcripts.lock().unwrap().push(transcript.to_string());
        match &*self.response.lock().unwrap() {
            Ok(draft) => Ok(draft.clone()),
            Err(message) => Err(anyhow::anyhow!("{}", message)),
        }
    }
}

/// Confirmation sender that records messages, or fails every send
pub struct FakeSender {
    fail: bool,
    sent: Mutex<Vec<(String, String)>>,
}

impl FakeSender {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfirmationSender for FakeSender {
    async fn send(&self, to: &str, body: &str) -> Result<String> {
        if self.fail {
            anyhow::bail!("carrier rejected message");
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), body.to_string()));
        Ok(format!("SM{}", sent.len()))
    }
}

/// MemoryStore wrapper whose job and calendar writes can be made to fail
#[derive(Default)]
pub struct FlakyBusinessStore {
    pub inner: MemoryStore,
    pub fail_jobs: AtomicBool,
    pub fail_events: AtomicBool,
}

impl FlakyBusinessStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_jobs(&self, fail: bool) {
        self.fail_jobs.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_events(&self, fail: bool) {
        self.fail_events.store(fail, Ordering::SeqCst);
    }
}

fn injected() -> StoreError {
    StoreError::NotFound("injected failure".to_string())
}

#[async_trait]
impl BusinessStore for FlakyBusinessStore {
    async fn find_client_by_phone(
        &self,
        user_id: &str,
        phone: &str,
    ) -> Result<Option<Client>, StoreError> {
        self.inner.find_client_by_phone(user_id, phone).await
    }

    async fn find_client_by_name(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Option<Client>, StoreError> {
        self.inner.find_client_by_name(user_id, name).await
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, StoreError> {
        self.inner.get_client(id).await
    }

    async fn create_client(&self, input: NewClient) -> Result<Client, StoreError> {
        self.inner.create_client(input).await
    }

    async fn create_job(&self, input: NewJob) -> Result<Job, StoreError> {
        if self.fail_jobs.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.create_job(input).await
    }

    async fn create_calendar_event(
        &self,
        input: NewCalendarEvent,
    ) -> Result<CalendarEvent, StoreError> {
        if self.fail_events.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.create_calendar_event(input).await
    }

    async fn list_clients(&self, user_id: &str) -> Result<Vec<Client>, StoreError> {
        self.inner.list_clients(user_id).await
    }

    async fn list_jobs(&self, user_id: &str) -> Result<Vec<Job>, StoreError> {
        self.inner.list_jobs(user_id).await
    }

    async fn list_calendar_events(&self, user_id: &str) -> Result<Vec<CalendarEvent>, StoreError> {
        self.inner.list_calendar_events(user_id).await
    }

    async fn load_saga(
        &self,
        user_id: &str,
        call_id: &str,
    ) -> Result<Option<MaterializationSaga>, StoreError> {
        self.inner.load_saga(user_id, call_id).await
    }

    async fn save_saga(&self, saga: &MaterializationSaga) -> Result<(), StoreError> {
        self.inner.save_saga(saga).await
    }
}
