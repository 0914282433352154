//! Domain types for the voicemail-to-job pipeline.
//!
//! This module contains the core data structures:
//! - Voicemail: records, partial updates and the inbound webhook
//! - Extraction: transcripts and job drafts
//! - Log: step-by-step pipeline log entries
//! - Business: clients, jobs, calendar events and materialization sagas

pub mod business;
pub mod extraction;
pub mod log;
pub mod voicemail;

// Re-export commonly used types
pub use business::{
    CalendarEvent, Client, Job, JobStatus, MaterializationSaga, NewCalendarEvent, NewClient,
    NewJob, SagaStep, SagaStepKind, SagaStepStatus,
};
pub use extraction::{JobExtraction, TranscriptResult, Urgency};
pub use log::{LogStatus, PipelineLogEntry, PipelineStep};
pub use voicemail::{
    NewVoicemail, VoicemailProcessingResult, VoicemailRecord, VoicemailStatus, VoicemailUpdate,
    VoicemailWebhookInput,
};
