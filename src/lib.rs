//! concierge - Voicemail-to-job pipeline
//!
//! Turns a missed-call voicemail into a structured job draft and, when the
//! draft is confident enough, into a client, a job, a calendar event and a
//! confirmation text.
//!
//! # Architecture
//!
//! Processing is a resumable state machine:
//! - Every stage persists its result before the next one runs
//! - Redelivered webhooks resume from the stored record
//! - Materialization checkpoints each side effect so retries skip what succeeded
//!
//! # Modules
//!
//! - `adapters`: Vendor integrations (Whisper, OpenAI, Gemini, Twilio)
//! - `core`: Pipeline, materializer, date resolution, logs
//! - `domain`: Data structures (VoicemailRecord, JobExtraction, Job, ...)
//! - `store`: SQLite and in-memory persistence
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Process a webhook payload
//! concierge process webhook.json
//!
//! # Inspect a call
//! concierge status CA123 --user u1
//! concierge logs CA123 --user u1
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod store;

// Re-export main types at crate root for convenience
pub use core::{
    Concierge, ConciergeOutcome, JobMaterializer, MaterializationResult, PipelineError,
    VoicemailPipeline,
};
pub use domain::{
    JobExtraction, VoicemailProcessingResult, VoicemailRecord, VoicemailStatus,
    VoicemailWebhookInput,
};
pub use store::{MemoryStore, SqliteStore};
