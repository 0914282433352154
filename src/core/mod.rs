//! Core processing logic.
//!
//! This module contains:
//! - VoicemailPipeline: ingest → transcribe → extract → persist state machine
//! - JobMaterializer: draft → client, job, calendar event, confirmation
//! - DateTimeResolver: loose date/time strings → wall-clock timestamps
//! - PipelineLogStore: append-only per-call JSONL logs
//! - Concierge: ties the above together for one webhook delivery

pub mod concierge;
pub mod datetime;
pub mod error;
pub mod log_store;
pub mod materializer;
pub mod pipeline;

// Re-export commonly used types
pub use concierge::{notify_entry, Concierge, ConciergeOutcome};
pub use datetime::DateTimeResolver;
pub use error::{MaterializationError, PipelineError};
pub use log_store::PipelineLogStore;
pub use materializer::{
    JobMaterializer, MaterializationOutcome, MaterializationResult, DEFAULT_JOB_TITLE,
    UNKNOWN_CLIENT_NAME,
};
pub use pipeline::{
    PipelineOptions, VoicemailPipeline, CARRIER_TRANSCRIPT_CONFIDENCE, CARRIER_TRANSCRIPT_VENDOR,
};
