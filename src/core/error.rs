//! Typed errors surfaced by the pipeline and the materializer.

use thiserror::Error;

use crate::store::StoreError;

/// Errors that abort a `process()` call
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The record could not be looked up or created
    #[error("Ingest failed: {0}")]
    Ingest(#[source] StoreError),

    /// A state write after ingest failed
    #[error("Failed to persist voicemail state: {0}")]
    Persist(#[source] StoreError),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// The record was already marked failed; nothing more will run for it
    #[error("Voicemail {call_sid} is in a failed state")]
    Terminal { call_sid: String },
}

/// A single materialization sub-step failure.
///
/// These never abort materialization; they are collected into the result.
#[derive(Debug, Error)]
pub enum MaterializationError {
    #[error("Client resolution failed: {0}")]
    Client(String),

    #[error("Job creation failed: {0}")]
    Job(String),

    #[error("Calendar event creation failed: {0}")]
    CalendarEvent(String),

    #[error("Confirmation failed: {0}")]
    Confirmation(String),

    /// Saga state could not be loaded or saved
    #[error("Saga persistence failed: {0}")]
    Saga(#[source] StoreError),
}
