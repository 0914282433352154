//! Persistence for voicemail records and materialized business objects.
//!
//! Two backends implement the same traits:
//! - `SqliteStore`: durable store with a UNIQUE(call_sid, user_id) constraint
//! - `MemoryStore`: process-local store for tests and dry runs

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    CalendarEvent, Client, Job, MaterializationSaga, NewCalendarEvent, NewClient, NewJob,
    NewVoicemail, VoicemailRecord, VoicemailStatus, VoicemailUpdate,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors raised by any store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Voicemail for call {call_sid} (user {user_id}) already exists")]
    Duplicate { call_sid: String, user_id: String },

    #[error("Invalid status transition: {from} → {to}")]
    InvalidTransition {
        from: VoicemailStatus,
        to: VoicemailStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Lock,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),
}

/// Voicemail record persistence.
///
/// `create` does not look up first. Uniqueness of (call_sid, user_id) is the
/// storage layer's job: a duplicate `create` fails with `StoreError::Duplicate`.
#[async_trait]
pub trait VoicemailRepository: Send + Sync {
    async fn find_by_call_sid(
        &self,
        call_sid: &str,
        user_id: &str,
    ) -> Result<Option<VoicemailRecord>, StoreError>;

    async fn create(&self, input: NewVoicemail) -> Result<VoicemailRecord, StoreError>;

    /// Apply only the supplied fields and refresh `updated_at`
    async fn update(&self, id: Uuid, update: VoicemailUpdate)
        -> Result<VoicemailRecord, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<VoicemailRecord>, StoreError>;

    /// Newest first
    async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<VoicemailRecord>, StoreError>;

    /// Create the record, or return the existing one for the same
    /// (call_sid, user_id). The bool is true when a row was created.
    ///
    /// This default falls back to find-then-create and resolves a lost race
    /// through the backend's duplicate error. Backends with a native upsert
    /// override it.
    async fn upsert(&self, input: NewVoicemail) -> Result<(VoicemailRecord, bool), StoreError> {
        if let Some(existing) = self.find_by_call_sid(&input.call_sid, &input.user_id).await? {
            return Ok((existing, false));
        }

        let call_sid = input.call_sid.clone();
        let user_id = input.user_id.clone();

        match self.create(input).await {
            Ok(record) => Ok((record, true)),
            Err(StoreError::Duplicate { .. }) => self
                .find_by_call_sid(&call_sid, &user_id)
                .await?
                .map(|record| (record, false))
                .ok_or_else(|| StoreError::NotFound(format!("{}:{}", user_id, call_sid))),
            Err(e) => Err(e),
        }
    }
}

/// Clients, jobs, calendar events and saga state
#[async_trait]
pub trait BusinessStore: Send + Sync {
    /// Exact phone match, scoped to the user
    async fn find_client_by_phone(
        &self,
        user_id: &str,
        phone: &str,
    ) -> Result<Option<Client>, StoreError>;

    /// Oldest client whose name contains `name`, case-insensitively
    async fn find_client_by_name(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Option<Client>, StoreError>;

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, StoreError>;

    async fn create_client(&self, input: NewClient) -> Result<Client, StoreError>;

    async fn create_job(&self, input: NewJob) -> Result<Job, StoreError>;

    async fn create_calendar_event(
        &self,
        input: NewCalendarEvent,
    ) -> Result<CalendarEvent, StoreError>;

    async fn list_clients(&self, user_id: &str) -> Result<Vec<Client>, StoreError>;

    async fn list_jobs(&self, user_id: &str) -> Result<Vec<Job>, StoreError>;

    async fn list_calendar_events(&self, user_id: &str) -> Result<Vec<CalendarEvent>, StoreError>;

    async fn load_saga(
        &self,
        user_id: &str,
        call_id: &str,
    ) -> Result<Option<MaterializationSaga>, StoreError>;

    async fn save_saga(&self, saga: &MaterializationSaga) -> Result<(), StoreError>;
}

/// Case-insensitive substring test shared by both backends
pub(crate) fn name_matches(candidate: &str, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return false;
    }
    candidate
        .to_ascii_lowercase()
        .contains(&query.to_ascii_lowercase())
}

/// Reject status regressions before they reach storage
pub(crate) fn check_transition(
    record: &VoicemailRecord,
    update: &VoicemailUpdate,
) -> Result<(), StoreError> {
    if let Some(next) = update.status {
        if !record.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: record.status,
                to: next,
            });
        }
    }
    Ok(())
}
