//! In-memory store.
//!
//! Holds everything behind one mutex, so `upsert` is atomic and duplicate
//! `create` calls are rejected exactly as the SQLite constraint would.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    CalendarEvent, Client, Job, MaterializationSaga, NewCalendarEvent, NewClient, NewJob,
    NewVoicemail, VoicemailRecord, VoicemailUpdate,
};

use super::{check_transition, name_matches, BusinessStore, StoreError, VoicemailRepository};

#[derive(Default)]
struct MemoryState {
    voicemails: Vec<VoicemailRecord>,
    clients: Vec<Client>,
    jobs: Vec<Job>,
    events: Vec<CalendarEvent>,
    sagas: HashMap<(String, String), MaterializationSaga>,
}

/// Process-local implementation of both store traits
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Lock)
    }

    /// Number of stored voicemail records (all users)
    pub fn voicemail_count(&self) -> usize {
        self.state.lock().map(|s| s.voicemails.len()).unwrap_or(0)
    }
}

impl MemoryState {
    fn find_voicemail(&self, call_sid: &str, user_id: &str) -> Option<&VoicemailRecord> {
        self.voicemails
            .iter()
            .find(|r| r.call_sid == call_sid && r.user_id == user_id)
    }
}

#[async_trait]
impl VoicemailRepository for MemoryStore {
    async fn find_by_call_sid(
        &self,
        call_sid: &str,
        user_id: &str,
    ) -> Result<Option<VoicemailRecord>, StoreError> {
        Ok(self.lock()?.find_voicemail(call_sid, user_id).cloned())
    }

    async fn create(&self, input: NewVoicemail) -> Result<VoicemailRecord, StoreError> {
        let mut state = self.lock()?;
        if state.find_voicemail(&input.call_sid, &input.user_id).is_some() {
            return Err(StoreError::Duplicate {
                call_sid: input.call_sid,
                user_id: input.user_id,
            });
        }

        let record = VoicemailRecord::from_new(input);
        state.voicemails.push(record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        id: Uuid,
        update: VoicemailUpdate,
    ) -> Result<VoicemailRecord, StoreError> {
        let mut state = self.lock()?;
        let record = state
            .voicemails
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("voicemail {}", id)))?;

        check_transition(record, &update)?;
        record.apply(update);
        Ok(record.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<VoicemailRecord>, StoreError> {
        Ok(self.lock()?.voicemails.iter().find(|r| r.id == id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<VoicemailRecord>, StoreError> {
        let state = self.lock()?;
        let mut records: Vec<VoicemailRecord> = state
            .voicemails
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn upsert(&self, input: NewVoicemail) -> Result<(VoicemailRecord, bool), StoreError> {
        let mut state = self.lock()?;
        if let Some(existing) = state.find_voicemail(&input.call_sid, &input.user_id) {
            return Ok((existing.clone(), false));
        }

        let record = VoicemailRecord::from_new(input);
        state.voicemails.push(record.clone());
        Ok((record, true))
    }
}

#[async_trait]
impl BusinessStore for MemoryStore {
    async fn find_client_by_phone(
        &self,
        user_id: &str,
        phone: &str,
    ) -> Result<Option<Client>, StoreError> {
        let phone = phone.trim();
        Ok(self
            .lock()?
            .clients
            .iter()
            .find(|c| c.user_id == user_id && c.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn find_client_by_name(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Option<Client>, StoreError> {
        Ok(self
            .lock()?
            .clients
            .iter()
            .find(|c| c.user_id == user_id && name_matches(&c.name, name))
            .cloned())
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, StoreError> {
        Ok(self.lock()?.clients.iter().find(|c| c.id == id).cloned())
    }

    async fn create_client(&self, input: NewClient) -> Result<Client, StoreError> {
        let client = Client::from_new(input);
        self.lock()?.clients.push(client.clone());
        Ok(client)
    }

    async fn create_job(&self, input: NewJob) -> Result<Job, StoreError> {
        let job = Job::from_new(input);
        self.lock()?.jobs.push(job.clone());
        Ok(job)
    }

    async fn create_calendar_event(
        &self,
        input: NewCalendarEvent,
    ) -> Result<CalendarEvent, StoreError> {
        let event = CalendarEvent::from_new(input);
        self.lock()?.events.push(event.clone());
        Ok(event)
    }

    async fn list_clients(&self, user_id: &str) -> Result<Vec<Client>, StoreError> {
        Ok(self
            .lock()?
            .clients
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_jobs(&self, user_id: &str) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .lock()?
            .jobs
            .iter()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_calendar_events(&self, user_id: &str) -> Result<Vec<CalendarEvent>, StoreError> {
        Ok(self
            .lock()?
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn load_saga(
        &self,
        user_id: &str,
        call_id: &str,
    ) -> Result<Option<MaterializationSaga>, StoreError> {
        Ok(self
            .lock()?
            .sagas
            .get(&(user_id.to_string(), call_id.to_string()))
            .cloned())
    }

    async fn save_saga(&self, saga: &MaterializationSaga) -> Result<(), StoreError> {
        self.lock()?.sagas.insert(
            (saga.user_id.clone(), saga.call_id.clone()),
            saga.clone(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VoicemailStatus;

    fn new_voicemail(call_sid: &str) -> NewVoicemail {
        NewVoicemail {
            call_sid: call_sid.to_string(),
            user_id: "u1".to_string(),
            from_number: "+15551230000".to_string(),
            to_number: "+15559990000".to_string(),
            recording_url: "https://x/1.mp3".to_string(),
            recording_sid: None,
            recording_duration: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = MemoryStore::new();
        store.create(new_voicemail("CA1")).await.unwrap();

        let err = store.create(new_voicemail("CA1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
        assert_eq!(store.voicemail_count(), 1);
    }

    #[tokio::test]
    async fn test_upsert_returns_existing() {
        let store = MemoryStore::new();

        let (first, created1) = store.upsert(new_voicemail("CA1")).await.unwrap();
        let (second, created2) = store.upsert(new_voicemail("CA1")).await.unwrap();

        assert!(created1);
        assert!(!created2);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_update_rejects_regression() {
        let store = MemoryStore::new();
        let record = store.create(new_voicemail("CA1")).await.unwrap();

        store
            .update(record.id, VoicemailUpdate::status(VoicemailStatus::Processed))
            .await
            .unwrap();

        let err = store
            .update(record.id, VoicemailUpdate::status(VoicemailStatus::Transcribed))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_update_unknown_id() {
        let store = MemoryStore::new();
        let err = store
            .update(Uuid::new_v4(), VoicemailUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
