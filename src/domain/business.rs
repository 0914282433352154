//! Business objects produced by materialization.
//!
//! Clients, jobs and calendar events are never created directly by the
//! pipeline; they only appear as side effects of a materialization saga.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::extraction::Urgency;

/// A customer of the business, owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewClient {
    pub user_id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

impl Client {
    pub fn from_new(input: NewClient) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            name: input.name,
            phone: input.phone,
            email: input.email,
            address: input.address,
            created_at: Utc::now(),
        }
    }

    pub fn has_phone(&self) -> bool {
        self.phone
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Scheduled => "scheduled",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "scheduled" => Some(JobStatus::Scheduled),
            "in_progress" => Some(JobStatus::InProgress),
            "completed" => Some(JobStatus::Completed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub user_id: String,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: JobStatus,
    pub location: Option<String>,
    pub estimated_price: Option<f64>,
    pub urgency: Option<Urgency>,
    pub scheduled_at: Option<NaiveDateTime>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub user_id: String,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub estimated_price: Option<f64>,
    pub urgency: Option<Urgency>,
    pub scheduled_at: Option<NaiveDateTime>,
    pub notes: String,
}

impl Job {
    /// New jobs always start out `pending`
    pub fn from_new(input: NewJob) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            client_id: input.client_id,
            title: input.title,
            description: input.description,
            status: JobStatus::Pending,
            location: input.location,
            estimated_price: input.estimated_price,
            urgency: input.urgency,
            scheduled_at: input.scheduled_at,
            notes: input.notes,
            created_at: Utc::now(),
        }
    }
}

/// Calendar entry for a scheduled job. Times are the business's wall clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: Uuid,
    pub user_id: String,
    pub job_id: Uuid,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub reminder_minutes: u32,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCalendarEvent {
    pub user_id: String,
    pub job_id: Uuid,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub reminder_minutes: u32,
    pub location: Option<String>,
}

impl CalendarEvent {
    pub fn from_new(input: NewCalendarEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            job_id: input.job_id,
            client_id: input.client_id,
            title: input.title,
            starts_at: input.starts_at,
            ends_at: input.ends_at,
            reminder_minutes: input.reminder_minutes,
            location: input.location,
            created_at: Utc::now(),
        }
    }
}

/// The four side effects of a materialization, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStepKind {
    Client,
    Job,
    CalendarEvent,
    Confirmation,
}

impl SagaStepKind {
    pub const ALL: [SagaStepKind; 4] = [
        SagaStepKind::Client,
        SagaStepKind::Job,
        SagaStepKind::CalendarEvent,
        SagaStepKind::Confirmation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStepKind::Client => "client",
            SagaStepKind::Job => "job",
            SagaStepKind::CalendarEvent => "calendar_event",
            SagaStepKind::Confirmation => "confirmation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStepStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
}

/// Per-step record inside a saga
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaStep {
    pub kind: SagaStepKind,
    pub status: SagaStepStatus,
    /// Id of the entity (or message sid) the step produced
    pub entity_id: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Persisted progress of one materialization, keyed by (user_id, call_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializationSaga {
    pub user_id: String,
    pub call_id: String,
    /// Hash of the draft that last drove this saga
    pub draft_hash: String,
    pub steps: Vec<SagaStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MaterializationSaga {
    pub fn new(user_id: &str, call_id: &str, draft_hash: String) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            call_id: call_id.to_string(),
            draft_hash,
            steps: SagaStepKind::ALL
                .iter()
                .map(|kind| SagaStep {
                    kind: *kind,
                    status: SagaStepStatus::Pending,
                    entity_id: None,
                    error: None,
                    attempts: 0,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step(&self, kind: SagaStepKind) -> Option<&SagaStep> {
        self.steps.iter().find(|s| s.kind == kind)
    }

    fn step_mut(&mut self, kind: SagaStepKind) -> &mut SagaStep {
        if let Some(idx) = self.steps.iter().position(|s| s.kind == kind) {
            return &mut self.steps[idx];
        }
        self.steps.push(SagaStep {
            kind,
            status: SagaStepStatus::Pending,
            entity_id: None,
            error: None,
            attempts: 0,
        });
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    /// Entity id of a completed step
    pub fn completed_entity(&self, kind: SagaStepKind) -> Option<&str> {
        self.step(kind)
            .filter(|s| s.status == SagaStepStatus::Completed)
            .and_then(|s| s.entity_id.as_deref())
    }

    pub fn is_completed(&self, kind: SagaStepKind) -> bool {
        self.step(kind)
            .map(|s| s.status == SagaStepStatus::Completed)
            .unwrap_or(false)
    }

    pub fn mark_completed(&mut self, kind: SagaStepKind, entity_id: Option<String>) {
        let step = self.step_mut(kind);
        step.status = SagaStepStatus::Completed;
        step.entity_id = entity_id;
        step.error = None;
        step.attempts += 1;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, kind: SagaStepKind, error: String) {
        let step = self.step_mut(kind);
        step.status = SagaStepStatus::Failed;
        step.error = Some(error);
        step.attempts += 1;
        self.updated_at = Utc::now();
    }

    pub fn mark_skipped(&mut self, kind: SagaStepKind) {
        let step = self.step_mut(kind);
        step.status = SagaStepStatus::Skipped;
        step.error = None;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_saga_has_all_steps_pending() {
        let saga = MaterializationSaga::new("u1", "CA1", "abc".to_string());

        assert_eq!(saga.steps.len(), 4);
        assert!(saga
            .steps
            .iter()
            .all(|s| s.status == SagaStepStatus::Pending));
    }

    #[test]
    fn test_saga_step_transitions() {
        let mut saga = MaterializationSaga::new("u1", "CA1", "abc".to_string());

        saga.mark_failed(SagaStepKind::Job, "db locked".to_string());
        assert!(!saga.is_completed(SagaStepKind::Job));
        assert_eq!(saga.step(SagaStepKind::Job).unwrap().attempts, 1);

        saga.mark_completed(SagaStepKind::Job, Some("job-1".to_string()));
        assert_eq!(saga.completed_entity(SagaStepKind::Job), Some("job-1"));
        assert_eq!(saga.step(SagaStepKind::Job).unwrap().error, None);
        assert_eq!(saga.step(SagaStepKind::Job).unwrap().attempts, 2);
    }

    #[test]
    fn test_job_starts_pending() {
        let job = Job::from_new(NewJob {
            user_id: "u1".to_string(),
            client_id: None,
            title: "Plumbing".to_string(),
            description: None,
            location: None,
            estimated_price: None,
            urgency: None,
            scheduled_at: None,
            notes: String::new(),
        });

        assert_eq!(job.status, JobStatus::Pending);
    }
}
