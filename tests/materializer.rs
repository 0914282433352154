//! Materializer Integration Tests
//!
//! Tests for the confidence gate, client de-duplication, per-step failure
//! isolation and saga resume.

mod common;

use std::sync::Arc;

use chrono::Timelike;
use common::{plumbing_draft, FakeSender, FlakyBusinessStore};
use concierge::config::MaterializationSettings;
use concierge::core::{
    JobMaterializer, MaterializationOutcome, DEFAULT_JOB_TITLE, UNKNOWN_CLIENT_NAME,
};
use concierge::domain::{JobExtraction, JobStatus, NewClient, SagaStepKind, SagaStepStatus, Urgency};
use concierge::store::{BusinessStore, MemoryStore};

fn materializer(store: &Arc<MemoryStore>, sender: &Arc<FakeSender>) -> JobMaterializer {
    JobMaterializer::new(store.clone(), MaterializationSettings::default())
        .with_confirmation_sender(sender.clone())
}

#[tokio::test]
async fn test_confidence_gate_is_strict() {
    let store = Arc::new(MemoryStore::new());
    let sender = FakeSender::ok();
    let materializer = materializer(&store, &sender);

    let at_threshold = materializer
        .materialize(&plumbing_draft(0.7), "u1", "CA1")
        .await;
    assert_eq!(at_threshold.outcome, MaterializationOutcome::BelowThreshold);
    assert!(!at_threshold.job_created);
    assert!(store.list_jobs("u1").await.unwrap().is_empty());
    assert!(store.list_clients("u1").await.unwrap().is_empty());
    assert!(sender.sent().is_empty());

    let above = materializer
        .materialize(&plumbing_draft(0.71), "u1", "CA2")
        .await;
    assert_eq!(above.outcome, MaterializationOutcome::Attempted);
    assert!(above.job_created);
    assert_eq!(store.list_jobs("u1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_draft_without_job_content_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    let sender = FakeSender::ok();

    let mut draft = plumbing_draft(0.99);
    draft.service_type = None;
    draft.description = Some("   ".to_string());

    let result = materializer(&store, &sender)
        .materialize(&draft, "u1", "CA1")
        .await;

    assert_eq!(result.outcome, MaterializationOutcome::SkippedNoContent);
    assert!(result.saga.is_none());
    assert!(store.list_clients("u1").await.unwrap().is_empty());
    assert!(store.load_saga("u1", "CA1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_full_materialization() {
    let store = Arc::new(MemoryStore::new());
    let sender = FakeSender::ok();

    let result = materializer(&store, &sender)
        .materialize(&plumbing_draft(0.9), "u1", "CA1")
        .await;

    assert!(result.job_created);
    assert!(result.error.is_none());
    assert!(result.caveats.is_empty());
    assert!(result.confirmation_sent);

    let jobs = store.list_jobs("u1").await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].title, "Plumbing");
    assert_eq!(jobs[0].status, JobStatus::Pending);
    assert_eq!(jobs[0].client_id, result.client_id);
    assert!(jobs[0].notes.contains("CA1"));

    let events = store.list_calendar_events("u1").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].job_id, jobs[0].id);
    assert_eq!(events[0].starts_at.hour(), 14);
    assert_eq!((events[0].ends_at - events[0].starts_at).num_minutes(), 60);
    assert_eq!(events[0].reminder_minutes, 60);

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+15551230000");

    let saga = result.saga.unwrap();
    assert!(SagaStepKind::ALL.iter().all(|k| saga.is_completed(*k)));
}

#[tokio::test]
async fn test_client_deduplicated_by_phone() {
    let store = Arc::new(MemoryStore::new());
    let sender = FakeSender::ok();
    let materializer = materializer(&store, &sender);

    let first = materializer
        .materialize(&plumbing_draft(0.9), "u1", "CA1")
        .await;

    let mut second_draft = plumbing_draft(0.9);
    second_draft.client_name = Some("Someone Else".to_string());
    let second = materializer.materialize(&second_draft, "u1", "CA2").await;

    assert_eq!(first.client_id, second.client_id);
    assert_eq!(store.list_clients("u1").await.unwrap().len(), 1);
    assert_eq!(store.list_jobs("u1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_client_matched_by_name_substring() {
    let store = Arc::new(MemoryStore::new());
    let sender = FakeSender::ok();
    let existing = store
        .create_client(NewClient {
            user_id: "u1".to_string(),
            name: "Dana Whitfield".to_string(),
            phone: None,
            email: None,
            address: None,
        })
        .await
        .unwrap();

    let mut draft = plumbing_draft(0.9);
    draft.client_name = Some("dana".to_string());
    draft.client_phone = None;

    let result = materializer(&store, &sender)
        .materialize(&draft, "u1", "CA1")
        .await;

    assert_eq!(result.client_id, Some(existing.id));
    assert_eq!(store.list_clients("u1").await.unwrap().len(), 1);
    // Matched client has no phone, so no confirmation
    assert!(!result.confirmation_sent);
    assert!(sender.sent().is_empty());
}

#[tokio::test]
async fn test_clients_are_scoped_per_user() {
    let store = Arc::new(MemoryStore::new());
    let sender = FakeSender::ok();
    let materializer = materializer(&store, &sender);

    let a = materializer
        .materialize(&plumbing_draft(0.9), "u1", "CA1")
        .await;
    let b = materializer
        .materialize(&plumbing_draft(0.9), "u2", "CA1")
        .await;

    assert_ne!(a.client_id, b.client_id);
    assert_eq!(store.list_clients("u2").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_anonymous_draft_creates_placeholder_client() {
    let store = Arc::new(MemoryStore::new());
    let sender = FakeSender::ok();

    let mut draft = plumbing_draft(0.9);
    draft.client_name = None;
    draft.client_phone = None;
    draft.service_type = None;

    let result = materializer(&store, &sender)
        .materialize(&draft, "u1", "CA1")
        .await;

    assert!(result.job_created);
    let clients = store.list_clients("u1").await.unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].name, UNKNOWN_CLIENT_NAME);
    assert!(clients[0].phone.is_none());
    assert_eq!(result.client_id, Some(clients[0].id));

    let jobs = store.list_jobs("u1").await.unwrap();
    assert_eq!(jobs[0].title, DEFAULT_JOB_TITLE);
    assert_eq!(jobs[0].client_id, Some(clients[0].id));
    // Nobody to text
    assert!(!result.confirmation_sent);
    assert!(sender.sent().is_empty());
}

#[tokio::test]
async fn test_calling_number_backs_an_anonymous_draft() {
    let store = Arc::new(MemoryStore::new());
    let sender = FakeSender::ok();
    let materializer = materializer(&store, &sender);

    let mut draft = plumbing_draft(0.9);
    draft.client_name = None;
    draft.client_phone = None;

    let first = materializer
        .materialize_for_caller(&draft, "u1", "CA1", Some("+15557654321"))
        .await;
    let second = materializer
        .materialize_for_caller(&draft, "u1", "CA2", Some("+15557654321"))
        .await;

    let clients = store.list_clients("u1").await.unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].phone.as_deref(), Some("+15557654321"));
    assert_eq!(first.client_id, second.client_id);

    assert!(first.confirmation_sent);
    assert_eq!(sender.sent()[0].0, "+15557654321");
    assert!(sender.sent()[0].1.starts_with("Hi there,"));
}

#[tokio::test]
async fn test_draft_phone_wins_over_calling_number() {
    let store = Arc::new(MemoryStore::new());
    let sender = FakeSender::ok();

    materializer(&store, &sender)
        .materialize_for_caller(&plumbing_draft(0.9), "u1", "CA1", Some("+15550000000"))
        .await;

    let clients = store.list_clients("u1").await.unwrap();
    assert_eq!(clients[0].phone.as_deref(), Some("+15551230000"));
    assert_eq!(sender.sent()[0].0, "+15551230000");
}

#[tokio::test]
async fn test_calendar_failure_does_not_undo_job() {
    let store = FlakyBusinessStore::new();
    store.set_fail_events(true);
    let sender = FakeSender::ok();

    let result = JobMaterializer::new(store.clone(), MaterializationSettings::default())
        .with_confirmation_sender(sender.clone())
        .materialize(&plumbing_draft(0.9), "u1", "CA1")
        .await;

    assert_eq!(result.outcome, MaterializationOutcome::Attempted);
    assert!(result.job_created);
    assert!(result.calendar_event_id.is_none());
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .starts_with("Calendar event creation failed"));
    // Later steps still run
    assert!(result.confirmation_sent);
    assert_eq!(store.list_jobs("u1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_retry_resumes_saga_without_duplicates() {
    let store = FlakyBusinessStore::new();
    store.set_fail_events(true);
    let sender = FakeSender::ok();
    let materializer = JobMaterializer::new(store.clone(), MaterializationSettings::default())
        .with_confirmation_sender(sender.clone());

    let first = materializer
        .materialize(&plumbing_draft(0.9), "u1", "CA1")
        .await;
    let saga = first.saga.unwrap();
    assert_eq!(
        saga.step(SagaStepKind::CalendarEvent).unwrap().status,
        SagaStepStatus::Failed
    );

    store.set_fail_events(false);
    let second = materializer
        .materialize(&plumbing_draft(0.9), "u1", "CA1")
        .await;

    assert!(second.error.is_none());
    assert_eq!(second.job_id, first.job_id);
    assert_eq!(second.client_id, first.client_id);
    assert!(second.calendar_event_id.is_some());
    assert_eq!(store.list_jobs("u1").await.unwrap().len(), 1);
    assert_eq!(store.list_clients("u1").await.unwrap().len(), 1);
    assert_eq!(store.list_calendar_events("u1").await.unwrap().len(), 1);
    // Confirmation completed on the first attempt and is not repeated
    assert_eq!(sender.sent().len(), 1);

    let saga = store.load_saga("u1", "CA1").await.unwrap().unwrap();
    assert_eq!(saga.step(SagaStepKind::CalendarEvent).unwrap().attempts, 2);
    assert_eq!(saga.step(SagaStepKind::Job).unwrap().attempts, 1);
}

#[tokio::test]
async fn test_job_failure_skips_calendar_event() {
    let store = FlakyBusinessStore::new();
    store.set_fail_jobs(true);
    let sender = FakeSender::ok();

    let result = JobMaterializer::new(store.clone(), MaterializationSettings::default())
        .with_confirmation_sender(sender.clone())
        .materialize(&plumbing_draft(0.9), "u1", "CA1")
        .await;

    assert!(!result.job_created);
    assert!(result.error.as_deref().unwrap().starts_with("Job creation failed"));
    assert!(store.list_calendar_events("u1").await.unwrap().is_empty());
    // The client was still resolved
    assert!(result.client_id.is_some());
}

#[tokio::test]
async fn test_confirmation_failure_keeps_job() {
    let store = Arc::new(MemoryStore::new());
    let sender = FakeSender::failing();

    let result = materializer(&store, &sender)
        .materialize(&plumbing_draft(0.9), "u1", "CA1")
        .await;

    assert!(result.job_created);
    assert!(!result.confirmation_sent);
    assert!(result.error.as_deref().unwrap().contains("carrier rejected"));
    assert_eq!(store.list_jobs("u1").await.unwrap().len(), 1);
    assert_eq!(store.list_calendar_events("u1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_high_urgency_gets_short_reminder() {
    let store = Arc::new(MemoryStore::new());
    let sender = FakeSender::ok();

    let mut draft = plumbing_draft(0.9);
    draft.urgency = Some(Urgency::High);

    materializer(&store, &sender)
        .materialize(&draft, "u1", "CA1")
        .await;

    let events = store.list_calendar_events("u1").await.unwrap();
    assert_eq!(events[0].reminder_minutes, 30);
}

#[tokio::test]
async fn test_unresolvable_date_skips_event_with_caveat() {
    let store = Arc::new(MemoryStore::new());
    let sender = FakeSender::ok();

    let mut draft = plumbing_draft(0.9);
    draft.scheduled_date = Some("next tuesday".to_string());

    let result = materializer(&store, &sender)
        .materialize(&draft, "u1", "CA1")
        .await;

    assert!(result.job_created);
    assert!(result.error.is_none());
    assert!(result.calendar_event_id.is_none());
    assert_eq!(result.caveats.len(), 1);
    assert!(store.list_calendar_events("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_no_schedule_means_no_event() {
    let store = Arc::new(MemoryStore::new());
    let sender = FakeSender::ok();

    let draft = JobExtraction {
        scheduled_date: None,
        scheduled_time: None,
        ..plumbing_draft(0.9)
    };

    let result = materializer(&store, &sender)
        .materialize(&draft, "u1", "CA1")
        .await;

    assert!(result.caveats.is_empty());
    let saga = result.saga.unwrap();
    assert_eq!(
        saga.step(SagaStepKind::CalendarEvent).unwrap().status,
        SagaStepStatus::Skipped
    );
    assert!(store.list_calendar_events("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_custom_threshold_and_duration() {
    let store = Arc::new(MemoryStore::new());
    let settings = MaterializationSettings {
        confidence_threshold: 0.95,
        event_duration_minutes: 90,
        ..Default::default()
    };
    let materializer = JobMaterializer::new(store.clone(), settings);

    let held = materializer
        .materialize(&plumbing_draft(0.9), "u1", "CA1")
        .await;
    assert_eq!(held.outcome, MaterializationOutcome::BelowThreshold);

    let done = materializer
        .materialize(&plumbing_draft(0.97), "u1", "CA2")
        .await;
    assert!(done.job_created);
    // No sender configured
    assert!(!done.confirmation_sent);
    assert_eq!(done.caveats.len(), 1);

    let events = store.list_calendar_events("u1").await.unwrap();
    assert_eq!((events[0].ends_at - events[0].starts_at).num_minutes(), 90);
}
