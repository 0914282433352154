//! Pipeline Integration Tests
//!
//! Tests for redelivery, resume-after-failure and log ordering.

mod common;

use std::sync::Arc;

use common::{plumbing_draft, webhook, FakeExtractor, FakeTranscriber};
use concierge::core::{PipelineError, PipelineOptions, VoicemailPipeline};
use concierge::domain::{LogStatus, PipelineStep, VoicemailStatus};
use concierge::store::{MemoryStore, VoicemailRepository};

fn pipeline(
    store: &Arc<MemoryStore>,
    transcriber: &Arc<FakeTranscriber>,
    extractor: &Arc<FakeExtractor>,
) -> VoicemailPipeline {
    VoicemailPipeline::new(store.clone(), transcriber.clone(), extractor.clone())
}

fn steps(logs: &[concierge::domain::PipelineLogEntry]) -> Vec<(PipelineStep, LogStatus)> {
    logs.iter().map(|e| (e.step, e.status)).collect()
}

#[tokio::test]
async fn test_happy_path_logs_every_stage_in_order() {
    let store = Arc::new(MemoryStore::new());
    let transcriber = FakeTranscriber::ok("Hi, my kitchen sink is leaking.");
    let extractor = FakeExtractor::ok(plumbing_draft(0.9));

    let result = pipeline(&store, &transcriber, &extractor)
        .process(&webhook("CA1"))
        .await
        .unwrap();

    assert_eq!(result.record.status, VoicemailStatus::Processed);
    assert_eq!(
        result.transcript.as_deref(),
        Some("Hi, my kitchen sink is leaking.")
    );
    assert_eq!(result.record.transcript_vendor.as_deref(), Some("fake"));
    assert_eq!(
        result.job_draft.as_ref().and_then(|d| d.service_type.as_deref()),
        Some("Plumbing")
    );
    assert_eq!(
        steps(&result.logs),
        vec![
            (PipelineStep::Ingest, LogStatus::Completed),
            (PipelineStep::Transcribe, LogStatus::Completed),
            (PipelineStep::Extract, LogStatus::Completed),
            (PipelineStep::Persist, LogStatus::Completed),
        ]
    );
    assert_eq!(result.logs[0].meta["created"], true);
}

#[tokio::test]
async fn test_redelivery_reuses_record_and_transcript() {
    let store = Arc::new(MemoryStore::new());
    let transcriber = FakeTranscriber::ok("Need a plumber tomorrow.");
    let extractor = FakeExtractor::ok(plumbing_draft(0.9));
    let pipeline = pipeline(&store, &transcriber, &extractor);

    let first = pipeline.process(&webhook("CA1")).await.unwrap();
    let second = pipeline.process(&webhook("CA1")).await.unwrap();

    assert_eq!(first.record.id, second.record.id);
    assert_eq!(store.voicemail_count(), 1);
    assert_eq!(transcriber.calls(), 1);
    // Extraction re-runs by default
    assert_eq!(extractor.calls(), 2);

    assert_eq!(second.logs[0].meta["created"], false);
    assert_eq!(
        (second.logs[1].step, second.logs[1].status),
        (PipelineStep::Transcribe, LogStatus::Skipped)
    );
    assert_eq!(second.record.status, VoicemailStatus::Processed);
}

#[tokio::test]
async fn test_concurrent_delivery_creates_one_record() {
    let store = Arc::new(MemoryStore::new());
    let transcriber = FakeTranscriber::ok("Water heater is out.");
    let extractor = FakeExtractor::ok(plumbing_draft(0.9));
    let pipeline = pipeline(&store, &transcriber, &extractor);

    let hook = webhook("CA1");
    let (a, b) = tokio::join!(pipeline.process(&hook), pipeline.process(&hook));

    assert_eq!(a.unwrap().record.id, b.unwrap().record.id);
    assert_eq!(store.voicemail_count(), 1);
}

#[tokio::test]
async fn test_transcription_failure_leaves_state_and_resumes() {
    let store = Arc::new(MemoryStore::new());
    let transcriber = FakeTranscriber::failing("upstream timeout");
    let extractor = FakeExtractor::ok(plumbing_draft(0.9));
    let pipeline = pipeline(&store, &transcriber, &extractor);

    let (result, logs) = pipeline.process_with_log(&webhook("CA1")).await;
    match result {
        Err(PipelineError::Transcription(message)) => assert!(message.contains("upstream timeout")),
        other => panic!("expected transcription error, got {:?}", other.map(|r| r.record.status)),
    }
    assert_eq!(
        steps(&logs),
        vec![
            (PipelineStep::Ingest, LogStatus::Completed),
            (PipelineStep::Transcribe, LogStatus::Failed),
        ]
    );
    assert_eq!(extractor.calls(), 0);

    let stored = store.find_by_call_sid("CA1", "u1").await.unwrap().unwrap();
    assert_eq!(stored.status, VoicemailStatus::Transcribing);
    assert!(stored.transcript.is_none());
    assert!(stored.last_error.is_none());

    transcriber.succeed_with("Second try worked.");
    let result = pipeline.process(&webhook("CA1")).await.unwrap();

    assert_eq!(result.record.id, stored.id);
    assert_eq!(result.record.status, VoicemailStatus::Processed);
    assert_eq!(transcriber.calls(), 2);
}

#[tokio::test]
async fn test_extraction_failure_keeps_transcript() {
    let store = Arc::new(MemoryStore::new());
    let transcriber = FakeTranscriber::ok("Roof is leaking over the garage.");
    let extractor = FakeExtractor::failing("model returned prose");
    let pipeline = pipeline(&store, &transcriber, &extractor);

    let err = pipeline.process(&webhook("CA1")).await.unwrap_err();
    assert!(matches!(err, PipelineError::Extraction(_)));

    let stored = store.find_by_call_sid("CA1", "u1").await.unwrap().unwrap();
    assert_eq!(stored.status, VoicemailStatus::Transcribed);
    assert_eq!(
        stored.transcript.as_deref(),
        Some("Roof is leaking over the garage.")
    );
    assert!(stored.job_draft.is_none());

    extractor.succeed_with(plumbing_draft(0.8));
    let result = pipeline.process(&webhook("CA1")).await.unwrap();

    assert_eq!(result.record.status, VoicemailStatus::Processed);
    assert_eq!(transcriber.calls(), 1);
    assert_eq!(
        extractor.transcripts().last().map(String::as_str),
        Some("Roof is leaking over the garage.")
    );
}

#[tokio::test]
async fn test_carrier_transcript_skips_transcriber() {
    let store = Arc::new(MemoryStore::new());
    let transcriber = FakeTranscriber::ok("unused");
    let extractor = FakeExtractor::ok(plumbing_draft(0.9));

    let mut hook = webhook("CA1");
    hook.transcription_text = Some("  Please call me back about the boiler. ".to_string());
    hook.transcription_status = Some("completed".to_string());

    let result = pipeline(&store, &transcriber, &extractor)
        .process(&hook)
        .await
        .unwrap();

    assert_eq!(transcriber.calls(), 0);
    assert_eq!(
        result.record.transcript.as_deref(),
        Some("Please call me back about the boiler.")
    );
    assert_eq!(result.record.transcript_confidence, Some(0.5));
    assert_eq!(result.record.transcript_vendor.as_deref(), Some("carrier"));
    assert_eq!(
        (result.logs[1].step, result.logs[1].status),
        (PipelineStep::Transcribe, LogStatus::Skipped)
    );
}

#[tokio::test]
async fn test_incomplete_carrier_transcript_is_ignored() {
    let store = Arc::new(MemoryStore::new());
    let transcriber = FakeTranscriber::ok("From the recording.");
    let extractor = FakeExtractor::ok(plumbing_draft(0.9));

    let mut hook = webhook("CA1");
    hook.transcription_text = Some("partial garb".to_string());
    hook.transcription_status = Some("failed".to_string());

    let result = pipeline(&store, &transcriber, &extractor)
        .process(&hook)
        .await
        .unwrap();

    assert_eq!(transcriber.calls(), 1);
    assert_eq!(result.transcript.as_deref(), Some("From the recording."));
}

#[tokio::test]
async fn test_unprocessable_input_fails_record_terminally() {
    let store = Arc::new(MemoryStore::new());
    let transcriber = FakeTranscriber::ok("unused");
    let extractor = FakeExtractor::ok(plumbing_draft(0.9));
    let pipeline = pipeline(&store, &transcriber, &extractor);

    let mut hook = webhook("CA1");
    hook.recording_url = String::new();

    let err = pipeline.process(&hook).await.unwrap_err();
    assert!(matches!(err, PipelineError::Transcription(_)));

    let stored = store.find_by_call_sid("CA1", "u1").await.unwrap().unwrap();
    assert_eq!(stored.status, VoicemailStatus::Failed);
    assert!(stored.last_error.is_some());

    let err = pipeline.process(&hook).await.unwrap_err();
    assert!(matches!(err, PipelineError::Terminal { .. }));
    assert_eq!(transcriber.calls(), 0);
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn test_empty_transcript_fails_record() {
    let store = Arc::new(MemoryStore::new());
    let transcriber = FakeTranscriber::ok("   ");
    let extractor = FakeExtractor::ok(plumbing_draft(0.9));

    let err = pipeline(&store, &transcriber, &extractor)
        .process(&webhook("CA1"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Transcription(_)));
    let stored = store.find_by_call_sid("CA1", "u1").await.unwrap().unwrap();
    assert_eq!(stored.status, VoicemailStatus::Failed);
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn test_stored_draft_reused_when_reextract_disabled() {
    let store = Arc::new(MemoryStore::new());
    let transcriber = FakeTranscriber::ok("Fence repair please.");
    let extractor = FakeExtractor::ok(plumbing_draft(0.9));
    let pipeline = pipeline(&store, &transcriber, &extractor).with_options(PipelineOptions {
        reextract_on_retry: false,
        ..Default::default()
    });

    pipeline.process(&webhook("CA1")).await.unwrap();
    let second = pipeline.process(&webhook("CA1")).await.unwrap();

    assert_eq!(extractor.calls(), 1);
    assert_eq!(
        (second.logs[2].step, second.logs[2].status),
        (PipelineStep::Extract, LogStatus::Skipped)
    );
    assert_eq!(
        second.job_draft.and_then(|d| d.service_type),
        Some("Plumbing".to_string())
    );
}

#[tokio::test]
async fn test_records_are_scoped_per_user() {
    let store = Arc::new(MemoryStore::new());
    let transcriber = FakeTranscriber::ok("Gutter cleaning.");
    let extractor = FakeExtractor::ok(plumbing_draft(0.9));
    let pipeline = pipeline(&store, &transcriber, &extractor);

    let mut other_user = webhook("CA1");
    other_user.user_id = "u2".to_string();

    let a = pipeline.process(&webhook("CA1")).await.unwrap();
    let b = pipeline.process(&other_user).await.unwrap();

    assert_ne!(a.record.id, b.record.id);
    assert_eq!(store.voicemail_count(), 2);
    assert_eq!(store.list_for_user("u2", 10).await.unwrap().len(), 1);
}
