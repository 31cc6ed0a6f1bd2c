//! Generation worker integration tests against an in-process service.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{AsyncGate, FakeGeneration, GenerationFailure, TestHarness, TEST_MODEL};
use vintagecast::cache::CacheClass;
use vintagecast::generation::{GenerationStatus, SettingsUpdate};

#[tokio::test]
async fn completed_job_saves_images_and_thumbnails() {
    let harness = TestHarness::new();
    let sessions = &harness.services.generation;
    let service = Arc::new(FakeGeneration::new(2));
    let worker = harness.services.generation_worker(service.clone());

    let id = sessions.create();
    assert!(sessions.enqueue(id).unwrap());

    let mut guard = None;
    assert!(worker.process_next(&mut guard).await);
    assert!(guard.is_none());
    assert!(!harness.services.signal.is_raised());

    let session = sessions.get(id).unwrap();
    assert_eq!(session.status, GenerationStatus::Idle);
    assert_eq!(session.history.len(), 2);
    assert_eq!(session.current_index, 1);

    let generated_dir = harness.services.config.generated_dir();
    for image in &session.history {
        assert!(image.starts_with(&generated_dir));
        let name = image.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("generated_") && name.ends_with(".png"));
        assert!(harness
            .services
            .cache
            .lookup(CacheClass::ImageryThumbs, &image.to_string_lossy())
            .is_some());
    }

    assert_eq!(service.submissions(), 1);
    assert_eq!(service.submitted.lock()[0].model, TEST_MODEL);
}

#[tokio::test]
async fn nothing_queued_means_nothing_processed() {
    let harness = TestHarness::new();
    let worker = harness
        .services
        .generation_worker(Arc::new(FakeGeneration::new(1)));

    harness.services.generation.create();
    let mut guard = None;
    assert!(!worker.process_next(&mut guard).await);
    assert!(!harness.services.signal.is_raised());
}

#[tokio::test]
async fn autogeneration_requeues_and_keeps_the_signal_raised() {
    let harness = TestHarness::new();
    let sessions = &harness.services.generation;
    let worker = harness
        .services
        .generation_worker(Arc::new(FakeGeneration::new(1)));

    let id = sessions.create();
    sessions.set_autogeneration(id, true).unwrap();
    sessions.enqueue(id).unwrap();

    let mut guard = None;
    assert!(worker.process_next(&mut guard).await);
    assert_eq!(sessions.status(id), Some(GenerationStatus::Queued));
    assert!(guard.is_some());
    assert!(harness.services.signal.is_raised());

    assert!(worker.process_next(&mut guard).await);
    assert_eq!(sessions.history(id).unwrap().len(), 2);

    sessions.stop(id).unwrap();
    assert_eq!(sessions.status(id), Some(GenerationStatus::Idle));
    assert!(!worker.process_next(&mut guard).await);
    assert!(guard.is_none());
    assert!(!harness.services.signal.is_raised());
}

fn generated_files(harness: &TestHarness) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(harness.services.config.generated_dir()) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

/// Run one good job, then one broken in `failure`'s way, and check the
/// broken job changed nothing but the session status.
async fn assert_failed_job_keeps_history(failure: GenerationFailure, reason: &str) {
    let harness = TestHarness::new();
    let sessions = &harness.services.generation;
    let service = Arc::new(FakeGeneration::new(2));
    let worker = harness.services.generation_worker(service.clone());

    let id = sessions.create();
    sessions.enqueue(id).unwrap();
    let mut guard = None;
    assert!(worker.process_next(&mut guard).await);
    let history = sessions.history(id).unwrap();
    assert_eq!(history.len(), 2);

    service.fail_with(failure);
    assert!(sessions.enqueue(id).unwrap());
    assert!(worker.process_next(&mut guard).await);

    let session = sessions.get(id).unwrap();
    assert_eq!(session.status, GenerationStatus::Failed);
    let error = session.last_error.unwrap();
    assert!(error.contains(reason), "{failure:?}: {error}");
    assert_eq!(session.history, history);
    assert_eq!(session.current_index, 1);
    assert!(guard.is_none());
    assert!(!harness.services.signal.is_raised());

    let mut on_disk = history.clone();
    on_disk.sort();
    assert_eq!(generated_files(&harness), on_disk);
    assert_eq!(harness.services.cache.len(CacheClass::ImageryThumbs), 2);

    // A failed session may be queued again.
    assert!(sessions.enqueue(id).unwrap());
}

#[tokio::test]
async fn rejected_submission_fails_the_session() {
    assert_failed_job_keeps_history(GenerationFailure::Submit, "prompt rejected").await;
}

#[tokio::test]
async fn closed_notification_channel_fails_the_session() {
    assert_failed_job_keeps_history(GenerationFailure::ChannelClosed, "closed before completion")
        .await;
}

#[tokio::test]
async fn notification_channel_error_fails_the_session() {
    assert_failed_job_keeps_history(GenerationFailure::ChannelError, "connection reset").await;
}

#[tokio::test]
async fn job_without_outputs_fails_the_session() {
    assert_failed_job_keeps_history(GenerationFailure::NoOutputs, "no images").await;
}

#[tokio::test]
async fn failed_retrieval_leaves_no_partial_images() {
    assert_failed_job_keeps_history(GenerationFailure::SecondRetrieve, "_1.png is gone").await;
}

#[tokio::test]
async fn settings_changed_mid_generation_apply_to_the_next_job() {
    let harness = TestHarness::new();
    let sessions = Arc::clone(&harness.services.generation);
    let gate = AsyncGate::closed();
    let service = Arc::new(FakeGeneration::new(1).gated(gate.clone()));
    let worker = harness.services.generation_worker(service.clone());

    let id = sessions.create();
    sessions.set_autogeneration(id, true).unwrap();
    sessions.enqueue(id).unwrap();

    let running = tokio::spawn(async move {
        let mut guard = None;
        worker.process_next(&mut guard).await;
        worker
    });

    while sessions.status(id) != Some(GenerationStatus::Generating) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sessions
        .update_settings(
            id,
            SettingsUpdate {
                steps: Some(12),
                ..Default::default()
            },
        )
        .unwrap();
    gate.open();

    let worker = running.await.unwrap();
    assert_eq!(service.submitted.lock()[0].steps, 30);

    let mut guard = None;
    assert!(worker.process_next(&mut guard).await);
    assert_eq!(service.submitted.lock()[1].steps, 12);
}

#[tokio::test]
async fn quiet_channel_is_kept_alive_with_heartbeats() {
    let harness = TestHarness::new();
    let sessions = &harness.services.generation;
    let gate = AsyncGate::closed();
    let service = Arc::new(FakeGeneration::new(1).gated(gate.clone()));
    let worker = harness
        .services
        .generation_worker(service.clone())
        .with_heartbeat(Duration::from_millis(20));

    let id = sessions.create();
    sessions.enqueue(id).unwrap();

    let opener = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        gate.open();
    });

    let mut guard = None;
    assert!(worker.process_next(&mut guard).await);
    opener.await.unwrap();

    assert!(*service.heartbeats.lock() >= 1);
    assert_eq!(sessions.status(id), Some(GenerationStatus::Idle));
    assert_eq!(sessions.history(id).unwrap().len(), 1);
}
