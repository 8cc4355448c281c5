//! End-to-end runs through the pipeline service.

use pretty_assertions::assert_eq;
use reelflow::admission::BackpressurePolicy;
use reelflow::config::OrchestratorConfig;
use reelflow::core::{
    AssetKind, ImageMode, NewProject, PipelineStage, ProgressEvent, ProjectSettings,
    ProjectStatus, PublishMetadata,
};
use reelflow::errors::{AdmissionError, ProviderError, ReelflowError};
use reelflow::events::SubscriptionError;
use reelflow::pipeline::RetryConfig;
use reelflow::service::{PipelineService, INTERRUPTED_MESSAGE};
use reelflow::store::{FileProjectStore, ProjectStore};
use reelflow::testing::{
    assert_no_event, assert_progress_monotonic, assert_status_path, assert_status_subsequence,
    statuses, ScriptedProviders, TestHarness,
};

#[tokio::test]
async fn test_end_to_end_run_produces_versioned_outputs() {
    let h = TestHarness::new();
    let project = h.create_default("Explain tide pools").await.unwrap();
    let mut sub = h.service.subscribe(project.id);

    let outcome = h.service.start(project.id).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.status, ProjectStatus::Completed);
    assert_eq!(outcome.error, None);

    let snapshot = h.service.snapshot(project.id).await.unwrap();
    assert_eq!(snapshot.project.status, ProjectStatus::Completed);
    assert_eq!(snapshot.project.error_message, None);

    let script = snapshot.outputs.script.unwrap();
    assert_eq!(script.version, 1);
    assert_eq!(script.value.scenes.len(), 3);
    assert_eq!(snapshot.outputs.cast.unwrap().value.len(), 2);

    let assets = snapshot.outputs.assets.unwrap();
    assert_eq!(assets.version, 2);
    assert_eq!(assets.value.count(AssetKind::Audio), 3);
    assert_eq!(assets.value.len(), 4);
    assert_eq!(
        assets.value.video().map(|v| v.locator.as_str()),
        Some("media/final.mp4")
    );

    let events = sub.drain().unwrap();
    assert_status_subsequence(&events);
    assert_progress_monotonic(&events);
    assert!(events.contains(&ProgressEvent::completed("media/final.mp4")));
    assert_eq!(h.providers.script.prompts(), vec!["Explain tide pools".to_string()]);
}

#[tokio::test]
async fn test_fatal_asset_error_keeps_earlier_outputs() {
    let h = TestHarness::new();
    h.providers
        .assets
        .control()
        .fail_always(ProviderError::fatal("voice model rejected the text"));
    let project = h.create_default("p").await.unwrap();
    let mut sub = h.service.subscribe(project.id);

    let outcome = h.service.start(project.id).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.status, ProjectStatus::Failed);
    assert_eq!(h.providers.assets.control().calls(), 1);

    let snapshot = h.service.snapshot(project.id).await.unwrap();
    let message = snapshot.project.error_message.unwrap();
    assert!(message.contains("voice model rejected the text"));
    assert!(snapshot.outputs.script.is_some());
    assert!(snapshot.outputs.cast.is_some());
    assert!(snapshot.outputs.assets.is_none());

    let events = sub.drain().unwrap();
    let n = events.len();
    assert_eq!(
        events[n - 2],
        ProgressEvent::status_change(ProjectStatus::Failed, 0.5)
    );
    assert_eq!(events[n - 1], ProgressEvent::error(message));
    assert_no_event(&events, "completed");
}

#[tokio::test]
async fn test_retries_exhausted_fails_the_stage() {
    let h = TestHarness::new();
    h.providers
        .voice
        .control()
        .fail_always(ProviderError::transient("rate limited"));
    let project = h.create_default("p").await.unwrap();

    let outcome = h.service.start(project.id).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.status, ProjectStatus::Failed);
    assert_eq!(h.providers.voice.control().calls(), 3);
    assert!(outcome.error.unwrap().starts_with("casting stage failed"));
}

#[tokio::test]
async fn test_regenerate_from_assets_reuses_script_and_cast() {
    let h = TestHarness::new();
    let project = h.create_default("p").await.unwrap();
    h.service.start(project.id).await.unwrap().wait().await.unwrap();

    let mut sub = h.service.subscribe(project.id);
    let outcome = h
        .service
        .regenerate(project.id, PipelineStage::Assets)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(outcome.status, ProjectStatus::Completed);
    assert_eq!(
        outcome.stages_executed,
        vec![PipelineStage::Assets, PipelineStage::Compose]
    );
    assert_eq!(h.providers.call_counts(), [1, 1, 2, 2, 0]);

    let events = sub.drain().unwrap();
    assert_status_path(
        &events,
        &[
            ProjectStatus::GeneratingAssets,
            ProjectStatus::ComposingMedia,
            ProjectStatus::Completed,
        ],
    );
    assert_progress_monotonic(&events);

    let history = h.service.history(project.id).await.unwrap();
    assert_eq!(history.scripts.len(), 1);
    assert_eq!(history.casts.len(), 1);
    assert_eq!(history.asset_sets.len(), 4);
}

#[tokio::test]
async fn test_regenerate_without_prerequisites_is_rejected() {
    let h = TestHarness::new();
    let project = h.create_default("p").await.unwrap();
    let mut sub = h.service.subscribe(project.id);

    let err = h
        .service
        .regenerate(project.id, PipelineStage::Casting)
        .await
        .unwrap_err();
    assert!(matches!(err, ReelflowError::Validation(_)));
    assert_eq!(
        h.service.get_project(project.id).await.unwrap().status,
        ProjectStatus::Draft
    );
    assert!(sub.drain().unwrap().is_empty());
    assert_eq!(h.service.admission().active_count(), 0);
}

#[tokio::test]
async fn test_cancel_during_compose_stops_before_completion() {
    let h = TestHarness::new();
    let gate = h.providers.composition.control().hold();
    let project = h.create_default("p").await.unwrap();
    let mut sub = h.service.subscribe(project.id);

    let run = h.service.start(project.id).await.unwrap();
    gate.entered().await;
    assert!(h.service.cancel(project.id).await.unwrap());

    let outcome = run.wait().await.unwrap();
    assert_eq!(outcome.status, ProjectStatus::Cancelled);

    let events = sub.drain().unwrap();
    assert_eq!(statuses(&events).last(), Some(&ProjectStatus::Cancelled));
    assert_no_event(&events, "completed");
    assert_no_event(&events, "error");

    let snapshot = h.service.snapshot(project.id).await.unwrap();
    assert_eq!(snapshot.project.status, ProjectStatus::Cancelled);
    assert!(snapshot.outputs.assets.unwrap().value.video().is_none());
    gate.release();
}

#[tokio::test]
async fn test_cancel_during_casting_keeps_the_cast() {
    let h = TestHarness::new();
    let gate = h.providers.voice.control().hold();
    let project = h.create_default("p").await.unwrap();

    let run = h.service.start(project.id).await.unwrap();
    gate.entered().await;
    h.service.cancel(project.id).await.unwrap();
    gate.release();

    let outcome = run.wait().await.unwrap();
    assert_eq!(outcome.status, ProjectStatus::Cancelled);
    let snapshot = h.service.snapshot(project.id).await.unwrap();
    assert!(snapshot.outputs.cast.is_some());
    assert_eq!(h.providers.assets.control().calls(), 0);

    // a later run is not affected by the earlier request
    let outcome = h
        .service
        .regenerate(project.id, PipelineStage::Assets)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(outcome.status, ProjectStatus::Completed);
}

#[tokio::test]
async fn test_reject_policy_refuses_runs_at_capacity() {
    let h = TestHarness::with_config(
        TestHarness::default_config()
            .with_max_concurrent_runs(1)
            .with_backpressure(BackpressurePolicy::Reject),
    );
    let gate = h.providers.script.control().hold();
    let first = h.create_default("first").await.unwrap();
    let second = h.create_default("second").await.unwrap();

    let run = h.service.start(first.id).await.unwrap();
    gate.entered().await;

    let err = h.service.start(second.id).await.unwrap_err();
    assert!(matches!(
        err,
        ReelflowError::Admission(AdmissionError::AtCapacity { limit: 1 })
    ));
    // the same project cannot run twice
    assert!(h.service.start(first.id).await.unwrap_err().is_rejection());

    gate.release();
    assert_eq!(run.wait().await.unwrap().status, ProjectStatus::Completed);
    assert_eq!(
        h.service.get_project(second.id).await.unwrap().status,
        ProjectStatus::Draft
    );
}

#[tokio::test]
async fn test_queue_policy_waits_for_a_slot() {
    let h = TestHarness::with_config(
        TestHarness::default_config()
            .with_max_concurrent_runs(1)
            .with_backpressure(BackpressurePolicy::Queue),
    );
    let gate = h.providers.script.control().hold();
    let first = h.create_default("first").await.unwrap();
    let second = h.create_default("second").await.unwrap();

    let first_run = h.service.start(first.id).await.unwrap();
    gate.entered().await;
    let second_run = h.service.start(second.id).await.unwrap();

    tokio::task::yield_now().await;
    assert!(!second_run.is_finished());
    assert_eq!(h.service.admission().active_count(), 2);
    assert_eq!(h.providers.script.control().calls(), 1);

    gate.release();
    assert_eq!(first_run.wait().await.unwrap().status, ProjectStatus::Completed);
    assert_eq!(second_run.wait().await.unwrap().status, ProjectStatus::Completed);
    assert_eq!(h.service.admission().available_slots(), 1);
}

#[tokio::test]
async fn test_cancel_while_queued() {
    let h = TestHarness::with_config(
        TestHarness::default_config()
            .with_max_concurrent_runs(1)
            .with_backpressure(BackpressurePolicy::Queue),
    );
    let gate = h.providers.script.control().hold();
    let first = h.create_default("first").await.unwrap();
    let second = h.create_default("second").await.unwrap();

    let first_run = h.service.start(first.id).await.unwrap();
    gate.entered().await;
    let second_run = h.service.start(second.id).await.unwrap();
    assert!(h.service.cancel(second.id).await.unwrap());

    gate.release();
    first_run.wait().await.unwrap();
    let outcome = second_run.wait().await.unwrap();
    // nothing ran, so the draft is left untouched
    assert_eq!(outcome.status, ProjectStatus::Draft);
    assert!(outcome.stages_executed.is_empty());
    assert_eq!(
        h.service.get_project(second.id).await.unwrap().status,
        ProjectStatus::Draft
    );
}

#[tokio::test]
async fn test_cancelled_regeneration_leaves_completed_project_unchanged() {
    let h = TestHarness::with_config(
        TestHarness::default_config()
            .with_max_concurrent_runs(1)
            .with_backpressure(BackpressurePolicy::Queue),
    );
    let done = h.create_default("done").await.unwrap();
    h.service.start(done.id).await.unwrap().wait().await.unwrap();

    let gate = h.providers.script.control().hold();
    let busy = h.create_default("busy").await.unwrap();
    let busy_run = h.service.start(busy.id).await.unwrap();
    gate.entered().await;

    let mut sub = h.service.subscribe(done.id);
    let regen = h
        .service
        .regenerate(done.id, PipelineStage::Compose)
        .await
        .unwrap();
    assert!(h.service.cancel(done.id).await.unwrap());
    gate.release();
    busy_run.wait().await.unwrap();

    let outcome = regen.wait().await.unwrap();
    assert_eq!(outcome.status, ProjectStatus::Completed);
    assert!(outcome.stages_executed.is_empty());
    assert_eq!(
        h.service.get_project(done.id).await.unwrap().status,
        ProjectStatus::Completed
    );
    assert!(sub.drain().unwrap().is_empty());
    assert_eq!(h.providers.composition.control().calls(), 2);
}

#[tokio::test]
async fn test_lagging_subscriber_resyncs_from_snapshot() {
    let h = TestHarness::with_config(TestHarness::default_config().with_broadcast_capacity(2));
    let project = h.create_default("p").await.unwrap();
    let mut slow = h.service.subscribe(project.id);

    h.service.start(project.id).await.unwrap().wait().await.unwrap();

    // 5 status changes and a completed event, only the last 2 buffered
    assert_eq!(slow.try_recv(), Err(SubscriptionError::Lagged { missed: 4 }));
    assert_eq!(
        slow.try_recv().unwrap(),
        Some(ProgressEvent::status_change(ProjectStatus::Completed, 1.0))
    );
    assert_eq!(
        slow.try_recv().unwrap(),
        Some(ProgressEvent::completed("media/final.mp4"))
    );

    let snapshot = h.service.snapshot(project.id).await.unwrap();
    assert_eq!(snapshot.project.status, ProjectStatus::Completed);
}

#[tokio::test]
async fn test_every_subscriber_sees_every_event() {
    let h = TestHarness::new();
    let project = h.create_default("p").await.unwrap();
    let mut a = h.service.subscribe(project.id);
    let mut b = h.service.subscribe(project.id);

    h.service.start(project.id).await.unwrap().wait().await.unwrap();
    assert_eq!(a.drain().unwrap(), b.drain().unwrap());
}

#[tokio::test]
async fn test_publish_flow() {
    let h = TestHarness::new();
    let settings = ProjectSettings::new("p").with_publish(PublishMetadata::new("Tide pools"));
    let project = h.create(settings).await.unwrap();
    let mut sub = h.service.subscribe(project.id);

    let outcome = h.service.start(project.id).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.status, ProjectStatus::Published);

    let stored = h.service.get_project(project.id).await.unwrap();
    let receipt = stored.publish.unwrap();
    assert!(receipt.remote_url.ends_with("media/final.mp4"));

    let events = sub.drain().unwrap();
    assert_status_path(
        &events,
        &[
            ProjectStatus::GeneratingScript,
            ProjectStatus::Casting,
            ProjectStatus::GeneratingAssets,
            ProjectStatus::ComposingMedia,
            ProjectStatus::Completed,
            ProjectStatus::Publishing,
            ProjectStatus::Published,
        ],
    );
    assert_progress_monotonic(&events);
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::published(receipt.remote_url))
    );
    assert_eq!(h.providers.publish.published()[0].title, "Tide pools");
}

#[tokio::test]
async fn test_cancel_during_publish_keeps_the_upload() {
    let h = TestHarness::new();
    let gate = h.providers.publish.control().hold();
    let settings = ProjectSettings::new("p").with_publish(PublishMetadata::new("Tide pools"));
    let project = h.create(settings).await.unwrap();
    let mut sub = h.service.subscribe(project.id);

    let run = h.service.start(project.id).await.unwrap();
    gate.entered().await;
    assert!(h.service.cancel(project.id).await.unwrap());
    gate.release();

    // the upload finished, so it is recorded rather than dropped
    let outcome = run.wait().await.unwrap();
    assert_eq!(outcome.status, ProjectStatus::Published);
    assert_eq!(h.providers.publish.published().len(), 1);

    let stored = h.service.get_project(project.id).await.unwrap();
    let receipt = stored.publish.unwrap();
    assert_eq!(receipt.remote_id, "video-1");

    let events = sub.drain().unwrap();
    assert!(!statuses(&events).contains(&ProjectStatus::Cancelled));
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::published(receipt.remote_url))
    );
}

#[tokio::test]
async fn test_failed_publish_can_be_retried_alone() {
    let h = TestHarness::new();
    h.providers
        .publish
        .control()
        .fail_always(ProviderError::fatal("quota exceeded"));
    let settings = ProjectSettings::new("p").with_publish(PublishMetadata::new("T"));
    let project = h.create(settings).await.unwrap();

    let outcome = h.service.start(project.id).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.status, ProjectStatus::Failed);

    h.providers.publish.control().succeed();
    let outcome = h
        .service
        .regenerate(project.id, PipelineStage::Publish)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(outcome.status, ProjectStatus::Published);
    assert_eq!(h.providers.call_counts(), [1, 1, 1, 1, 2]);

    let stored = h.service.get_project(project.id).await.unwrap();
    assert_eq!(stored.error_message, None);
}

#[tokio::test]
async fn test_assets_disabled_skips_the_stage() {
    let h = TestHarness::new();
    let settings = ProjectSettings::new("p")
        .with_generate_assets(false)
        .with_image_mode(ImageMode::None);
    let project = h.create(settings).await.unwrap();
    let mut sub = h.service.subscribe(project.id);

    let outcome = h.service.start(project.id).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.status, ProjectStatus::Completed);
    assert_eq!(h.providers.assets.control().calls(), 0);

    let events = sub.drain().unwrap();
    assert!(!statuses(&events).contains(&ProjectStatus::GeneratingAssets));
    assert_progress_monotonic(&events);

    let snapshot = h.service.snapshot(project.id).await.unwrap();
    assert_eq!(snapshot.outputs.assets.unwrap().value.len(), 1);
}

#[tokio::test]
async fn test_store_outage_then_recovery() {
    let h = TestHarness::new();
    let gate = h.providers.voice.control().hold();
    let project = h.create_default("p").await.unwrap();

    let run = h.service.start(project.id).await.unwrap();
    gate.entered().await;
    h.store.set_available(false);
    gate.release();

    let err = run.wait().await.unwrap_err();
    assert!(matches!(err, ReelflowError::Store(_)));

    h.store.set_available(true);
    assert_eq!(
        h.service.get_project(project.id).await.unwrap().status,
        ProjectStatus::Casting
    );

    let mut sub = h.service.subscribe(project.id);
    let recovered = h.service.recover_interrupted().await.unwrap();
    assert_eq!(recovered, vec![project.id]);

    let stored = h.service.get_project(project.id).await.unwrap();
    assert_eq!(stored.status, ProjectStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
    assert_eq!(
        sub.drain().unwrap().last(),
        Some(&ProgressEvent::error(INTERRUPTED_MESSAGE))
    );

    // the cast was never written, so the project restarts from casting
    let outcome = h
        .service
        .regenerate(project.id, PipelineStage::Casting)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(outcome.status, ProjectStatus::Completed);
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = OrchestratorConfig::default()
        .with_retry(RetryConfig::immediate(2))
        .with_state_dir(dir.path());

    let project_id = {
        let service = PipelineService::from_config(&config, ScriptedProviders::new().providers())
            .await
            .unwrap();
        let project = service
            .create_project(NewProject::new("Durable", ProjectSettings::new("p")))
            .await
            .unwrap();
        service.start(project.id).await.unwrap().wait().await.unwrap();
        project.id
    };

    let store = FileProjectStore::open(dir.path()).await.unwrap();
    let project = store.get_project(project_id).await.unwrap();
    assert_eq!(project.status, ProjectStatus::Completed);
    assert_eq!(project.title, "Durable");

    let history = store.history(project_id).await.unwrap();
    assert_eq!(history.scripts.len(), 1);
    assert_eq!(history.asset_sets.len(), 2);

    let service = PipelineService::from_config(&config, ScriptedProviders::new().providers())
        .await
        .unwrap();
    assert!(service.recover_interrupted().await.unwrap().is_empty());
    assert_eq!(service.list_projects().await.unwrap().len(), 1);
}
