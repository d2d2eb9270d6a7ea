//! End-to-end operation manager scenarios: happy path, retry, dependency
//! cascade, timeout, and cancellation — all against the in-memory stack and
//! a snapshot-collecting hub.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CollectingHub, ScriptedStep};
use parking_lot::Mutex;
use tokio::time::Instant;

use marketflow::{OperationManager, StatusBroadcaster};
use marketflow_domain::entities::engine_config::EngineConfig;
use marketflow_domain::entities::operation::OperationStatus;
use marketflow_domain::entities::snapshot::SnapshotStepStatus;
use marketflow_domain::entities::step_state::StepStatus;
use marketflow_domain::registry::StepRegistry;
use marketflow_domain::services::update_hub::EVENT_OPERATION_SNAPSHOT;
use marketflow_domain::value_objects::requests::OperationRequest;
use marketflow_domain::value_objects::retry_policy::RetryPolicy;

fn manager_with(hub: Arc<CollectingHub>) -> (Arc<OperationManager>, Arc<StatusBroadcaster>) {
    let registry = Arc::new(StepRegistry::new());
    let broadcaster = Arc::new(StatusBroadcaster::new(hub));
    let manager = Arc::new(OperationManager::new(registry, broadcaster.clone()));
    (manager, broadcaster)
}

fn request(id: &str) -> OperationRequest {
    OperationRequest {
        id: Some(id.to_string()),
        mode: "accumulative".into(),
        ..OperationRequest::default()
    }
}

#[tokio::test]
async fn test_happy_path_three_step_pipeline() {
    let hub = CollectingHub::new();
    let (manager, broadcaster) = manager_with(hub.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    manager
        .register_step(Arc::new(ScriptedStep::succeeding("a", &[]).with_log(log.clone())))
        .unwrap();
    manager
        .register_step(Arc::new(
            ScriptedStep::succeeding("b", &["a"]).with_log(log.clone()),
        ))
        .unwrap();
    manager
        .register_step(Arc::new(
            ScriptedStep::succeeding("c", &["b"]).with_log(log.clone()),
        ))
        .unwrap();

    let response = manager.execute(request("op1")).await;

    assert_eq!(response.status, OperationStatus::Completed);
    assert_eq!(response.id, "op1");
    assert!(response.error.is_none());
    assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    assert!(response
        .steps
        .values()
        .all(|s| s.status == StepStatus::Completed && s.progress == 100.0));

    // Every publish is a complete, self-contained snapshot.
    let events = hub.events.lock();
    assert!(events.len() >= 4);
    for (event_type, key, status, snapshot) in events.iter() {
        assert_eq!(event_type, EVENT_OPERATION_SNAPSHOT);
        assert_eq!(key, "op1");
        assert_eq!(status, "update");
        assert_eq!(snapshot.steps.len(), 3);
    }
    let last = &events.last().unwrap().3;
    assert_eq!(last.status, OperationStatus::Completed);
    assert_eq!(last.progress, 100.0);
    assert!(last
        .steps
        .iter()
        .all(|s| s.status == SnapshotStepStatus::Completed));
    drop(events);

    broadcaster.stop().await;
}

#[tokio::test]
async fn test_retry_then_succeed() {
    let hub = CollectingHub::new();
    let (manager, broadcaster) = manager_with(hub);

    let step = Arc::new(ScriptedStep::flaky("retry", 2).with_delay(Duration::ZERO));
    let calls = step.calls.clone();
    manager.register_step(step).unwrap();
    manager.set_config(
        EngineConfig::builder()
            .retry_policy(
                RetryPolicy::new(
                    3,
                    Duration::from_millis(10),
                    Duration::from_millis(100),
                    2.0,
                )
                .unwrap(),
            )
            .build(),
    );

    let started = Instant::now();
    let response = manager.execute(request("retry-case")).await;
    let elapsed = started.elapsed();

    assert_eq!(response.status, OperationStatus::Completed);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(response.steps["retry"].status, StepStatus::Completed);
    // Waits are 0, then 10×1×2 = 20 ms, then 10×2×2 = 40 ms.
    assert!(
        elapsed >= Duration::from_millis(60),
        "expected at least 60ms of retry delays, got {:?}",
        elapsed
    );

    broadcaster.stop().await;
}

#[tokio::test]
async fn test_retry_counts_respect_classification() {
    let hub = CollectingHub::new();
    let (manager, broadcaster) = manager_with(hub);

    let retryable = Arc::new(
        ScriptedStep::failing("always-retryable", &[], true).with_delay(Duration::ZERO),
    );
    let fatal = Arc::new(
        ScriptedStep::failing("fails-fast", &[], false).with_delay(Duration::ZERO),
    );
    let retryable_calls = retryable.calls.clone();
    let fatal_calls = fatal.calls.clone();
    manager.register_step(retryable).unwrap();
    manager.register_step(fatal).unwrap();
    manager.set_config(
        EngineConfig::builder()
            .retry_policy(
                RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5), 1.0)
                    .unwrap(),
            )
            .build(),
    );

    let mut single = request("retryable-op");
    single
        .parameters
        .insert("step".into(), serde_json::json!("always-retryable"));
    let response = manager.execute(single).await;
    assert_eq!(response.status, OperationStatus::Failed);
    assert_eq!(retryable_calls.load(std::sync::atomic::Ordering::SeqCst), 3);

    let mut single = request("fatal-op");
    single
        .parameters
        .insert("step".into(), serde_json::json!("fails-fast"));
    let response = manager.execute(single).await;
    assert_eq!(response.status, OperationStatus::Failed);
    assert_eq!(fatal_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    broadcaster.stop().await;
}

#[tokio::test]
async fn test_dependency_failure_cascades_as_skip() {
    let hub = CollectingHub::new();
    let (manager, broadcaster) = manager_with(hub.clone());

    let s1 = Arc::new(ScriptedStep::failing("s1", &[], false));
    let s2 = Arc::new(ScriptedStep::succeeding("s2", &["s1"]));
    let s3 = Arc::new(ScriptedStep::succeeding("s3", &["s2"]));
    let (c1, c2, c3) = (s1.calls.clone(), s2.calls.clone(), s3.calls.clone());
    manager.register_step(s1).unwrap();
    manager.register_step(s2).unwrap();
    manager.register_step(s3).unwrap();
    manager.set_config(EngineConfig::builder().continue_on_error(false).build());

    let response = manager.execute(request("cascade")).await;

    assert_eq!(response.status, OperationStatus::Failed);
    assert_eq!(response.steps["s1"].status, StepStatus::Failed);
    assert_eq!(response.steps["s2"].status, StepStatus::Skipped);
    assert!(response.steps["s2"].message.contains("Dependency s1 failed"));
    assert_eq!(response.steps["s3"].status, StepStatus::Skipped);
    assert_eq!(c1.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(c2.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(c3.load(std::sync::atomic::Ordering::SeqCst), 0);

    let final_snapshot = hub.snapshots_for("cascade").last().cloned().unwrap();
    assert_eq!(final_snapshot.status, OperationStatus::Failed);
    assert!(final_snapshot.error.is_some());

    broadcaster.stop().await;
}

#[tokio::test]
async fn test_continue_on_error_runs_remaining_stages() {
    let hub = CollectingHub::new();
    let (manager, broadcaster) = manager_with(hub);

    let s1 = Arc::new(ScriptedStep::failing("s1", &[], false));
    let s2 = Arc::new(ScriptedStep::succeeding("s2", &[]));
    let c2 = s2.calls.clone();
    manager.register_step(s1).unwrap();
    manager.register_step(s2).unwrap();
    manager.set_config(EngineConfig::builder().continue_on_error(true).build());

    let response = manager.execute(request("tolerant")).await;

    // The independent stage still ran; the aggregate failure is surfaced.
    assert_eq!(response.status, OperationStatus::Failed);
    assert_eq!(c2.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(response.steps["s2"].status, StepStatus::Completed);
    assert!(response.error.unwrap().contains("s1"));

    broadcaster.stop().await;
}

#[tokio::test]
async fn test_per_step_timeout() {
    let hub = CollectingHub::new();
    let (manager, broadcaster) = manager_with(hub);

    manager
        .register_step(Arc::new(
            ScriptedStep::succeeding("slow", &[]).with_delay(Duration::from_millis(200)),
        ))
        .unwrap();
    manager.set_config(
        EngineConfig::builder()
            .step_timeout("slow", Duration::from_millis(50))
            .build(),
    );

    let started = Instant::now();
    let response = manager.execute(request("timeout-case")).await;
    let elapsed = started.elapsed();

    assert_eq!(response.status, OperationStatus::Failed);
    assert!(elapsed < Duration::from_millis(200), "took {:?}", elapsed);
    let slow = &response.steps["slow"];
    assert_eq!(slow.status, StepStatus::Failed);
    assert!(slow.error.as_deref().unwrap().contains("timeout"));

    broadcaster.stop().await;
}

#[tokio::test]
async fn test_cancellation_mid_flight() {
    let hub = CollectingHub::new();
    let (manager, broadcaster) = manager_with(hub.clone());

    manager
        .register_step(Arc::new(
            ScriptedStep::succeeding("long", &[]).with_delay(Duration::from_millis(500)),
        ))
        .unwrap();

    let started = Instant::now();
    let running = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.execute(request("op-cancel")).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.cancel_operation("op-cancel").await.unwrap();

    let response = running.await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(300), "took {:?}", elapsed);
    assert!(matches!(
        response.status,
        OperationStatus::Cancelled | OperationStatus::Failed
    ));
    assert!(manager.get_operation("op-cancel").is_err());

    let final_snapshot = hub.snapshots_for("op-cancel").last().cloned().unwrap();
    assert!(matches!(
        final_snapshot.status,
        OperationStatus::Cancelled | OperationStatus::Failed
    ));

    broadcaster.stop().await;
}

#[tokio::test]
async fn test_unknown_single_step_fails_operation() {
    let hub = CollectingHub::new();
    let (manager, broadcaster) = manager_with(hub);

    manager
        .register_step(Arc::new(ScriptedStep::succeeding("real", &[])))
        .unwrap();

    let mut req = request("ghost-op");
    req.parameters.insert("step".into(), serde_json::json!("ghost"));
    let response = manager.execute(req).await;

    assert_eq!(response.status, OperationStatus::Failed);
    assert!(response.error.unwrap().contains("ghost"));

    broadcaster.stop().await;
}

#[tokio::test]
async fn test_single_step_request_runs_only_that_step() {
    let hub = CollectingHub::new();
    let (manager, broadcaster) = manager_with(hub);

    let a = Arc::new(ScriptedStep::succeeding("a", &[]));
    let b = Arc::new(ScriptedStep::succeeding("b", &[]));
    let (ca, cb) = (a.calls.clone(), b.calls.clone());
    manager.register_step(a).unwrap();
    manager.register_step(b).unwrap();

    let mut req = request("solo");
    req.parameters.insert("step".into(), serde_json::json!("b"));
    let response = manager.execute(req).await;

    assert_eq!(response.status, OperationStatus::Completed);
    assert_eq!(response.steps.len(), 1);
    assert_eq!(ca.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(cb.load(std::sync::atomic::Ordering::SeqCst), 1);

    broadcaster.stop().await;
}

#[tokio::test]
async fn test_list_operations_empty_after_completion() {
    let hub = CollectingHub::new();
    let (manager, broadcaster) = manager_with(hub);

    manager
        .register_step(Arc::new(ScriptedStep::succeeding("a", &[])))
        .unwrap();
    let _ = manager.execute(request("done-op")).await;

    assert!(manager.list_operations().is_empty());
    assert!(manager.get_operation("done-op").is_err());

    broadcaster.stop().await;
}
