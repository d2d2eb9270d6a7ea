// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Status Broadcaster
//!
//! The single authority for externally visible operation state. Every
//! mutation — step progress, terminal transitions, operation lifecycle —
//! funnels through one background task, which applies it to the operation's
//! snapshot under an exclusive lock and publishes the **complete** snapshot
//! through the injected hub. Any single published message is therefore a
//! self-contained state descriptor; observers never need to assemble deltas.
//!
//! ## Concurrency Model
//!
//! Public mutators enqueue an update request on a bounded channel and block
//! on a completion signal. The background worker drains the channel, applies
//! each update, re-establishes the snapshot invariants (timestamps, overall
//! progress, one-shot `completed_at`), and emits exactly one publish per
//! mutation. Queuing plus the completion signal gives submitters a
//! happens-before edge with the broadcast of their own update.
//!
//! This is process-wide state by design: the snapshot map holds every live
//! operation so UI subscribers can see all of them. Initialize once at
//! application start, and call [`StatusBroadcaster::stop`] on shutdown so
//! the worker drains its channel and exits cleanly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use marketflow_bootstrap::shutdown::CancellationToken;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use marketflow_domain::entities::operation::OperationStatus;
use marketflow_domain::entities::snapshot::OperationSnapshot;
use marketflow_domain::services::update_hub::{
    UpdateHub, EVENT_OPERATION_SNAPSHOT, EVENT_STATUS_UPDATE,
};

/// Bound on pending updates; submitters briefly block when it fills.
const UPDATE_CHANNEL_CAPACITY: usize = 100;

enum UpdateKind {
    /// Initialize a snapshot with the declared step ids.
    Create { step_ids: Vec<String> },
    /// Mutate an existing snapshot.
    Apply(Box<dyn FnOnce(&mut OperationSnapshot) + Send>),
}

struct UpdateRequest {
    operation_id: String,
    kind: UpdateKind,
    done: oneshot::Sender<()>,
}

/// Serializer of state mutations and sole emitter of snapshots.
pub struct StatusBroadcaster {
    snapshots: Arc<RwLock<HashMap<String, OperationSnapshot>>>,
    update_tx: mpsc::Sender<UpdateRequest>,
    stop: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StatusBroadcaster {
    /// Creates the broadcaster and spawns its background worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(hub: Arc<dyn UpdateHub>) -> Self {
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let snapshots: Arc<RwLock<HashMap<String, OperationSnapshot>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let stop = CancellationToken::new();

        let worker = tokio::spawn(Self::run_worker(
            snapshots.clone(),
            hub,
            update_rx,
            stop.clone(),
        ));

        Self {
            snapshots,
            update_tx,
            stop,
            worker: Mutex::new(Some(worker)),
        }
    }

    async fn run_worker(
        snapshots: Arc<RwLock<HashMap<String, OperationSnapshot>>>,
        hub: Arc<dyn UpdateHub>,
        mut update_rx: mpsc::Receiver<UpdateRequest>,
        stop: CancellationToken,
    ) {
        debug!(task = "status-broadcaster", "worker starting");
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    // Drain whatever is already queued so no submitter is
                    // left blocked on its completion signal.
                    while let Ok(request) = update_rx.try_recv() {
                        Self::apply(&snapshots, hub.as_ref(), request);
                    }
                    break;
                }
                request = update_rx.recv() => {
                    match request {
                        Some(request) => Self::apply(&snapshots, hub.as_ref(), request),
                        None => break,
                    }
                }
            }
        }
        debug!(task = "status-broadcaster", "worker stopped");
    }

    fn apply(
        snapshots: &RwLock<HashMap<String, OperationSnapshot>>,
        hub: &dyn UpdateHub,
        request: UpdateRequest,
    ) {
        let operation_id = request.operation_id;
        let published = {
            let mut map = snapshots.write();
            match request.kind {
                UpdateKind::Create { step_ids } => {
                    let snapshot = map
                        .entry(operation_id.clone())
                        .or_insert_with(|| OperationSnapshot::new(&operation_id, &step_ids));
                    snapshot.finalize();
                    Some(snapshot.clone())
                }
                UpdateKind::Apply(apply_fn) => match map.get_mut(&operation_id) {
                    Some(snapshot) => {
                        apply_fn(snapshot);
                        snapshot.finalize();
                        Some(snapshot.clone())
                    }
                    None => {
                        warn!(operation = %operation_id, "update for unknown operation dropped");
                        None
                    }
                },
            }
        };

        // Publish outside the lock; the hub may fan out to slow subscribers.
        if let Some(snapshot) = published {
            hub.broadcast_update(
                EVENT_OPERATION_SNAPSHOT,
                &operation_id,
                EVENT_STATUS_UPDATE,
                &snapshot,
            );
        }
        let _ = request.done.send(());
    }

    /// Enqueues an update and waits until the worker has applied and
    /// published it. Broadcast failures are observability losses, not
    /// operation failures, so they are logged rather than propagated.
    async fn submit(&self, operation_id: &str, kind: UpdateKind) {
        let (done_tx, done_rx) = oneshot::channel();
        let request = UpdateRequest {
            operation_id: operation_id.to_string(),
            kind,
            done: done_tx,
        };
        if self.update_tx.send(request).await.is_err() {
            warn!(operation = %operation_id, "broadcaster stopped; update dropped");
            return;
        }
        let _ = done_rx.await;
    }

    /// Initializes a pending snapshot with one pending step per id, in
    /// order.
    pub async fn create_operation(&self, operation_id: &str, step_ids: &[String]) {
        let step_ids = step_ids.to_vec();
        self.submit(operation_id, UpdateKind::Create { step_ids }).await;
    }

    /// Marks the operation running.
    pub async fn start_operation(&self, operation_id: &str) {
        self.submit(
            operation_id,
            UpdateKind::Apply(Box::new(|snapshot| {
                snapshot.status = OperationStatus::Running;
            })),
        )
        .await;
    }

    /// Applies a step progress/message update.
    ///
    /// Progress in `[1, 99]` marks the step running and makes it the
    /// operation's current step; 100 and above completes it (clamped).
    /// A value lower than the step's current progress while it is running
    /// is discarded.
    pub async fn update_step_progress(
        &self,
        operation_id: &str,
        step_id: &str,
        progress: f64,
        message: &str,
    ) {
        let step_id = step_id.to_string();
        let message = message.to_string();
        self.submit(
            operation_id,
            UpdateKind::Apply(Box::new(move |snapshot| {
                snapshot.apply_step_progress(&step_id, progress, &message, None);
            })),
        )
        .await;
    }

    /// Like [`StatusBroadcaster::update_step_progress`], additionally
    /// merging metadata into the step snapshot.
    pub async fn update_step_with_metadata(
        &self,
        operation_id: &str,
        step_id: &str,
        progress: f64,
        message: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) {
        let step_id = step_id.to_string();
        let message = message.to_string();
        self.submit(
            operation_id,
            UpdateKind::Apply(Box::new(move |snapshot| {
                snapshot.apply_step_progress(&step_id, progress, &message, Some(metadata));
            })),
        )
        .await;
    }

    /// Explicitly completes a step.
    pub async fn complete_step(&self, operation_id: &str, step_id: &str, message: &str) {
        let step_id = step_id.to_string();
        let message = message.to_string();
        self.submit(
            operation_id,
            UpdateKind::Apply(Box::new(move |snapshot| {
                snapshot.complete_step(&step_id, &message);
            })),
        )
        .await;
    }

    /// Explicitly fails a step, recording the error string on it.
    pub async fn fail_step(&self, operation_id: &str, step_id: &str, error: &str) {
        let step_id = step_id.to_string();
        let error = error.to_string();
        self.submit(
            operation_id,
            UpdateKind::Apply(Box::new(move |snapshot| {
                snapshot.fail_step(&step_id, &error);
            })),
        )
        .await;
    }

    /// Marks a step skipped with a reason.
    pub async fn skip_step(&self, operation_id: &str, step_id: &str, reason: &str) {
        let step_id = step_id.to_string();
        let reason = reason.to_string();
        self.submit(
            operation_id,
            UpdateKind::Apply(Box::new(move |snapshot| {
                snapshot.skip_step(&step_id, &reason);
            })),
        )
        .await;
    }

    /// Completes the operation: progress 100, no current step, and any
    /// lingering pending/running step forced to completed.
    pub async fn complete_operation(&self, operation_id: &str, message: &str) {
        let message = message.to_string();
        self.submit(
            operation_id,
            UpdateKind::Apply(Box::new(move |snapshot| {
                snapshot.status = OperationStatus::Completed;
                snapshot.progress = 100.0;
                snapshot.current_step = String::new();
                snapshot.message = message;
                snapshot.force_steps_completed();
            })),
        )
        .await;
    }

    /// Fails the operation, recording the error string.
    pub async fn fail_operation(&self, operation_id: &str, error: &str) {
        let error = error.to_string();
        self.submit(
            operation_id,
            UpdateKind::Apply(Box::new(move |snapshot| {
                snapshot.status = OperationStatus::Failed;
                snapshot.error = Some(error);
                snapshot.current_step = String::new();
            })),
        )
        .await;
    }

    /// Cancels the operation.
    pub async fn cancel_operation(&self, operation_id: &str) {
        self.submit(
            operation_id,
            UpdateKind::Apply(Box::new(|snapshot| {
                snapshot.status = OperationStatus::Cancelled;
                snapshot.current_step = String::new();
            })),
        )
        .await;
    }

    /// Copy of one operation's snapshot.
    pub fn get_snapshot(&self, operation_id: &str) -> Option<OperationSnapshot> {
        self.snapshots.read().get(operation_id).cloned()
    }

    /// Copies of every tracked snapshot.
    pub fn get_all_snapshots(&self) -> Vec<OperationSnapshot> {
        self.snapshots.read().values().cloned().collect()
    }

    /// Evicts snapshots that are terminal and completed more than `max_age`
    /// ago.
    pub fn cleanup_old_operations(&self, max_age: Duration) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        self.snapshots.write().retain(|_, snapshot| {
            let expired = snapshot.status.is_terminal()
                && snapshot.completed_at.is_some_and(|at| at < cutoff);
            !expired
        });
    }

    /// Stops the background worker, draining any queued updates first.
    pub async fn stop(&self) {
        self.stop.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketflow_domain::entities::snapshot::SnapshotStepStatus;
    use marketflow_domain::services::update_hub::NullUpdateHub;

    struct CollectingHub {
        events: Mutex<Vec<(String, String, OperationSnapshot)>>,
    }

    impl CollectingHub {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }
    }

    impl UpdateHub for CollectingHub {
        fn broadcast_update(
            &self,
            event_type: &str,
            key: &str,
            _status: &str,
            payload: &OperationSnapshot,
        ) {
            self.events
                .lock()
                .push((event_type.to_string(), key.to_string(), payload.clone()));
        }
    }

    fn step_ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_every_mutation_publishes_a_complete_snapshot() {
        let hub = CollectingHub::new();
        let broadcaster = StatusBroadcaster::new(hub.clone());

        broadcaster.create_operation("op1", &step_ids(&["a", "b"])).await;
        broadcaster.start_operation("op1").await;
        broadcaster.update_step_progress("op1", "a", 40.0, "working").await;

        let events = hub.events.lock();
        assert_eq!(events.len(), 3);
        for (event_type, key, snapshot) in events.iter() {
            assert_eq!(event_type, EVENT_OPERATION_SNAPSHOT);
            assert_eq!(key, "op1");
            assert_eq!(snapshot.steps.len(), 2);
        }
        let last = &events[2].2;
        assert_eq!(last.status, OperationStatus::Running);
        assert_eq!(last.step("a").unwrap().progress, 40.0);
        assert_eq!(last.current_step, "a");
        drop(events);

        broadcaster.stop().await;
    }

    #[tokio::test]
    async fn test_monotonic_progress_while_running() {
        let broadcaster = StatusBroadcaster::new(Arc::new(NullUpdateHub));
        broadcaster.create_operation("op1", &step_ids(&["a"])).await;
        broadcaster.update_step_progress("op1", "a", 60.0, "ahead").await;
        broadcaster.update_step_progress("op1", "a", 20.0, "stale").await;

        let snapshot = broadcaster.get_snapshot("op1").unwrap();
        let step = snapshot.step("a").unwrap();
        assert_eq!(step.progress, 60.0);
        assert_eq!(step.message, "stale");

        broadcaster.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_step_auto_append() {
        let broadcaster = StatusBroadcaster::new(Arc::new(NullUpdateHub));
        broadcaster.create_operation("op1", &step_ids(&["a"])).await;
        broadcaster
            .update_step_progress("op1", "mystery", 30.0, "emitted by a stage")
            .await;

        let snapshot = broadcaster.get_snapshot("op1").unwrap();
        assert_eq!(snapshot.steps.len(), 2);
        assert_eq!(
            snapshot.step("mystery").unwrap().status,
            SnapshotStepStatus::Running
        );

        broadcaster.stop().await;
    }

    #[tokio::test]
    async fn test_complete_operation_forces_lingering_steps() {
        let broadcaster = StatusBroadcaster::new(Arc::new(NullUpdateHub));
        broadcaster.create_operation("op1", &step_ids(&["a", "b"])).await;
        broadcaster.update_step_progress("op1", "a", 50.0, "half").await;
        broadcaster.complete_operation("op1", "all done").await;

        let snapshot = broadcaster.get_snapshot("op1").unwrap();
        assert_eq!(snapshot.status, OperationStatus::Completed);
        assert_eq!(snapshot.progress, 100.0);
        assert!(snapshot.current_step.is_empty());
        assert!(snapshot.completed_at.is_some());
        assert!(snapshot
            .steps
            .iter()
            .all(|s| s.status == SnapshotStepStatus::Completed && s.progress == 100.0));

        broadcaster.stop().await;
    }

    #[tokio::test]
    async fn test_metadata_merges_into_step() {
        let broadcaster = StatusBroadcaster::new(Arc::new(NullUpdateHub));
        broadcaster.create_operation("op1", &step_ids(&["a"])).await;
        broadcaster
            .update_step_with_metadata(
                "op1",
                "a",
                10.0,
                "downloading",
                HashMap::from([("files".to_string(), serde_json::json!(3))]),
            )
            .await;

        let snapshot = broadcaster.get_snapshot("op1").unwrap();
        assert_eq!(
            snapshot.step("a").unwrap().metadata.get("files"),
            Some(&serde_json::json!(3))
        );

        broadcaster.stop().await;
    }

    #[tokio::test]
    async fn test_cleanup_evicts_only_old_terminal_snapshots() {
        let broadcaster = StatusBroadcaster::new(Arc::new(NullUpdateHub));
        broadcaster.create_operation("live", &step_ids(&["a"])).await;
        broadcaster.create_operation("done", &step_ids(&["a"])).await;
        broadcaster.complete_operation("done", "finished").await;

        // Nothing is older than an hour yet.
        broadcaster.cleanup_old_operations(Duration::from_secs(3600));
        assert_eq!(broadcaster.get_all_snapshots().len(), 2);

        // With a zero horizon the completed one goes, the live one stays.
        broadcaster.cleanup_old_operations(Duration::ZERO);
        assert!(broadcaster.get_snapshot("done").is_none());
        assert!(broadcaster.get_snapshot("live").is_some());

        broadcaster.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_and_exits() {
        let hub = CollectingHub::new();
        let broadcaster = StatusBroadcaster::new(hub.clone());
        broadcaster.create_operation("op1", &step_ids(&["a"])).await;
        broadcaster.stop().await;
        assert_eq!(hub.events.lock().len(), 1);
    }
}
