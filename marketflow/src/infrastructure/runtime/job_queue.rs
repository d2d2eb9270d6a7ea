// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Job Queue
//!
//! Accepts asynchronous operation submissions, bounds concurrency with a
//! worker pool over a bounded channel, persists every lifecycle transition
//! through the pluggable store, and survives restarts: persisted running
//! jobs are demoted to pending and re-enqueued when the queue starts.
//!
//! ## Dispatch
//!
//! A job names either a single stage or the `full_pipeline` sentinel. Full
//! pipelines iterate the registry's dependency order, skipping stages whose
//! required inputs are not available in the manifest; single stages fail
//! outright when their inputs are missing. Before any stage runs, the
//! worker loads — or creates and pre-scans — the operation's manifest, so a
//! restarted operation observes previously produced files and skips
//! satisfied stages.
//!
//! ## Panic Safety
//!
//! Each job body runs in its own task; a panicking stage fails that job
//! (`job processing panicked: …`) and the worker pool keeps serving.
//!
//! ## Job Progress
//!
//! A job's progress is a single aggregate on the job record — `(i × 90) /
//! stage_count` entering stage `i`, with the last tenth reserved for
//! post-work bookkeeping. Per-stage progress detail flows through the
//! broadcaster only.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use marketflow_bootstrap::shutdown::CancellationToken;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use marketflow_domain::entities::job::{Job, JobFilter, JobStatus};
use marketflow_domain::entities::manifest::{PipelineManifest, CANONICAL_PIPELINE};
use marketflow_domain::entities::operation::OperationState;
use marketflow_domain::entities::step_state::StepState;
use marketflow_domain::error::{ErrorKind, OrchestratorError};
use marketflow_domain::registry::StepRegistry;
use marketflow_domain::repositories::job_store::JobStore;
use marketflow_domain::services::pipeline_step::PipelineStep;
use marketflow_domain::value_objects::data_spec::data_types;
use marketflow_domain::value_objects::requests::{JobRequest, FULL_PIPELINE};

use crate::infrastructure::runtime::supervisor::{spawn_supervised, AppResult};
use crate::infrastructure::services::status_broadcaster::StatusBroadcaster;

/// Worker count used when the caller supplies zero.
const DEFAULT_WORKER_COUNT: usize = 4;

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<Job>>>;

struct ActiveJob {
    job: Job,
    cancel: CancellationToken,
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Size of the worker pool
    pub worker_count: usize,
    /// Jobs currently buffered in the channel
    pub queued_jobs: usize,
    /// Channel capacity
    pub queue_capacity: usize,
    /// Jobs currently being processed
    pub active_jobs: usize,
}

/// Bounded worker pool executing persisted jobs against the step registry.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    registry: Arc<StepRegistry>,
    broadcaster: Arc<StatusBroadcaster>,
    data_root: PathBuf,
    worker_count: usize,
    queue_capacity: usize,
    job_tx: mpsc::Sender<Job>,
    job_rx: SharedReceiver,
    active: Arc<RwLock<HashMap<String, ActiveJob>>>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<tokio::task::JoinHandle<AppResult<()>>>>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl JobQueue {
    /// Creates a queue; `worker_count` of zero selects the default of 4.
    ///
    /// `data_root` anchors the canonical data layout used by the manifest
    /// pre-scan.
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<StepRegistry>,
        broadcaster: Arc<StatusBroadcaster>,
        data_root: impl Into<PathBuf>,
        worker_count: usize,
    ) -> Arc<Self> {
        let worker_count = if worker_count == 0 {
            DEFAULT_WORKER_COUNT
        } else {
            worker_count
        };
        let queue_capacity = worker_count * 2;
        let (job_tx, job_rx) = mpsc::channel(queue_capacity);

        Arc::new(Self {
            store,
            registry,
            broadcaster,
            data_root: data_root.into(),
            worker_count,
            queue_capacity,
            job_tx,
            job_rx: Arc::new(AsyncMutex::new(job_rx)),
            active: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
            created_at: chrono::Utc::now(),
        })
    }

    /// Spawns the worker pool and the recovery routine. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        info!(workers = self.worker_count, "job queue starting");

        for worker_id in 0..self.worker_count {
            let this = self.clone();
            let rx = self.job_rx.clone();
            workers.push(spawn_supervised("queue-worker", async move {
                this.worker_loop(worker_id, rx).await
            }));
        }

        let this = self.clone();
        workers.push(spawn_supervised("job-recovery", async move {
            this.recover_jobs().await
        }));
    }

    /// Signals shutdown and waits up to `timeout` for in-flight workers.
    ///
    /// # Errors
    ///
    /// `Timeout` when the grace period is exceeded.
    pub async fn stop(&self, timeout: Duration) -> Result<(), OrchestratorError> {
        info!("job queue stopping");
        self.shutdown.cancel();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .map(|_| ())
            .map_err(|_| {
                OrchestratorError::timeout(format!(
                    "job queue did not stop within {:?}",
                    timeout
                ))
            })
    }

    /// Persists and enqueues a job.
    ///
    /// The operation's step list is pre-declared in the broadcaster — the
    /// named step for single-step jobs, the canonical pipeline for full
    /// runs. A full channel does not block: the job is marked failed and an
    /// error is returned.
    pub async fn enqueue(&self, request: JobRequest) -> Result<Job, OrchestratorError> {
        let job = Job::from_request(request);
        self.store.create_job(&job).await?;

        let step_ids: Vec<String> =
            if job.step_id.is_empty() || job.step_id == FULL_PIPELINE {
                CANONICAL_PIPELINE.iter().map(|s| s.to_string()).collect()
            } else {
                vec![job.step_id.clone()]
            };
        self.broadcaster
            .create_operation(&job.operation_id, &step_ids)
            .await;

        match self.job_tx.try_send(job.clone()) {
            Ok(()) => {
                debug!(job = %job.id, operation = %job.operation_id, "job enqueued");
                Ok(job)
            }
            Err(send_err) => {
                let reason = match send_err {
                    mpsc::error::TrySendError::Full(_) => "job queue is full",
                    mpsc::error::TrySendError::Closed(_) => "job queue is stopped",
                };
                let mut failed = job;
                failed.mark_failed(reason);
                self.store.update_job(&failed).await?;
                warn!(job = %failed.id, "{}", reason);
                Err(OrchestratorError::invalid_state(reason))
            }
        }
    }

    /// The active record when the job is in flight, otherwise the stored
    /// one.
    pub async fn get_job(&self, id: &str) -> Result<Job, OrchestratorError> {
        if let Some(entry) = self.active.read().get(id) {
            return Ok(entry.job.clone());
        }
        self.store.get_job(id).await
    }

    /// Cancels a pending or running job.
    ///
    /// The persisted record turns `cancelled` immediately; for a running
    /// job the stored cancellation token fires too, so the in-flight stage
    /// is torn down rather than finishing obliviously.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the job is already terminal; `NotFound` when the
    /// id is unknown.
    pub async fn cancel_job(&self, id: &str) -> Result<(), OrchestratorError> {
        let active_entry = self
            .active
            .read()
            .get(id)
            .map(|entry| (entry.job.clone(), entry.cancel.clone()));

        let mut job = match &active_entry {
            Some((job, _)) => job.clone(),
            None => self.store.get_job(id).await?,
        };
        if !matches!(job.status, JobStatus::Pending | JobStatus::Running) {
            return Err(OrchestratorError::invalid_state(format!(
                "cannot cancel job '{}' in status {}",
                id, job.status
            )));
        }

        job.mark_cancelled();
        self.store.update_job(&job).await?;
        if let Some(entry) = self.active.write().get_mut(id) {
            entry.job = job;
        }
        if let Some((_, cancel)) = active_entry {
            cancel.cancel();
        }
        info!(job = %id, "job cancelled");
        Ok(())
    }

    /// Lists persisted jobs matching the filter.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, OrchestratorError> {
        self.store.list_jobs(filter).await
    }

    /// Current queue statistics.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            worker_count: self.worker_count,
            queued_jobs: self.queue_capacity - self.job_tx.capacity(),
            queue_capacity: self.queue_capacity,
            active_jobs: self.active.read().len(),
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, rx: SharedReceiver) -> AppResult<()> {
        loop {
            let job = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                job = async { rx.lock().await.recv().await } => job,
            };
            let Some(job) = job else { return Ok(()) };
            debug!(worker = worker_id, job = %job.id, "job dequeued");
            self.clone().process_job(job).await;
        }
    }

    /// Runs one job inside its own task so a panicking stage cannot take
    /// the worker down.
    async fn process_job(self: Arc<Self>, job: Job) {
        let job_id = job.id.clone();
        let operation_id = job.operation_id.clone();
        let cancel = CancellationToken::new();
        self.active.write().insert(
            job_id.clone(),
            ActiveJob {
                job: job.clone(),
                cancel: cancel.clone(),
            },
        );

        let body = tokio::spawn({
            let this = self.clone();
            let cancel = cancel.clone();
            async move { this.run_job(job, cancel).await }
        });

        if let Err(join_err) = body.await {
            let reason = if join_err.is_panic() {
                format!("job processing panicked: {}", join_err)
            } else {
                format!("job task aborted: {}", join_err)
            };
            error!(job = %job_id, "{}", reason);
            if let Ok(mut stored) = self.store.get_job(&job_id).await {
                if !stored.status.is_terminal() {
                    stored.mark_failed(&reason);
                    if let Err(e) = self.store.update_job(&stored).await {
                        warn!(job = %job_id, error = %e, "failed to persist panic outcome");
                    }
                }
            }
            self.broadcaster.fail_operation(&operation_id, &reason).await;
        }

        self.active.write().remove(&job_id);
    }

    async fn run_job(&self, mut job: Job, cancel: CancellationToken) {
        // The job may have been cancelled while it sat in the channel. The
        // operation already has a pending snapshot from enqueue, so it still
        // needs its terminal broadcast.
        if let Ok(stored) = self.store.get_job(&job.id).await {
            if stored.status == JobStatus::Cancelled {
                info!(job = %job.id, "job was cancelled while queued; skipping");
                self.broadcaster.cancel_operation(&job.operation_id).await;
                return;
            }
        }

        match job.request.trace_id() {
            Some(trace_id) => info!(job = %job.id, trace_id, "job starting"),
            None => info!(job = %job.id, "job starting"),
        }

        let operation_id = job.operation_id.clone();
        let result = self.run_job_inner(&mut job, &cancel).await;

        match result {
            Ok(()) => {
                job.mark_completed("Operation completed successfully");
                if let Err(e) = self.persist(&job).await {
                    warn!(job = %job.id, error = %e, "failed to persist completion");
                }
                self.broadcaster
                    .complete_operation(&operation_id, "Operation completed successfully")
                    .await;
                info!(job = %job.id, "job completed");
            }
            Err(err) if err.is_cancellation() || cancel.is_cancelled() => {
                job.mark_cancelled();
                if let Err(e) = self.persist(&job).await {
                    warn!(job = %job.id, error = %e, "failed to persist cancellation");
                }
                self.broadcaster.cancel_operation(&operation_id).await;
                info!(job = %job.id, "job cancelled mid-flight");
            }
            Err(err) => {
                job.mark_failed(err.to_string());
                if let Err(e) = self.persist(&job).await {
                    warn!(job = %job.id, error = %e, "failed to persist failure");
                }
                self.broadcaster
                    .fail_operation(&operation_id, &err.to_string())
                    .await;
                warn!(job = %job.id, error = %err, "job failed");
            }
        }
    }

    async fn run_job_inner(
        &self,
        job: &mut Job,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let manifest = Arc::new(RwLock::new(self.load_or_create_manifest(job).await?));

        job.mark_running();
        self.persist(job).await?;
        self.broadcaster.start_operation(&job.operation_id).await;

        if job.step_id.is_empty() || job.step_id == FULL_PIPELINE {
            self.execute_full_pipeline(job, &manifest, cancel).await
        } else {
            let step_id = job.step_id.clone();
            let stage = self.registry.get(&step_id).map_err(|err| {
                OrchestratorError::wrap(
                    ErrorKind::NotFound,
                    format!("job names unknown stage '{}'", step_id),
                    err,
                )
            })?;
            let ready = { stage.can_run(&manifest.read()) };
            if !ready {
                return Err(OrchestratorError::execution(
                    format!(
                        "stage {} cannot run: required inputs not available",
                        stage.id()
                    ),
                    false,
                )
                .with_step(stage.id()));
            }
            self.execute_stage(job, &manifest, stage.as_ref(), cancel).await
        }
    }

    async fn execute_full_pipeline(
        &self,
        job: &mut Job,
        manifest: &Arc<RwLock<PipelineManifest>>,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let stages = self.registry.dependency_order()?;
        let total = stages.len().max(1);

        for (index, stage) in stages.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::cancellation("job cancelled"));
            }

            // 90% is divided across the stages; the last tenth is reserved
            // for post-work bookkeeping.
            job.progress = ((index * 90) / total) as u8;
            job.message = format!("Running {}", stage.name());
            self.persist(job).await?;

            let ready = { stage.can_run(&manifest.read()) };
            if !ready {
                info!(
                    job = %job.id,
                    stage = stage.id(),
                    "stage cannot run; required inputs not available, skipping"
                );
                self.broadcaster
                    .skip_step(
                        &job.operation_id,
                        stage.id(),
                        "required inputs not available",
                    )
                    .await;
                continue;
            }

            self.execute_stage(job, manifest, stage.as_ref(), cancel).await?;
        }

        job.progress = 90;
        self.persist(job).await?;
        Ok(())
    }

    /// Runs one stage for the job: manifest bookkeeping, a throwaway
    /// operation state seeded with the job's date range, and broadcaster
    /// updates.
    async fn execute_stage(
        &self,
        job: &Job,
        manifest: &Arc<RwLock<PipelineManifest>>,
        stage: &dyn PipelineStep,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let operation_id = &job.operation_id;
        {
            manifest.write().record_stage_start(stage.id(), stage.name());
        }

        let state = Arc::new(OperationState::new(operation_id));
        if let Some(from) = job.request.from_date {
            state.set_config_value("from_date", serde_json::json!(from.to_string()));
        }
        if let Some(to) = job.request.to_date {
            state.set_config_value("to_date", serde_json::json!(to.to_string()));
        }
        if !job.request.mode.is_empty() {
            state.set_config_value("mode", serde_json::json!(job.request.mode));
        }
        let mut step_state = StepState::new(stage.id(), stage.name());
        step_state.start();
        state.set_step(step_state);
        state.start();

        self.broadcaster
            .update_step_progress(
                operation_id,
                stage.id(),
                0.0,
                &format!("Starting {}", stage.name()),
            )
            .await;

        let result = tokio::select! {
            result = stage.execute(state.clone()) => result,
            _ = cancel.cancelled() => {
                Err(OrchestratorError::cancellation("job cancelled").with_step(stage.id()))
            }
        };

        match result {
            Err(err) => {
                {
                    manifest
                        .write()
                        .record_stage_failure(stage.id(), &err.to_string());
                }
                if let Err(e) = self.persist_manifest(manifest).await {
                    warn!(job = %job.id, error = %e, "failed to persist manifest failure");
                }
                self.broadcaster
                    .fail_step(operation_id, stage.id(), &err.to_string())
                    .await;
                Err(OrchestratorError::wrap(
                    ErrorKind::Execution,
                    format!("stage '{}' failed", stage.id()),
                    err,
                )
                .with_step(stage.id()))
            }
            Ok(()) => {
                let outputs = stage.produced_outputs();
                let mut produced = Vec::with_capacity(outputs.len());
                {
                    let mut m = manifest.write();
                    for output in &outputs {
                        if let Err(err) = m.scan_data_directory(
                            &output.data_type,
                            &output.location,
                            &output.pattern,
                        ) {
                            warn!(
                                stage = stage.id(),
                                data_type = %output.data_type,
                                error = %err,
                                "output scan failed"
                            );
                        }
                        produced.push(output.data_type.clone());
                    }
                    m.record_stage_completion(stage.id(), produced, HashMap::new());
                }
                self.persist_manifest(manifest).await?;
                self.broadcaster
                    .complete_step(operation_id, stage.id(), "Step completed successfully")
                    .await;
                Ok(())
            }
        }
    }

    /// Loads the operation's manifest; on miss, creates one and pre-scans
    /// the canonical data layout so pre-existing inputs are visible.
    async fn load_or_create_manifest(
        &self,
        job: &Job,
    ) -> Result<PipelineManifest, OrchestratorError> {
        if let Some(manifest) = self
            .store
            .get_manifest_by_operation_id(&job.operation_id)
            .await?
        {
            return Ok(manifest);
        }

        let mut manifest = PipelineManifest::new(
            &job.operation_id,
            job.request.from_date,
            job.request.to_date,
            &job.request.mode,
        );
        self.store.create_manifest(&manifest).await?;
        self.pre_scan(&mut manifest);
        self.store.update_manifest(&manifest).await?;
        debug!(operation = %job.operation_id, manifest = manifest.id(), "manifest created");
        Ok(manifest)
    }

    fn pre_scan(&self, manifest: &mut PipelineManifest) {
        let targets = [
            (data_types::EXCEL_FILES, self.data_root.join("data/downloads"), "*.xls*"),
            (data_types::CSV_FILES, self.data_root.join("data/reports"), "*.csv"),
            (
                data_types::INDEX_DATA,
                self.data_root.join("data/reports/indexes"),
                "indexes.csv",
            ),
            (
                data_types::LIQUIDITY_RESULTS,
                self.data_root.join("data/reports/liquidity_reports"),
                "liquidity_*.csv",
            ),
        ];
        for (data_type, dir, pattern) in targets {
            if !dir.is_dir() {
                continue;
            }
            match manifest.scan_data_directory(data_type, &dir.to_string_lossy(), pattern) {
                Ok(count) => debug!(data_type, count, "pre-scan found existing data"),
                Err(err) => warn!(data_type, error = %err, "pre-scan failed"),
            }
        }
    }

    async fn persist(&self, job: &Job) -> Result<(), OrchestratorError> {
        self.store.update_job(job).await?;
        if let Some(entry) = self.active.write().get_mut(&job.id) {
            entry.job = job.clone();
        }
        Ok(())
    }

    async fn persist_manifest(
        &self,
        manifest: &Arc<RwLock<PipelineManifest>>,
    ) -> Result<(), OrchestratorError> {
        let snapshot = manifest.read().clone();
        self.store.update_manifest(&snapshot).await
    }

    /// Re-enqueues persisted work on start: running jobs are demoted to
    /// pending first; jobs that no longer fit in the channel are left
    /// pending for the next start.
    async fn recover_jobs(&self) -> AppResult<()> {
        // Only jobs persisted before this queue existed are orphans; newer
        // ones belong to live enqueue calls.
        let orphaned = |job: &Job| job.created_at < self.created_at;
        let interrupted: Vec<Job> = self
            .store
            .list_jobs(&JobFilter::by_status(JobStatus::Running))
            .await?
            .into_iter()
            .filter(|j| orphaned(j))
            .collect();
        let waiting: Vec<Job> = self
            .store
            .list_jobs(&JobFilter::by_status(JobStatus::Pending))
            .await?
            .into_iter()
            .filter(|j| orphaned(j))
            .collect();

        let mut recovered = 0usize;
        for mut job in interrupted {
            job.mark_pending();
            self.store.update_job(&job).await?;
            recovered += self.requeue(job);
        }
        for job in waiting {
            recovered += self.requeue(job);
        }

        if recovered > 0 {
            info!(recovered, "recovered persisted jobs");
        }
        Ok(())
    }

    fn requeue(&self, job: Job) -> usize {
        let job_id = job.id.clone();
        match self.job_tx.try_send(job) {
            Ok(()) => 1,
            Err(_) => {
                warn!(job = %job_id, "queue full during recovery; job stays pending");
                0
            }
        }
    }
}
