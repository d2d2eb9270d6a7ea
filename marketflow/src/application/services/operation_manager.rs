// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Operation Manager
//!
//! Drives one operation end-to-end: expands the request into an ordered step
//! list, creates the live operation state, runs stages sequentially with
//! dependency gating, validation, per-step timeouts, retries, and
//! cancellation, keeps the broadcaster informed at every transition, and
//! composes the response.
//!
//! ## Execution Shape
//!
//! Stages run one at a time — the ingestion pipelines are data-serial, so a
//! parallel mode would buy nothing and is accepted only as an alias for the
//! sequential loop. Dependency order always holds.
//!
//! ## Timeouts and Cancellation
//!
//! Each attempt races the stage's `execute` future against the per-step
//! deadline and the operation's cancellation token inside `select!`; the
//! losing future is dropped, which is how cancellation reaches the stage.
//! A deadline hit during the retry wait likewise fails the step with a
//! timeout error.
//!
//! ## Retry Semantics
//!
//! The delay before attempt `n` is `initial × (n−1) × multiplier`, capped at
//! the policy maximum — see [`RetryPolicy::delay_for`]. Only failures
//! classified retryable are retried; attempts are bounded by the policy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use marketflow_bootstrap::shutdown::CancellationToken;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use marketflow_domain::entities::engine_config::EngineConfig;
use marketflow_domain::entities::operation::{OperationState, OperationStatus};
use marketflow_domain::entities::step_state::{StepState, StepStatus};
use marketflow_domain::error::{ErrorKind, ErrorList, OrchestratorError};
use marketflow_domain::registry::StepRegistry;
use marketflow_domain::services::pipeline_step::PipelineStep;
use marketflow_domain::value_objects::requests::{OperationRequest, OperationResponse};

use crate::infrastructure::services::status_broadcaster::StatusBroadcaster;

struct LiveOperation {
    state: Arc<OperationState>,
    cancel: CancellationToken,
}

/// Orchestrates operations over the registered step graph.
pub struct OperationManager {
    registry: Arc<StepRegistry>,
    broadcaster: Arc<StatusBroadcaster>,
    config: RwLock<EngineConfig>,
    live: RwLock<HashMap<String, LiveOperation>>,
}

impl OperationManager {
    /// Creates a manager over the given registry and broadcaster.
    pub fn new(registry: Arc<StepRegistry>, broadcaster: Arc<StatusBroadcaster>) -> Self {
        Self {
            registry,
            broadcaster,
            config: RwLock::new(EngineConfig::default()),
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a step with the underlying registry.
    pub fn register_step(&self, step: Arc<dyn PipelineStep>) -> Result<(), OrchestratorError> {
        self.registry.register(step)
    }

    /// Installs the engine configuration.
    pub fn set_config(&self, config: EngineConfig) {
        *self.config.write() = config;
    }

    /// Copy of the current configuration.
    pub fn get_config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    /// The step registry.
    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    /// The status broadcaster.
    pub fn broadcaster(&self) -> &Arc<StatusBroadcaster> {
        &self.broadcaster
    }

    /// Defensive clone of a live operation's state.
    ///
    /// # Errors
    ///
    /// `NotFound` when the operation is unknown or already removed.
    pub fn get_operation(&self, id: &str) -> Result<OperationState, OrchestratorError> {
        self.live
            .read()
            .get(id)
            .map(|live| live.state.as_ref().clone())
            .ok_or_else(|| {
                OrchestratorError::not_found(format!("operation '{}' is not active", id))
            })
    }

    /// Defensive clones of every currently active operation.
    pub fn list_operations(&self) -> Vec<OperationState> {
        self.live
            .read()
            .values()
            .map(|live| live.state.as_ref().clone())
            .collect()
    }

    /// Cancels a live operation.
    ///
    /// Marks the state cancelled, reports the failure through the
    /// broadcaster, and fires the operation's cancellation token; the
    /// running `execute` observes it at its next stage boundary — or
    /// mid-stage, through the raced `select!`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the operation is unknown.
    pub async fn cancel_operation(&self, id: &str) -> Result<(), OrchestratorError> {
        let (state, cancel) = {
            let live = self.live.read();
            let entry = live.get(id).ok_or_else(|| {
                OrchestratorError::not_found(format!("operation '{}' is not active", id))
            })?;
            (entry.state.clone(), entry.cancel.clone())
        };

        info!(operation = %id, "cancelling operation");
        state.cancel();
        let err = OrchestratorError::cancellation("operation cancelled");
        self.broadcaster.fail_operation(id, &err.to_string()).await;
        cancel.cancel();
        Ok(())
    }

    /// Runs an operation to terminal state and returns its summary.
    pub async fn execute(&self, request: OperationRequest) -> OperationResponse {
        let started = Instant::now();
        let operation_id = request
            .id
            .clone()
            .unwrap_or_else(|| format!("operation-{}", Utc::now().timestamp()));

        let state = Arc::new(OperationState::new(&operation_id));
        self.seed_config(&state, &request);

        // Resolve the step set: a single named step, or the full pipeline
        // in dependency order.
        let steps = match self.resolve_steps(&request) {
            Ok(steps) => steps,
            Err(err) => {
                warn!(operation = %operation_id, error = %err, "request expansion failed");
                state.fail(err.to_string());
                self.broadcaster.create_operation(&operation_id, &[]).await;
                self.broadcaster
                    .fail_operation(&operation_id, &err.to_string())
                    .await;
                return Self::compose_response(&operation_id, &state, started.elapsed());
            }
        };

        // Pre-create per-step state keyed by step id, then mirror the same
        // id list into the broadcaster.
        let step_ids: Vec<String> = steps.iter().map(|s| s.id().to_string()).collect();
        for step in &steps {
            state.set_step(StepState::new(step.id(), step.name()));
        }
        self.broadcaster
            .create_operation(&operation_id, &step_ids)
            .await;

        let cancel = CancellationToken::new();
        self.live.write().insert(
            operation_id.clone(),
            LiveOperation {
                state: state.clone(),
                cancel: cancel.clone(),
            },
        );

        state.start();
        self.broadcaster.start_operation(&operation_id).await;
        info!(operation = %operation_id, steps = steps.len(), "operation started");

        let outcome = self.run_stages(&operation_id, &state, &steps, &cancel).await;

        match outcome {
            Ok(()) => {
                state.complete();
                self.broadcaster
                    .complete_operation(&operation_id, "Operation completed successfully")
                    .await;
                info!(operation = %operation_id, "operation completed");
            }
            Err(err) if err.is_cancellation() || state.status() == OperationStatus::Cancelled => {
                state.cancel();
                self.broadcaster.cancel_operation(&operation_id).await;
                info!(operation = %operation_id, "operation cancelled");
            }
            Err(err) => {
                state.fail(err.to_string());
                self.broadcaster
                    .fail_operation(&operation_id, &err.to_string())
                    .await;
                warn!(operation = %operation_id, error = %err, "operation failed");
            }
        }

        self.live.write().remove(&operation_id);
        Self::compose_response(&operation_id, &state, started.elapsed())
    }

    fn seed_config(&self, state: &OperationState, request: &OperationRequest) {
        if let Some(from) = request.from_date {
            state.set_config_value("from_date", serde_json::json!(from.to_string()));
        }
        if let Some(to) = request.to_date {
            state.set_config_value("to_date", serde_json::json!(to.to_string()));
        }
        if !request.mode.is_empty() {
            state.set_config_value("mode", serde_json::json!(request.mode));
        }
        for (key, value) in &request.parameters {
            state.set_config_value(key, value.clone());
        }
    }

    fn resolve_steps(
        &self,
        request: &OperationRequest,
    ) -> Result<Vec<Arc<dyn PipelineStep>>, OrchestratorError> {
        match request.single_step() {
            Some(step_id) => {
                let step = self.registry.get(step_id).map_err(|err| {
                    OrchestratorError::wrap(
                        ErrorKind::NotFound,
                        format!("requested step '{}' is not registered", step_id),
                        err,
                    )
                })?;
                Ok(vec![step])
            }
            None => self.registry.dependency_order(),
        }
    }

    async fn run_stages(
        &self,
        operation_id: &str,
        state: &Arc<OperationState>,
        steps: &[Arc<dyn PipelineStep>],
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let config = self.get_config();
        let mut failures = ErrorList::new();

        for (index, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::cancellation("operation cancelled"));
            }

            // Already skipped by an earlier dependency cascade.
            if state
                .step(step.id())
                .is_some_and(|s| s.status == StepStatus::Skipped)
            {
                continue;
            }

            // The previous step must have ended well before this one runs.
            if index > 0 {
                let previous = &steps[index - 1];
                let previous_ok = state.step(previous.id()).is_some_and(|s| {
                    matches!(s.status, StepStatus::Completed | StepStatus::Skipped)
                });
                if !previous_ok {
                    if config.continue_on_error() {
                        debug!(
                            operation = %operation_id,
                            step = step.id(),
                            "previous step unfinished; continuing anyway"
                        );
                    } else {
                        let reason = format!("Previous step {} not completed", previous.id());
                        state.update_step(step.id(), |s| s.skip(reason.clone()));
                        self.broadcaster
                            .skip_step(operation_id, step.id(), &reason)
                            .await;
                        continue;
                    }
                }
            }

            match self
                .execute_step(operation_id, state, step.as_ref(), &config, cancel)
                .await
            {
                Ok(()) => {}
                Err(err) if config.continue_on_error() && !err.is_cancellation() => {
                    warn!(
                        operation = %operation_id,
                        step = step.id(),
                        error = %err,
                        "stage failed; continuing on error"
                    );
                    failures.push(err);
                }
                Err(err) => {
                    self.skip_dependents(operation_id, state, step.id()).await;
                    return Err(err);
                }
            }
        }

        match failures.into_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Transitively marks every still-pending dependent of `failed_id` as
    /// skipped.
    async fn skip_dependents(
        &self,
        operation_id: &str,
        state: &Arc<OperationState>,
        failed_id: &str,
    ) {
        let mut worklist = vec![failed_id.to_string()];
        while let Some(current) = worklist.pop() {
            for dependent in self.registry.dependents(&current) {
                let id = dependent.id().to_string();
                let pending = state
                    .step(&id)
                    .is_some_and(|s| s.status == StepStatus::Pending);
                if pending {
                    let reason = format!("Dependency {} failed", current);
                    state.update_step(&id, |s| s.skip(reason.clone()));
                    self.broadcaster.skip_step(operation_id, &id, &reason).await;
                    worklist.push(id);
                }
            }
        }
    }

    /// Runs one stage with dependency gating, validation, timeout, and
    /// retries.
    async fn execute_step(
        &self,
        operation_id: &str,
        state: &Arc<OperationState>,
        step: &dyn PipelineStep,
        config: &EngineConfig,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let step_id = step.id();

        if state.step(step_id).is_none() {
            return Err(OrchestratorError::fatal(format!(
                "no state was created for step '{}'",
                step_id
            )));
        }

        // Every declared dependency must have completed in this operation.
        let unmet: Vec<String> = step
            .dependencies()
            .into_iter()
            .filter(|dep| {
                !state
                    .step(dep)
                    .is_some_and(|s| s.status == StepStatus::Completed)
            })
            .collect();
        if !unmet.is_empty() {
            let reason = format!("Dependencies not met: {}", unmet.join(", "));
            state.update_step(step_id, |s| s.skip(reason.clone()));
            self.broadcaster
                .skip_step(operation_id, step_id, &reason)
                .await;
            return Err(OrchestratorError::dependency(reason).with_step(step_id));
        }

        if let Err(err) = step.validate(state) {
            let reason = format!("Validation failed: {}", err);
            state.update_step(step_id, |s| s.skip(reason.clone()));
            self.broadcaster
                .skip_step(operation_id, step_id, &reason)
                .await;
            return Err(OrchestratorError::wrap(
                ErrorKind::Validation,
                format!("step '{}' validation failed", step_id),
                err,
            )
            .with_step(step_id));
        }

        let timeout = config.timeout_for(step_id);
        let policy = config.retry_policy();
        let mut attempt: u32 = 1;

        loop {
            let deadline = Instant::now() + timeout;

            state.update_step(step_id, |s| s.start());
            self.broadcaster
                .update_step_progress(
                    operation_id,
                    step_id,
                    0.0,
                    &format!("Starting {}", step.name()),
                )
                .await;
            debug!(operation = %operation_id, step = step_id, attempt, "stage attempt starting");

            let result = tokio::select! {
                result = step.execute(state.clone()) => result,
                _ = cancel.cancelled() => {
                    let err = OrchestratorError::cancellation("operation cancelled")
                        .with_step(step_id);
                    state.update_step(step_id, |s| s.fail(err.to_string()));
                    self.broadcaster
                        .fail_step(operation_id, step_id, &err.to_string())
                        .await;
                    return Err(err);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let err = OrchestratorError::timeout(format!(
                        "step timed out after {:?}",
                        timeout
                    ))
                    .with_step(step_id);
                    state.update_step(step_id, |s| s.fail(err.to_string()));
                    self.broadcaster
                        .fail_step(operation_id, step_id, &err.to_string())
                        .await;
                    return Err(err);
                }
            };

            match result {
                Ok(()) => {
                    state.update_step(step_id, |s| s.complete("Step completed successfully"));
                    self.broadcaster
                        .update_step_progress(
                            operation_id,
                            step_id,
                            100.0,
                            "Step completed successfully",
                        )
                        .await;
                    return Ok(());
                }
                Err(err) => {
                    state.update_step(step_id, |s| s.error = Some(err.to_string()));

                    if !err.is_retryable() || attempt >= policy.max_attempts() {
                        state.update_step(step_id, |s| s.fail(err.to_string()));
                        self.broadcaster
                            .fail_step(
                                operation_id,
                                step_id,
                                &format!("Step failed: {}", err),
                            )
                            .await;
                        return Err(OrchestratorError::wrap(
                            ErrorKind::Execution,
                            format!("step '{}' failed after {} attempt(s)", step_id, attempt),
                            err,
                        )
                        .with_step(step_id));
                    }

                    let delay = policy.delay_for(attempt + 1);
                    warn!(
                        operation = %operation_id,
                        step = step_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "stage failed; retrying"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = tokio::time::sleep_until(deadline) => {
                            let timeout_err = OrchestratorError::timeout(format!(
                                "step timed out after {:?} while waiting to retry",
                                timeout
                            ))
                            .with_step(step_id);
                            state.update_step(step_id, |s| s.fail(timeout_err.to_string()));
                            self.broadcaster
                                .fail_step(operation_id, step_id, &timeout_err.to_string())
                                .await;
                            return Err(timeout_err);
                        }
                        _ = cancel.cancelled() => {
                            let cancel_err = OrchestratorError::cancellation("operation cancelled")
                                .with_step(step_id);
                            state.update_step(step_id, |s| s.fail(cancel_err.to_string()));
                            self.broadcaster
                                .fail_step(operation_id, step_id, &cancel_err.to_string())
                                .await;
                            return Err(cancel_err);
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn compose_response(
        operation_id: &str,
        state: &OperationState,
        duration: Duration,
    ) -> OperationResponse {
        OperationResponse {
            id: operation_id.to_string(),
            status: state.status(),
            duration,
            steps: state.step_states(),
            error: state.error(),
        }
    }
}
