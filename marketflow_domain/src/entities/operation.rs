// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Operation Runtime State
//!
//! `OperationState` is the live, shared state of one operation run. The
//! operation manager owns it for the duration of the run; stage
//! implementations receive a shared handle and report progress and hand-off
//! values through it concurrently. Every mutable field sits behind its own
//! reader/writer lock, so the driving task and a stage's worker threads can
//! touch disjoint parts of the state without contending.
//!
//! ## Ownership
//!
//! The manager holds the state in its live-operations map while `execute`
//! runs and removes it when the run returns. External readers only ever see
//! defensive clones (`Clone` reads every lock and produces a detached copy).
//!
//! ## Invariants
//!
//! - `is_complete()` ⇔ no step is pending or active
//! - `has_failures()` ⇔ at least one step failed
//! - the shared context map is the only sanctioned inter-stage hand-off

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::entities::step_state::{StepState, StepStatus};

/// Lifecycle status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Accepted, not yet running
    Pending,
    /// Stages are executing
    Running,
    /// All selected stages reached a successful terminal state
    Completed,
    /// At least one stage failed and aborted the run
    Failed,
    /// The run was cancelled
    Cancelled,
}

impl OperationStatus {
    /// Whether this status ends the operation's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Pending => write!(f, "pending"),
            OperationStatus::Running => write!(f, "running"),
            OperationStatus::Completed => write!(f, "completed"),
            OperationStatus::Failed => write!(f, "failed"),
            OperationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug)]
struct OperationInner {
    status: OperationStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// Live state of a running operation, shared between the driving task and
/// stage implementations.
#[derive(Debug)]
pub struct OperationState {
    id: String,
    created_at: DateTime<Utc>,
    inner: RwLock<OperationInner>,
    steps: RwLock<HashMap<String, StepState>>,
    context: RwLock<HashMap<String, serde_json::Value>>,
    config: RwLock<HashMap<String, serde_json::Value>>,
}

impl OperationState {
    /// Creates a pending operation state.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            inner: RwLock::new(OperationInner {
                status: OperationStatus::Pending,
                started_at: None,
                ended_at: None,
                error: None,
            }),
            steps: RwLock::new(HashMap::new()),
            context: RwLock::new(HashMap::new()),
            config: RwLock::new(HashMap::new()),
        }
    }

    /// Operation identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle status.
    pub fn status(&self) -> OperationStatus {
        self.inner.read().status
    }

    /// Start timestamp, set by [`OperationState::start`].
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().started_at
    }

    /// End timestamp, set by any terminal transition.
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().ended_at
    }

    /// Terminal error, when the operation failed.
    pub fn error(&self) -> Option<String> {
        self.inner.read().error.clone()
    }

    /// Transitions to `running` and stamps the start time.
    pub fn start(&self) {
        let mut inner = self.inner.write();
        inner.status = OperationStatus::Running;
        inner.started_at = Some(Utc::now());
    }

    /// Transitions to `completed`.
    pub fn complete(&self) {
        let mut inner = self.inner.write();
        inner.status = OperationStatus::Completed;
        inner.ended_at = Some(Utc::now());
    }

    /// Transitions to `failed`, recording the error.
    pub fn fail(&self, error: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.status = OperationStatus::Failed;
        inner.error = Some(error.into());
        inner.ended_at = Some(Utc::now());
    }

    /// Transitions to `cancelled`.
    pub fn cancel(&self) {
        let mut inner = self.inner.write();
        inner.status = OperationStatus::Cancelled;
        inner.ended_at = Some(Utc::now());
    }

    /// Inserts (or replaces) a step state, keyed by step id.
    pub fn set_step(&self, state: StepState) {
        self.steps.write().insert(state.id.clone(), state);
    }

    /// Clones the state of a single step.
    pub fn step(&self, step_id: &str) -> Option<StepState> {
        self.steps.read().get(step_id).cloned()
    }

    /// Applies a mutation to a step's state. Returns false if the id is
    /// unknown.
    pub fn update_step<F>(&self, step_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut StepState),
    {
        match self.steps.write().get_mut(step_id) {
            Some(step) => {
                mutate(step);
                true
            }
            None => false,
        }
    }

    /// Clones the full step-state map.
    pub fn step_states(&self) -> HashMap<String, StepState> {
        self.steps.read().clone()
    }

    /// True when no step is pending or active.
    pub fn is_complete(&self) -> bool {
        self.steps
            .read()
            .values()
            .all(|s| s.status.is_terminal())
    }

    /// True when at least one step failed.
    pub fn has_failures(&self) -> bool {
        self.steps
            .read()
            .values()
            .any(|s| s.status == StepStatus::Failed)
    }

    /// Stores an inter-stage hand-off value.
    pub fn set_context(&self, key: impl Into<String>, value: serde_json::Value) {
        self.context.write().insert(key.into(), value);
    }

    /// Reads an inter-stage hand-off value.
    pub fn context_value(&self, key: &str) -> Option<serde_json::Value> {
        self.context.read().get(key).cloned()
    }

    /// Stores a configuration value.
    pub fn set_config_value(&self, key: impl Into<String>, value: serde_json::Value) {
        self.config.write().insert(key.into(), value);
    }

    /// Reads a configuration value.
    pub fn config_value(&self, key: &str) -> Option<serde_json::Value> {
        self.config.read().get(key).cloned()
    }

    /// Clones the full configuration map.
    pub fn config_map(&self) -> HashMap<String, serde_json::Value> {
        self.config.read().clone()
    }
}

impl Clone for OperationState {
    /// Produces a detached defensive copy; the clone shares no locks with
    /// the original.
    fn clone(&self) -> Self {
        let inner = self.inner.read();
        Self {
            id: self.id.clone(),
            created_at: self.created_at,
            inner: RwLock::new(OperationInner {
                status: inner.status,
                started_at: inner.started_at,
                ended_at: inner.ended_at,
                error: inner.error.clone(),
            }),
            steps: RwLock::new(self.steps.read().clone()),
            context: RwLock::new(self.context.read().clone()),
            config: RwLock::new(self.config.read().clone()),
        }
    }
}
