// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Operation Snapshots
//!
//! A snapshot is the complete externally visible state of an operation at a
//! point in time — the only payload the engine ever publishes. Every emitted
//! snapshot is self-contained: it lists every step that has ever been
//! mentioned for the operation with its latest status, progress, message,
//! and metadata, so an observer that misses arbitrary messages is never left
//! with partial state.
//!
//! The invariant-preserving mutation helpers live here so the broadcaster's
//! serializing worker stays a thin shell:
//!
//! - step progress is **monotonic while the step is running** — a lower
//!   value than the current one is discarded (message and metadata still
//!   apply), defending against out-of-order events
//! - an update for an unknown step id **auto-appends** a step rather than
//!   stalling the observer, papering over id mismatches in stage
//!   implementations
//! - overall progress is the rounded mean of the step progresses
//! - terminal statuses stamp `completed_at` exactly once

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::operation::OperationStatus;

/// Step status vocabulary used in broadcast snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStepStatus {
    /// Declared but not yet started
    Pending,
    /// In progress
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Not run
    Skipped,
}

/// Externally visible state of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    /// Step identifier (snapshot key)
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Latest known status
    pub status: SnapshotStepStatus,
    /// Progress in `[0, 100]`
    pub progress: f64,
    /// Latest progress message
    pub message: String,
    /// Error string, when the step failed
    pub error: Option<String>,
    /// Free-form metadata
    pub metadata: HashMap<String, Value>,
}

impl StepSnapshot {
    fn pending(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status: SnapshotStepStatus::Pending,
            progress: 0.0,
            message: String::new(),
            error: None,
            metadata: HashMap::new(),
        }
    }
}

/// Complete externally visible state of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    /// Operation identifier
    pub operation_id: String,
    /// Operation status
    pub status: OperationStatus,
    /// Rounded mean of step progresses, in `[0, 100]`
    pub progress: f64,
    /// Name of the step currently making progress, empty when none
    pub current_step: String,
    /// Every step ever mentioned for this operation, in declaration order
    pub steps: Vec<StepSnapshot>,
    /// When the snapshot was created
    pub created_at: DateTime<Utc>,
    /// When the snapshot last changed
    pub updated_at: DateTime<Utc>,
    /// Stamped exactly once, on the first terminal transition
    pub completed_at: Option<DateTime<Utc>>,
    /// Operation-level error string
    pub error: Option<String>,
    /// Operation-level message
    pub message: String,
}

impl OperationSnapshot {
    /// Creates a pending snapshot with one pending step per declared id.
    pub fn new(operation_id: impl Into<String>, step_ids: &[String]) -> Self {
        let now = Utc::now();
        Self {
            operation_id: operation_id.into(),
            status: OperationStatus::Pending,
            progress: 0.0,
            current_step: String::new(),
            steps: step_ids
                .iter()
                .map(|id| StepSnapshot::pending(id, id))
                .collect(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            message: String::new(),
        }
    }

    /// Finds a step snapshot by id.
    pub fn step(&self, step_id: &str) -> Option<&StepSnapshot> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Applies a progress update to a step, enforcing the monotonicity and
    /// auto-append rules.
    pub fn apply_step_progress(
        &mut self,
        step_id: &str,
        progress: f64,
        message: &str,
        metadata: Option<HashMap<String, Value>>,
    ) {
        let clamped = progress.clamp(0.0, 100.0);
        let idx = match self.steps.iter().position(|s| s.id == step_id) {
            Some(idx) => idx,
            None => {
                // Unknown step id: append rather than dropping the event, so
                // an id mismatch in a stage implementation cannot stall the
                // observer.
                self.steps.push(StepSnapshot {
                    id: step_id.to_string(),
                    name: step_id.to_string(),
                    status: if clamped >= 100.0 {
                        SnapshotStepStatus::Completed
                    } else {
                        SnapshotStepStatus::Running
                    },
                    progress: clamped,
                    message: message.to_string(),
                    error: None,
                    metadata: metadata.unwrap_or_default(),
                });
                return;
            }
        };

        let step = &mut self.steps[idx];
        let regressed = clamped < step.progress && step.status == SnapshotStepStatus::Running;
        if !regressed {
            step.progress = clamped;
            if clamped >= 100.0 {
                step.status = SnapshotStepStatus::Completed;
            } else if clamped >= 1.0 {
                step.status = SnapshotStepStatus::Running;
            }
        }
        step.message = message.to_string();
        if let Some(metadata) = metadata {
            step.metadata.extend(metadata);
        }

        let running = step.status == SnapshotStepStatus::Running;
        let name = step.name.clone();
        if running && (1.0..100.0).contains(&clamped) {
            self.current_step = name;
        }
    }

    /// Marks a step completed with progress 100.
    pub fn complete_step(&mut self, step_id: &str, message: &str) {
        self.apply_step_progress(step_id, 100.0, message, None);
        if let Some(step) = self.steps.iter_mut().find(|s| s.id == step_id) {
            step.status = SnapshotStepStatus::Completed;
        }
    }

    /// Marks a step failed, recording the error string.
    pub fn fail_step(&mut self, step_id: &str, error: &str) {
        if self.step(step_id).is_none() {
            self.apply_step_progress(step_id, 0.0, "", None);
        }
        if let Some(step) = self.steps.iter_mut().find(|s| s.id == step_id) {
            step.status = SnapshotStepStatus::Failed;
            step.error = Some(error.to_string());
        }
    }

    /// Marks a step skipped.
    pub fn skip_step(&mut self, step_id: &str, reason: &str) {
        if self.step(step_id).is_none() {
            self.apply_step_progress(step_id, 0.0, "", None);
        }
        if let Some(step) = self.steps.iter_mut().find(|s| s.id == step_id) {
            step.status = SnapshotStepStatus::Skipped;
            step.message = reason.to_string();
        }
    }

    /// Forces any lingering pending/running step to completed/100.
    ///
    /// Called when the operation completes, so a missed step event cannot
    /// leave the final snapshot looking unfinished.
    pub fn force_steps_completed(&mut self) {
        for step in &mut self.steps {
            if matches!(
                step.status,
                SnapshotStepStatus::Pending | SnapshotStepStatus::Running
            ) {
                step.status = SnapshotStepStatus::Completed;
                step.progress = 100.0;
            }
        }
    }

    /// Re-establishes the snapshot invariants after an apply: stamps
    /// `updated_at`, recomputes overall progress, and sets `completed_at`
    /// exactly once on terminal transitions.
    pub fn finalize(&mut self) {
        self.updated_at = Utc::now();
        if !self.steps.is_empty() {
            let mean: f64 =
                self.steps.iter().map(|s| s.progress).sum::<f64>() / self.steps.len() as f64;
            self.progress = mean.round();
        }
        if self.status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(self.updated_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> OperationSnapshot {
        OperationSnapshot::new("op1", &["a".to_string(), "b".to_string()])
    }

    #[test]
    fn test_new_snapshot_declares_pending_steps() {
        let snap = snapshot();
        assert_eq!(snap.status, OperationStatus::Pending);
        assert_eq!(snap.steps.len(), 2);
        assert!(snap
            .steps
            .iter()
            .all(|s| s.status == SnapshotStepStatus::Pending && s.progress == 0.0));
    }

    #[test]
    fn test_progress_transitions_status() {
        let mut snap = snapshot();
        snap.apply_step_progress("a", 40.0, "working", None);
        assert_eq!(snap.step("a").unwrap().status, SnapshotStepStatus::Running);
        assert_eq!(snap.current_step, "a");

        snap.apply_step_progress("a", 100.0, "done", None);
        assert_eq!(snap.step("a").unwrap().status, SnapshotStepStatus::Completed);
    }

    #[test]
    fn test_monotonic_progress_while_running() {
        let mut snap = snapshot();
        snap.apply_step_progress("a", 60.0, "ahead", None);
        snap.apply_step_progress("a", 30.0, "stale", None);

        let step = snap.step("a").unwrap();
        assert_eq!(step.progress, 60.0);
        // Message still applies even when the progress value is discarded.
        assert_eq!(step.message, "stale");
    }

    #[test]
    fn test_unknown_step_auto_append() {
        let mut snap = snapshot();
        snap.apply_step_progress("surprise", 50.0, "from a stage", None);
        let step = snap.step("surprise").unwrap();
        assert_eq!(step.name, "surprise");
        assert_eq!(step.status, SnapshotStepStatus::Running);

        snap.apply_step_progress("finished", 120.0, "clamped", None);
        let step = snap.step("finished").unwrap();
        assert_eq!(step.progress, 100.0);
        assert_eq!(step.status, SnapshotStepStatus::Completed);
    }

    #[test]
    fn test_overall_progress_is_rounded_mean() {
        let mut snap = snapshot();
        snap.apply_step_progress("a", 50.0, "", None);
        snap.finalize();
        assert_eq!(snap.progress, 25.0);

        snap.apply_step_progress("b", 25.0, "", None);
        snap.finalize();
        assert_eq!(snap.progress, 38.0); // round(37.5)
    }

    #[test]
    fn test_completed_at_set_exactly_once() {
        let mut snap = snapshot();
        snap.status = OperationStatus::Completed;
        snap.finalize();
        let first = snap.completed_at.unwrap();

        snap.finalize();
        assert_eq!(snap.completed_at.unwrap(), first);
    }

    #[test]
    fn test_force_steps_completed() {
        let mut snap = snapshot();
        snap.apply_step_progress("a", 40.0, "", None);
        snap.force_steps_completed();
        assert!(snap
            .steps
            .iter()
            .all(|s| s.status == SnapshotStepStatus::Completed && s.progress == 100.0));
    }

    #[test]
    fn test_fail_step_records_error() {
        let mut snap = snapshot();
        snap.fail_step("b", "exploded");
        let step = snap.step("b").unwrap();
        assert_eq!(step.status, SnapshotStepStatus::Failed);
        assert_eq!(step.error.as_deref(), Some("exploded"));
    }
}
