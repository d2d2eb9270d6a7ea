// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Step Runtime State
//!
//! Per-step state inside a running operation: lifecycle status, progress,
//! the latest human-readable message, metadata, and the terminal error when
//! one occurred.
//!
//! ## Lifecycle
//!
//! ```text
//! pending ──▶ active ──▶ completed
//!    │           │  └───▶ failed
//!    └───────────┴──────▶ skipped
//! ```
//!
//! `completed`, `failed`, and `skipped` are terminal. The start timestamp is
//! set when the step becomes active; the end timestamp is set on any terminal
//! transition. Completing a step forces progress to 100.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a single step within an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet reached by the execution loop
    Pending,
    /// Currently executing
    Active,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Not run: validation rejected it or a dependency failed
    Skipped,
}

impl StepStatus {
    /// Whether this status ends the step's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Active => write!(f, "active"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Runtime state of one step in one operation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    /// Stable step identifier (registry key)
    pub id: String,
    /// Human-readable step name
    pub name: String,
    /// Current lifecycle status
    pub status: StepStatus,
    /// Set when the step becomes active
    pub started_at: Option<DateTime<Utc>>,
    /// Set on any terminal transition
    pub ended_at: Option<DateTime<Utc>>,
    /// Progress in `[0, 100]`
    pub progress: f64,
    /// Latest human-readable progress message
    pub message: String,
    /// Terminal error, when the step failed
    pub error: Option<String>,
    /// Free-form metadata attached by the step implementation
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StepState {
    /// Creates a pending step state.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            progress: 0.0,
            message: String::new(),
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Transitions to `active` and stamps the start time.
    pub fn start(&mut self) {
        self.status = StepStatus::Active;
        self.started_at = Some(Utc::now());
    }

    /// Transitions to `completed`, forcing progress to 100.
    pub fn complete(&mut self, message: impl Into<String>) {
        self.status = StepStatus::Completed;
        self.progress = 100.0;
        self.message = message.into();
        self.ended_at = Some(Utc::now());
    }

    /// Transitions to `failed`, recording the error.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.ended_at = Some(Utc::now());
    }

    /// Transitions to `skipped`, recording the reason as the message.
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Skipped;
        self.message = reason.into();
        self.ended_at = Some(Utc::now());
    }

    /// Updates progress (clamped to `[0, 100]`) and the message.
    pub fn set_progress(&mut self, progress: f64, message: impl Into<String>) {
        self.progress = progress.clamp(0.0, 100.0);
        self.message = message.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_timestamps() {
        let mut state = StepState::new("scraping", "Scraping");
        assert_eq!(state.status, StepStatus::Pending);
        assert!(state.started_at.is_none());

        state.start();
        assert_eq!(state.status, StepStatus::Active);
        assert!(state.started_at.is_some());
        assert!(state.ended_at.is_none());

        state.complete("done");
        assert_eq!(state.status, StepStatus::Completed);
        assert_eq!(state.progress, 100.0);
        assert!(state.ended_at.is_some());
    }

    #[test]
    fn test_fail_records_error() {
        let mut state = StepState::new("processing", "Processing");
        state.start();
        state.fail("boom");
        assert_eq!(state.status, StepStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("boom"));
        assert!(state.status.is_terminal());
    }

    #[test]
    fn test_skip_records_reason() {
        let mut state = StepState::new("indices", "Indices");
        state.skip("Dependency processing failed");
        assert_eq!(state.status, StepStatus::Skipped);
        assert!(state.message.contains("processing"));
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut state = StepState::new("liquidity", "Liquidity");
        state.set_progress(150.0, "over");
        assert_eq!(state.progress, 100.0);
        state.set_progress(-5.0, "under");
        assert_eq!(state.progress, 0.0);
    }
}
