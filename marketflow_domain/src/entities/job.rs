// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Asynchronous Jobs
//!
//! A job is a persisted, asynchronously submitted request to run an
//! operation — either a single step or the full pipeline. Its lifecycle is
//! owned by the job queue and the store; the operation it triggers is owned
//! by the execution path. Jobs survive restarts: the recovery routine
//! re-enqueues persisted pending and running jobs when the queue starts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::value_objects::requests::{JobRequest, OperationRequest};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Persisted and waiting in the queue
    Pending,
    /// Picked up by a worker
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled before completion
    Cancelled,
}

impl JobStatus {
    /// Whether this status ends the job's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::error::OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(crate::error::OrchestratorError::invalid_state(format!(
                "Unknown job status: {}",
                s
            ))),
        }
    }
}

/// Persisted asynchronous work unit.
///
/// A terminal transition stamps `completed_at` and freezes progress:
/// completion forces 100, failure and cancellation leave the last observed
/// value in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier
    pub id: String,
    /// Operation the job runs (or belongs to)
    pub operation_id: String,
    /// Step to run, or the [`crate::value_objects::FULL_PIPELINE`] sentinel
    pub step_id: String,
    /// Human-readable step name
    pub step_name: String,
    /// Lifecycle status
    pub status: JobStatus,
    /// Aggregate progress in `[0, 100]`
    pub progress: u8,
    /// Latest progress message
    pub message: String,
    /// Terminal error, when the job failed
    pub error: Option<String>,
    /// When the job was accepted
    pub created_at: DateTime<Utc>,
    /// When a worker picked it up
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Free-form metadata from the submitter
    pub metadata: HashMap<String, Value>,
    /// The original operation request, replayed on execution
    pub request: OperationRequest,
}

impl Job {
    /// Builds a pending job from a submission request, generating an id when
    /// none was supplied.
    pub fn from_request(request: JobRequest) -> Self {
        let id = request
            .id
            .unwrap_or_else(|| format!("job-{}", Ulid::new().to_string().to_lowercase()));
        Self {
            id,
            operation_id: request.operation_id,
            step_id: request.step_id,
            step_name: request.step_name,
            status: JobStatus::Pending,
            progress: 0,
            message: String::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: request.metadata,
            request: request.request,
        }
    }

    /// Transitions back to `pending` (used by crash recovery).
    pub fn mark_pending(&mut self) {
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.progress = 0;
    }

    /// Transitions to `running` and stamps the start time.
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.progress = 0;
    }

    /// Transitions to `completed`, forcing progress to 100.
    pub fn mark_completed(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.message = message.into();
        self.completed_at = Some(Utc::now());
    }

    /// Transitions to `failed`, recording the error.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Transitions to `cancelled`.
    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}

/// Query predicates for listing jobs. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    /// Match this status only
    pub status: Option<JobStatus>,
    /// Match jobs for this operation only
    pub operation_id: Option<String>,
    /// Match jobs for this step only
    pub step_id: Option<String>,
    /// Match jobs created at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Cap the number of returned jobs
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Filter matching a single status.
    pub fn by_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Whether the job satisfies every set predicate (`limit` excluded).
    pub fn matches(&self, job: &Job) -> bool {
        if self.status.is_some_and(|s| s != job.status) {
            return false;
        }
        if self
            .operation_id
            .as_deref()
            .is_some_and(|id| id != job.operation_id)
        {
            return false;
        }
        if self.step_id.as_deref().is_some_and(|id| id != job.step_id) {
            return false;
        }
        if self.since.is_some_and(|t| job.created_at < t) {
            return false;
        }
        true
    }
}
