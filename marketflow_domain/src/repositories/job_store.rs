// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Job Store Port
//!
//! Pluggable persistence for jobs and manifests. The queue drives every
//! lifecycle transition through this trait, so swapping the in-memory
//! reference implementation for an embedded database changes nothing above
//! this line.
//!
//! ## Required Semantics
//!
//! - `get_*` returns a defensive copy (owned values make this automatic)
//! - `create_*` fails with `invalid_state` on a duplicate id
//! - `update_*` fails with `not_found` when the record is missing
//! - `list_jobs` respects every set filter predicate; result order is
//!   unspecified (the recovery routine does not depend on it)
//! - implementations must be safe for concurrent use from all workers

use async_trait::async_trait;

use crate::entities::job::{Job, JobFilter};
use crate::entities::manifest::PipelineManifest;
use crate::error::OrchestratorError;

/// Persistence port for jobs and manifests.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new job.
    async fn create_job(&self, job: &Job) -> Result<(), OrchestratorError>;

    /// Loads a job by id.
    async fn get_job(&self, id: &str) -> Result<Job, OrchestratorError>;

    /// Replaces a persisted job.
    async fn update_job(&self, job: &Job) -> Result<(), OrchestratorError>;

    /// Lists jobs matching the filter.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, OrchestratorError>;

    /// Deletes a job by id.
    async fn delete_job(&self, id: &str) -> Result<(), OrchestratorError>;

    /// Persists a new manifest.
    async fn create_manifest(&self, manifest: &PipelineManifest) -> Result<(), OrchestratorError>;

    /// Loads a manifest by id.
    async fn get_manifest(&self, id: &str) -> Result<PipelineManifest, OrchestratorError>;

    /// Replaces a persisted manifest.
    async fn update_manifest(&self, manifest: &PipelineManifest) -> Result<(), OrchestratorError>;

    /// Looks a manifest up by the operation it belongs to.
    async fn get_manifest_by_operation_id(
        &self,
        operation_id: &str,
    ) -> Result<Option<PipelineManifest>, OrchestratorError>;
}
