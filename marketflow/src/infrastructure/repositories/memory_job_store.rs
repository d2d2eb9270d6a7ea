// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # In-Memory Job Store
//!
//! Reference [`JobStore`] implementation backed by locked maps. Sufficient
//! for local deployments and the test suite; the SQLite store is the
//! durable drop-in.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use marketflow_domain::entities::job::{Job, JobFilter};
use marketflow_domain::entities::manifest::PipelineManifest;
use marketflow_domain::error::OrchestratorError;
use marketflow_domain::repositories::job_store::JobStore;

/// Thread-safe in-memory store for jobs and manifests.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
    manifests: RwLock<HashMap<String, PipelineManifest>>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, job: &Job) -> Result<(), OrchestratorError> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(OrchestratorError::invalid_state(format!(
                "job '{}' already exists",
                job.id
            )));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Job, OrchestratorError> {
        self.jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found(format!("job '{}' does not exist", id)))
    }

    async fn update_job(&self, job: &Job) -> Result<(), OrchestratorError> {
        let mut jobs = self.jobs.write();
        if !jobs.contains_key(&job.id) {
            return Err(OrchestratorError::not_found(format!(
                "job '{}' does not exist",
                job.id
            )));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, OrchestratorError> {
        let jobs = self.jobs.read();
        let mut matched: Vec<Job> = jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn delete_job(&self, id: &str) -> Result<(), OrchestratorError> {
        self.jobs
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::not_found(format!("job '{}' does not exist", id)))
    }

    async fn create_manifest(&self, manifest: &PipelineManifest) -> Result<(), OrchestratorError> {
        let mut manifests = self.manifests.write();
        if manifests.contains_key(manifest.id()) {
            return Err(OrchestratorError::invalid_state(format!(
                "manifest '{}' already exists",
                manifest.id()
            )));
        }
        manifests.insert(manifest.id().to_string(), manifest.clone());
        Ok(())
    }

    async fn get_manifest(&self, id: &str) -> Result<PipelineManifest, OrchestratorError> {
        self.manifests
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::not_found(format!("manifest '{}' does not exist", id))
            })
    }

    async fn update_manifest(&self, manifest: &PipelineManifest) -> Result<(), OrchestratorError> {
        let mut manifests = self.manifests.write();
        if !manifests.contains_key(manifest.id()) {
            return Err(OrchestratorError::not_found(format!(
                "manifest '{}' does not exist",
                manifest.id()
            )));
        }
        manifests.insert(manifest.id().to_string(), manifest.clone());
        Ok(())
    }

    async fn get_manifest_by_operation_id(
        &self,
        operation_id: &str,
    ) -> Result<Option<PipelineManifest>, OrchestratorError> {
        Ok(self
            .manifests
            .read()
            .values()
            .find(|m| m.operation_id() == operation_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketflow_domain::entities::job::JobStatus;
    use marketflow_domain::error::ErrorKind;
    use marketflow_domain::value_objects::requests::{JobRequest, OperationRequest, FULL_PIPELINE};
    use std::collections::HashMap as StdHashMap;

    fn job(id: &str, operation_id: &str) -> Job {
        Job::from_request(JobRequest {
            id: Some(id.to_string()),
            operation_id: operation_id.to_string(),
            step_id: FULL_PIPELINE.into(),
            step_name: "Full pipeline".into(),
            metadata: StdHashMap::new(),
            request: OperationRequest::default(),
        })
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = InMemoryJobStore::new();
        store.create_job(&job("j1", "op1")).await.unwrap();
        let err = store.create_job(&job("j1", "op1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_update_missing_rejected() {
        let store = InMemoryJobStore::new();
        let err = store.update_job(&job("ghost", "op1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_get_returns_defensive_copy() {
        let store = InMemoryJobStore::new();
        store.create_job(&job("j1", "op1")).await.unwrap();

        let mut copy = store.get_job("j1").await.unwrap();
        copy.mark_failed("mutated copy");
        assert_eq!(store.get_job("j1").await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_list_respects_filter_and_limit() {
        let store = InMemoryJobStore::new();
        for i in 0..5 {
            let mut j = job(&format!("j{}", i), "op1");
            if i < 2 {
                j.mark_running();
            }
            store.create_job(&j).await.unwrap();
        }
        store.create_job(&job("other", "op2")).await.unwrap();

        let running = store
            .list_jobs(&JobFilter::by_status(JobStatus::Running))
            .await
            .unwrap();
        assert_eq!(running.len(), 2);

        let op1 = store
            .list_jobs(&JobFilter {
                operation_id: Some("op1".into()),
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(op1.len(), 5);

        let limited = store
            .list_jobs(&JobFilter {
                limit: Some(3),
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 3);
    }

    #[tokio::test]
    async fn test_manifest_lookup_by_operation() {
        let store = InMemoryJobStore::new();
        let manifest = PipelineManifest::new("op7", None, None, "initial");
        store.create_manifest(&manifest).await.unwrap();

        let found = store
            .get_manifest_by_operation_id("op7")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), manifest.id());
        assert!(store
            .get_manifest_by_operation_id("op8")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_job() {
        let store = InMemoryJobStore::new();
        store.create_job(&job("j1", "op1")).await.unwrap();
        store.delete_job("j1").await.unwrap();
        assert!(store.get_job("j1").await.is_err());
        assert!(store.delete_job("j1").await.is_err());
    }
}
