// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQLite Job Store
//!
//! Durable [`JobStore`] implementation over sqlx/SQLite. Each record is
//! persisted as a JSON `data` column alongside the columns queries filter
//! on (status, operation id, step id, creation time), so the domain shape
//! can evolve without schema migrations while list queries stay indexed.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use marketflow_domain::entities::job::{Job, JobFilter};
use marketflow_domain::entities::manifest::PipelineManifest;
use marketflow_domain::error::OrchestratorError;
use marketflow_domain::repositories::job_store::JobStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id            TEXT PRIMARY KEY,
    operation_id  TEXT NOT NULL,
    step_id       TEXT NOT NULL,
    status        TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    data          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status);
CREATE INDEX IF NOT EXISTS idx_jobs_operation ON jobs (operation_id);

CREATE TABLE IF NOT EXISTS manifests (
    id            TEXT PRIMARY KEY,
    operation_id  TEXT NOT NULL UNIQUE,
    last_updated  TEXT NOT NULL,
    data          TEXT NOT NULL
);
"#;

/// SQLite-backed store for jobs and manifests.
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Wraps an existing pool, creating the tables when missing.
    pub async fn new(pool: SqlitePool) -> Result<Self, OrchestratorError> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Opens (or creates) a database file.
    pub async fn from_file(database_url: &str) -> Result<Self, OrchestratorError> {
        use sqlx::migrate::MigrateDatabase;
        if !sqlx::Sqlite::database_exists(database_url)
            .await
            .unwrap_or(false)
        {
            sqlx::Sqlite::create_database(database_url)
                .await
                .map_err(|e| db_error("failed to create database", e))?;
        }
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| db_error("failed to connect to database", e))?;
        Self::new(pool).await
    }

    /// In-memory database, primarily for tests.
    ///
    /// Capped at one connection: each SQLite `:memory:` connection is its
    /// own database, so a wider pool would see empty tables.
    pub async fn in_memory() -> Result<Self, OrchestratorError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .map_err(|e| db_error("failed to open in-memory database", e))?;
        Self::new(pool).await
    }

    async fn ensure_schema(&self) -> Result<(), OrchestratorError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| db_error("failed to create schema", e))
    }
}

fn db_error(context: &str, err: sqlx::Error) -> OrchestratorError {
    OrchestratorError::execution(format!("{}: {}", context, err), false)
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, OrchestratorError> {
    serde_json::to_string(value)
        .map_err(|e| OrchestratorError::execution(format!("failed to serialize record: {}", e), false))
}

fn decode<T: serde::de::DeserializeOwned>(data: &str) -> Result<T, OrchestratorError> {
    serde_json::from_str(data)
        .map_err(|e| OrchestratorError::execution(format!("failed to deserialize record: {}", e), false))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_job(&self, job: &Job) -> Result<(), OrchestratorError> {
        let result = sqlx::query(
            "INSERT INTO jobs (id, operation_id, step_id, status, created_at, data) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.operation_id)
        .bind(&job.step_id)
        .bind(job.status.to_string())
        .bind(job.created_at.to_rfc3339())
        .bind(encode(job)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                OrchestratorError::invalid_state(format!("job '{}' already exists", job.id)),
            ),
            Err(e) => Err(db_error("failed to insert job", e)),
        }
    }

    async fn get_job(&self, id: &str) -> Result<Job, OrchestratorError> {
        let row = sqlx::query("SELECT data FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("failed to query job", e))?;
        match row {
            Some(row) => decode(row.get::<String, _>("data").as_str()),
            None => Err(OrchestratorError::not_found(format!(
                "job '{}' does not exist",
                id
            ))),
        }
    }

    async fn update_job(&self, job: &Job) -> Result<(), OrchestratorError> {
        let result = sqlx::query(
            "UPDATE jobs SET operation_id = ?, step_id = ?, status = ?, data = ? WHERE id = ?",
        )
        .bind(&job.operation_id)
        .bind(&job.step_id)
        .bind(job.status.to_string())
        .bind(encode(job)?)
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("failed to update job", e))?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::not_found(format!(
                "job '{}' does not exist",
                job.id
            )));
        }
        Ok(())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, OrchestratorError> {
        // Indexed predicates narrow the scan; the remaining predicates are
        // applied on the decoded records.
        let rows = match (&filter.status, &filter.operation_id) {
            (Some(status), _) => {
                sqlx::query("SELECT data FROM jobs WHERE status = ?")
                    .bind(status.to_string())
                    .fetch_all(&self.pool)
                    .await
            }
            (None, Some(operation_id)) => {
                sqlx::query("SELECT data FROM jobs WHERE operation_id = ?")
                    .bind(operation_id)
                    .fetch_all(&self.pool)
                    .await
            }
            (None, None) => sqlx::query("SELECT data FROM jobs").fetch_all(&self.pool).await,
        }
        .map_err(|e| db_error("failed to list jobs", e))?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let job: Job = decode(row.get::<String, _>("data").as_str())?;
            if filter.matches(&job) {
                jobs.push(job);
            }
        }
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn delete_job(&self, id: &str) -> Result<(), OrchestratorError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("failed to delete job", e))?;
        if result.rows_affected() == 0 {
            return Err(OrchestratorError::not_found(format!(
                "job '{}' does not exist",
                id
            )));
        }
        Ok(())
    }

    async fn create_manifest(&self, manifest: &PipelineManifest) -> Result<(), OrchestratorError> {
        let result = sqlx::query(
            "INSERT INTO manifests (id, operation_id, last_updated, data) VALUES (?, ?, ?, ?)",
        )
        .bind(manifest.id())
        .bind(manifest.operation_id())
        .bind(manifest.last_updated().to_rfc3339())
        .bind(encode(manifest)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(OrchestratorError::invalid_state(format!(
                    "manifest '{}' already exists",
                    manifest.id()
                )))
            }
            Err(e) => Err(db_error("failed to insert manifest", e)),
        }
    }

    async fn get_manifest(&self, id: &str) -> Result<PipelineManifest, OrchestratorError> {
        let row = sqlx::query("SELECT data FROM manifests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("failed to query manifest", e))?;
        match row {
            Some(row) => decode(row.get::<String, _>("data").as_str()),
            None => Err(OrchestratorError::not_found(format!(
                "manifest '{}' does not exist",
                id
            ))),
        }
    }

    async fn update_manifest(&self, manifest: &PipelineManifest) -> Result<(), OrchestratorError> {
        let result =
            sqlx::query("UPDATE manifests SET last_updated = ?, data = ? WHERE id = ?")
                .bind(manifest.last_updated().to_rfc3339())
                .bind(encode(manifest)?)
                .bind(manifest.id())
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("failed to update manifest", e))?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::not_found(format!(
                "manifest '{}' does not exist",
                manifest.id()
            )));
        }
        Ok(())
    }

    async fn get_manifest_by_operation_id(
        &self,
        operation_id: &str,
    ) -> Result<Option<PipelineManifest>, OrchestratorError> {
        let row = sqlx::query("SELECT data FROM manifests WHERE operation_id = ?")
            .bind(operation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("failed to query manifest by operation", e))?;
        row.map(|row| decode(row.get::<String, _>("data").as_str()))
            .transpose()
    }
}
