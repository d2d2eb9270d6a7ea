// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Manifest
//!
//! The manifest is the durable record of one operation: which data exists
//! for it (per data-type file counts, locations, patterns, sizes) and which
//! stages have executed with what outcome. It is the hand-off between
//! successive stage runs, possibly across process restarts — an operation
//! resumed after a crash reads the manifest, sees which inputs already
//! exist, and skips stages whose work is done.
//!
//! The manifest is persisted through the job store and can additionally be
//! snapshotted to a JSON file. All mutations stamp `last_updated`.
//!
//! ## Sharing
//!
//! Methods take `&mut self`; the engine shares a manifest between the worker
//! task that owns the current stage and concurrent readers by wrapping it in
//! a lock. Copies handed outward are plain `Clone`s — every field is owned,
//! so a clone is a deep copy.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::error::OrchestratorError;

/// The canonical four-stage ingestion pipeline, in dependency order.
///
/// Used by the job queue to pre-declare full-pipeline step lists and by
/// [`PipelineManifest::progress`] as the default denominator. The engine
/// itself works with any registered step set.
pub const CANONICAL_PIPELINE: [&str; 4] = ["scraping", "processing", "indices", "liquidity"];

/// Record of data available for one data-type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataInfo {
    /// Data-type tag, e.g. `excel_files`
    pub data_type: String,
    /// Directory the files live in
    pub location: String,
    /// Number of files found; always equals `files.len()`
    pub file_count: usize,
    /// Glob pattern the files matched
    pub pattern: String,
    /// Sum of file sizes in bytes
    pub total_size: u64,
    /// File basenames, sorted
    pub files: Vec<String>,
    /// When this record was produced
    pub created_at: DateTime<Utc>,
    /// What produced it (a stage id, or `scan`)
    pub created_by: String,
    /// Free-form metadata
    pub metadata: HashMap<String, Value>,
}

/// Outcome of one stage execution, as logged in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageExecutionStatus {
    /// Currently executing (or was, when the process died)
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Not run
    Skipped,
}

/// Log entry for one stage of one operation.
///
/// Retries do not append: a repeated start refreshes the existing entry, so
/// the manifest holds at most one entry per step id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageExecution {
    /// Stable step identifier
    pub step_id: String,
    /// Human-readable step name
    pub step_name: String,
    /// When the (latest) execution started
    pub started_at: DateTime<Utc>,
    /// When it reached a terminal status
    pub ended_at: Option<DateTime<Utc>>,
    /// Wall-clock duration of the latest execution
    pub duration: Option<Duration>,
    /// Latest known status
    pub status: StageExecutionStatus,
    /// Data-type tags the stage produced
    pub output_data: Vec<String>,
    /// Error message, when the stage failed
    pub error: Option<String>,
    /// Free-form metadata
    pub metadata: HashMap<String, Value>,
}

/// Overall status recorded on the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    /// Created, no stage has run yet
    Pending,
    /// At least one stage has started
    Running,
    /// The pipeline finished
    Completed,
    /// The latest stage execution failed
    Failed,
}

impl std::fmt::Display for ManifestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestStatus::Pending => write!(f, "pending"),
            ManifestStatus::Running => write!(f, "running"),
            ManifestStatus::Completed => write!(f, "completed"),
            ManifestStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Durable record of what data exists for an operation and which stages
/// have executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineManifest {
    id: String,
    operation_id: String,
    from_date: Option<NaiveDate>,
    to_date: Option<NaiveDate>,
    mode: String,
    config: HashMap<String, Value>,
    available_data: HashMap<String, DataInfo>,
    completed_stages: Vec<StageExecution>,
    status: ManifestStatus,
    last_updated: DateTime<Utc>,
    error: Option<String>,
}

impl PipelineManifest {
    /// Creates a fresh manifest for an operation.
    pub fn new(
        operation_id: impl Into<String>,
        from_date: Option<NaiveDate>,
        to_date: Option<NaiveDate>,
        mode: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("manifest-{}", Ulid::new().to_string().to_lowercase()),
            operation_id: operation_id.into(),
            from_date,
            to_date,
            mode: mode.into(),
            config: HashMap::new(),
            available_data: HashMap::new(),
            completed_stages: Vec::new(),
            status: ManifestStatus::Pending,
            last_updated: Utc::now(),
            error: None,
        }
    }

    /// Manifest identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Operation this manifest belongs to.
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Configured date range.
    pub fn date_range(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        (self.from_date, self.to_date)
    }

    /// Operation mode string.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Overall status.
    pub fn status(&self) -> ManifestStatus {
        self.status
    }

    /// Latest error recorded by a stage failure.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Timestamp of the latest mutation.
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Stage execution log, in first-start order.
    pub fn completed_stages(&self) -> &[StageExecution] {
        &self.completed_stages
    }

    /// Configuration map carried alongside the operation.
    pub fn config(&self) -> &HashMap<String, Value> {
        &self.config
    }

    /// Stores a configuration value.
    pub fn set_config_value(&mut self, key: impl Into<String>, value: Value) {
        self.config.insert(key.into(), value);
        self.touch();
    }

    /// Checks whether any data is recorded for the given type.
    pub fn has_data(&self, data_type: &str) -> bool {
        self.available_data
            .get(data_type)
            .is_some_and(|info| info.file_count > 0)
    }

    /// Gets the data record for the given type.
    pub fn data(&self, data_type: &str) -> Option<&DataInfo> {
        self.available_data.get(data_type)
    }

    /// All data records, keyed by type tag.
    pub fn available_data(&self) -> &HashMap<String, DataInfo> {
        &self.available_data
    }

    /// Stores a data record, stamping its creation time.
    pub fn add_data(&mut self, data_type: impl Into<String>, mut info: DataInfo) {
        info.created_at = Utc::now();
        self.available_data.insert(data_type.into(), info);
        self.touch();
    }

    /// Records that a stage has started.
    ///
    /// A retry refreshes the existing entry (new start time, status back to
    /// running) instead of appending a duplicate.
    pub fn record_stage_start(&mut self, step_id: &str, step_name: &str) {
        let now = Utc::now();
        match self.stage_entry_mut(step_id) {
            Some(entry) => {
                entry.started_at = now;
                entry.ended_at = None;
                entry.duration = None;
                entry.status = StageExecutionStatus::Running;
                entry.error = None;
            }
            None => self.completed_stages.push(StageExecution {
                step_id: step_id.to_string(),
                step_name: step_name.to_string(),
                started_at: now,
                ended_at: None,
                duration: None,
                status: StageExecutionStatus::Running,
                output_data: Vec::new(),
                error: None,
                metadata: HashMap::new(),
            }),
        }
        if self.status == ManifestStatus::Pending {
            self.status = ManifestStatus::Running;
        }
        self.touch();
    }

    /// Records a successful stage completion.
    pub fn record_stage_completion(
        &mut self,
        step_id: &str,
        output_data: Vec<String>,
        metadata: HashMap<String, Value>,
    ) {
        let now = Utc::now();
        if self.stage_entry_mut(step_id).is_none() {
            // Completion without a recorded start; create the entry so the
            // log stays whole.
            self.record_stage_start(step_id, step_id);
        }
        if let Some(entry) = self.stage_entry_mut(step_id) {
            entry.ended_at = Some(now);
            entry.duration = (now - entry.started_at).to_std().ok();
            entry.status = StageExecutionStatus::Completed;
            entry.output_data = output_data;
            entry.metadata.extend(metadata);
        }
        self.touch();
    }

    /// Records a stage failure, marking the whole manifest failed.
    pub fn record_stage_failure(&mut self, step_id: &str, error: &str) {
        let now = Utc::now();
        if self.stage_entry_mut(step_id).is_none() {
            self.record_stage_start(step_id, step_id);
        }
        if let Some(entry) = self.stage_entry_mut(step_id) {
            entry.ended_at = Some(now);
            entry.duration = (now - entry.started_at).to_std().ok();
            entry.status = StageExecutionStatus::Failed;
            entry.error = Some(error.to_string());
        }
        self.status = ManifestStatus::Failed;
        self.error = Some(error.to_string());
        self.touch();
    }

    /// True iff the stage has an entry with status `completed`.
    pub fn is_stage_completed(&self, step_id: &str) -> bool {
        self.completed_stages
            .iter()
            .any(|s| s.step_id == step_id && s.status == StageExecutionStatus::Completed)
    }

    /// Overrides the overall status.
    pub fn set_status(&mut self, status: ManifestStatus) {
        self.status = status;
        self.touch();
    }

    /// Progress in `[0, 100]`, with the canonical four-stage pipeline as the
    /// denominator.
    pub fn progress(&self) -> u8 {
        let completed = self
            .completed_stages
            .iter()
            .filter(|s| s.status == StageExecutionStatus::Completed)
            .count();
        ((completed * 100 / CANONICAL_PIPELINE.len()).min(100)) as u8
    }

    /// Discovers input files on disk and replaces the data record for
    /// `data_type`.
    ///
    /// Globs `<location>/<pattern>`, sums file sizes, and records basenames.
    ///
    /// # Errors
    ///
    /// Fails when `location` is not an existing directory or the pattern is
    /// malformed.
    pub fn scan_data_directory(
        &mut self,
        data_type: &str,
        location: &str,
        pattern: &str,
    ) -> Result<usize, OrchestratorError> {
        let dir = Path::new(location);
        if !dir.is_dir() {
            return Err(OrchestratorError::execution(
                format!("data directory does not exist: {}", location),
                false,
            )
            .with_context("pattern", pattern));
        }

        let full_pattern = dir.join(pattern);
        let full_pattern = full_pattern.to_string_lossy();
        let paths = glob::glob(&full_pattern).map_err(|e| {
            OrchestratorError::execution(format!("invalid glob pattern '{}': {}", full_pattern, e), false)
        })?;

        let mut files = Vec::new();
        let mut total_size = 0u64;
        for entry in paths.flatten() {
            if let Ok(meta) = std::fs::metadata(&entry) {
                if !meta.is_file() {
                    continue;
                }
                total_size += meta.len();
            }
            if let Some(name) = entry.file_name() {
                files.push(name.to_string_lossy().into_owned());
            }
        }
        files.sort();

        let count = files.len();
        self.available_data.insert(
            data_type.to_string(),
            DataInfo {
                data_type: data_type.to_string(),
                location: location.to_string(),
                file_count: count,
                pattern: pattern.to_string(),
                total_size,
                files,
                created_at: Utc::now(),
                created_by: "scan".to_string(),
                metadata: HashMap::new(),
            },
        );
        self.touch();
        Ok(count)
    }

    /// Writes the manifest as pretty JSON, atomically (write-then-rename).
    pub fn save_to_file(&self, path: &Path) -> Result<(), OrchestratorError> {
        let payload = serde_json::to_vec_pretty(self).map_err(|e| {
            OrchestratorError::execution(format!("failed to serialize manifest: {}", e), false)
        })?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, payload).map_err(|e| {
            OrchestratorError::execution(format!("failed to write {}: {}", tmp.display(), e), false)
        })?;
        std::fs::rename(&tmp, path).map_err(|e| {
            OrchestratorError::execution(format!("failed to rename {}: {}", tmp.display(), e), false)
        })
    }

    /// Reads a manifest previously written by [`PipelineManifest::save_to_file`].
    pub fn load_from_file(path: &Path) -> Result<Self, OrchestratorError> {
        let payload = std::fs::read(path).map_err(|e| {
            OrchestratorError::execution(format!("failed to read {}: {}", path.display(), e), false)
        })?;
        serde_json::from_slice(&payload).map_err(|e| {
            OrchestratorError::execution(format!("failed to parse {}: {}", path.display(), e), false)
        })
    }

    fn stage_entry_mut(&mut self, step_id: &str) -> Option<&mut StageExecution> {
        self.completed_stages.iter_mut().find(|s| s.step_id == step_id)
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}
