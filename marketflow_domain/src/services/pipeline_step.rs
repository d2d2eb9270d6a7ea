// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Step Contract
//!
//! The polymorphic contract every pipeline stage implements. A stage
//! declares its identity, its static dependencies, and the data it consumes
//! and produces; the engine supplies ordering, validation gates, retries,
//! timeouts, and cancellation around [`PipelineStep::execute`].
//!
//! Shared default behavior (no dependencies, no data requirements, trivial
//! validation, requirement-driven `can_run`) is expressed as trait default
//! methods rather than a base class — implementors override only what they
//! need.
//!
//! ## Cancellation
//!
//! Timeouts and cancellation are delivered by dropping the in-flight
//! `execute` future: the engine races it against the per-step deadline and
//! the operation's cancellation signal. Implementations must therefore be
//! cancel-safe — clean up in `Drop` guards, and spawn child processes with
//! kill-on-drop semantics.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entities::manifest::PipelineManifest;
use crate::entities::operation::OperationState;
use crate::error::OrchestratorError;
use crate::value_objects::data_spec::{DataOutput, DataRequirement};

/// Contract implemented by every pipeline stage.
///
/// Side effects a stage may have: spawning child executables, reading and
/// writing files under its declared data directories, and publishing
/// progress through the injected broadcaster.
#[async_trait]
pub trait PipelineStep: Send + Sync + std::fmt::Debug {
    /// Stable unique identifier; the registry key and snapshot key.
    fn id(&self) -> &str;

    /// Human-readable label.
    fn name(&self) -> &str;

    /// Ids of steps that must be `completed` before this one runs.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Data this step reads.
    fn required_inputs(&self) -> Vec<DataRequirement> {
        Vec::new()
    }

    /// Data this step writes.
    fn produced_outputs(&self) -> Vec<DataOutput> {
        Vec::new()
    }

    /// Pre-execution gate. A non-`Ok` result marks the step `skipped`.
    fn validate(&self, state: &OperationState) -> Result<(), OrchestratorError> {
        let _ = state;
        Ok(())
    }

    /// Data-readiness check against the manifest.
    ///
    /// The default is satisfied when every non-optional requirement has at
    /// least `min_count` files recorded.
    fn can_run(&self, manifest: &PipelineManifest) -> bool {
        self.required_inputs().iter().all(|req| {
            req.optional
                || manifest
                    .data(&req.data_type)
                    .is_some_and(|info| info.file_count >= req.min_count)
        })
    }

    /// Does the work. `Ok(())` on success; a classified
    /// [`OrchestratorError`] on failure (unclassified errors are treated as
    /// non-retryable execution failures).
    async fn execute(&self, state: Arc<OperationState>) -> Result<(), OrchestratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::data_spec::data_types;
    use chrono::Utc;
    use std::collections::HashMap;

    #[derive(Debug)]
    struct CsvStep;

    #[async_trait]
    impl PipelineStep for CsvStep {
        fn id(&self) -> &str {
            "processing"
        }

        fn name(&self) -> &str {
            "Processing"
        }

        fn required_inputs(&self) -> Vec<DataRequirement> {
            vec![
                DataRequirement::new(data_types::EXCEL_FILES, "data/downloads", 1),
                DataRequirement::new(data_types::INDEX_DATA, "data/reports/indexes", 1).optional(),
            ]
        }

        async fn execute(&self, _state: Arc<OperationState>) -> Result<(), OrchestratorError> {
            Ok(())
        }
    }

    #[test]
    fn test_default_can_run_checks_mandatory_inputs_only() {
        let step = CsvStep;
        let mut manifest = PipelineManifest::new("op1", None, None, "initial");
        assert!(!step.can_run(&manifest));

        manifest.add_data(
            data_types::EXCEL_FILES,
            crate::entities::manifest::DataInfo {
                data_type: data_types::EXCEL_FILES.into(),
                location: "data/downloads".into(),
                file_count: 3,
                pattern: "*.xlsx".into(),
                total_size: 1024,
                files: vec!["a.xlsx".into(), "b.xlsx".into(), "c.xlsx".into()],
                created_at: Utc::now(),
                created_by: "scraping".into(),
                metadata: HashMap::new(),
            },
        );
        // The optional index requirement is still unsatisfied.
        assert!(step.can_run(&manifest));
    }

    #[test]
    fn test_default_validate_accepts() {
        let step = CsvStep;
        let state = OperationState::new("op1");
        assert!(step.validate(&state).is_ok());
        assert!(step.dependencies().is_empty());
    }
}
