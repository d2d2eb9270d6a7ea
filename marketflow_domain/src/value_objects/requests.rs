// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Request and Response Carriers
//!
//! The immutable payloads crossing the engine boundary: an
//! [`OperationRequest`] asks the manager to run stages synchronously, a
//! [`JobRequest`] submits the same work asynchronously through the queue,
//! and an [`OperationResponse`] summarizes a finished run.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::operation::OperationStatus;
use crate::entities::step_state::StepState;

/// Sentinel step id meaning "run every registered stage in dependency
/// order".
pub const FULL_PIPELINE: &str = "full_pipeline";

/// Parameter key selecting a single step for an operation.
pub const PARAM_STEP: &str = "step";

/// Parameter key carrying a trace identifier for observability.
pub const PARAM_TRACE_ID: &str = "trace_id";

/// Request to run an operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Operation id; generated (`operation-<unix-seconds>`) when absent
    pub id: Option<String>,
    /// Domain mode string (e.g. `initial`, `accumulative`)
    pub mode: String,
    /// Start of the date range
    pub from_date: Option<NaiveDate>,
    /// End of the date range
    pub to_date: Option<NaiveDate>,
    /// Extra parameters, copied into the operation's config map
    pub parameters: HashMap<String, Value>,
}

impl OperationRequest {
    /// The `step` parameter, when it selects a single step.
    ///
    /// Returns `None` when the parameter is absent, empty, or the
    /// [`FULL_PIPELINE`] sentinel — all of which mean "run everything".
    pub fn single_step(&self) -> Option<&str> {
        match self.parameters.get(PARAM_STEP).and_then(Value::as_str) {
            Some("") | None => None,
            Some(FULL_PIPELINE) => None,
            Some(step) => Some(step),
        }
    }

    /// The `trace_id` parameter, when present.
    pub fn trace_id(&self) -> Option<&str> {
        self.parameters.get(PARAM_TRACE_ID).and_then(Value::as_str)
    }
}

/// Summary of a finished operation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    /// Operation id
    pub id: String,
    /// Terminal status
    pub status: OperationStatus,
    /// Wall-clock duration of the run
    pub duration: Duration,
    /// Final state of every selected step, by id
    pub steps: HashMap<String, StepState>,
    /// Stringified operation error, when the run did not complete
    pub error: Option<String>,
}

/// Request to submit a job to the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Job id; generated when absent
    pub id: Option<String>,
    /// Operation the job runs
    pub operation_id: String,
    /// Step to run, or the [`FULL_PIPELINE`] sentinel
    pub step_id: String,
    /// Human-readable step name
    pub step_name: String,
    /// Free-form metadata persisted with the job
    pub metadata: HashMap<String, Value>,
    /// The operation request replayed by the worker
    pub request: OperationRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_step_sentinels() {
        let mut request = OperationRequest::default();
        assert_eq!(request.single_step(), None);

        request
            .parameters
            .insert(PARAM_STEP.into(), Value::String(String::new()));
        assert_eq!(request.single_step(), None);

        request
            .parameters
            .insert(PARAM_STEP.into(), Value::String(FULL_PIPELINE.into()));
        assert_eq!(request.single_step(), None);

        request
            .parameters
            .insert(PARAM_STEP.into(), Value::String("scraping".into()));
        assert_eq!(request.single_step(), Some("scraping"));
    }

    #[test]
    fn test_trace_id_extraction() {
        let mut request = OperationRequest::default();
        assert!(request.trace_id().is_none());
        request
            .parameters
            .insert(PARAM_TRACE_ID.into(), Value::String("t-123".into()));
        assert_eq!(request.trace_id(), Some("t-123"));
    }
}
