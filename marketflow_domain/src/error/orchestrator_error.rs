// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the structured error type used throughout the
//! orchestration domain. Every failure in the engine carries a classification
//! tag, an optional step identifier, a retryability flag, an optional wrapped
//! cause, and free-form context, so callers can make retry decisions and
//! external logs can always locate the failing stage.
//!
//! ## Error Classification
//!
//! Errors are tagged with an [`ErrorKind`]:
//!
//! - **Validation**: a step's pre-execution gate rejected the operation
//! - **Dependency**: a declared dependency is missing, cyclic, or not completed
//! - **Execution**: a step's `execute` returned an unclassified failure
//! - **Timeout**: the per-step deadline expired
//! - **Cancellation**: the operation or job was cancelled
//! - **Retryable**: an execution failure explicitly marked safe to retry
//! - **Fatal**: an infrastructure invariant was violated
//! - **NotFound**: an unknown step, operation, job, or manifest id
//! - **InvalidState**: an illegal transition such as a duplicate registration
//!
//! ## Retryability
//!
//! Each kind carries a default retryability (`timeout` and `retryable` retry;
//! everything else does not), which `execution` errors may override at the
//! construction site. Wrapping preserves the flag: once a failure has been
//! classified retryable, that classification is sticky through any number of
//! `wrap` layers.
//!
//! ## Aggregation
//!
//! When the engine runs with `continue_on_error`, per-stage failures are
//! collected into an [`ErrorList`] and surfaced as a single operation error.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification tag attached to every domain error.
///
/// The tag drives retry decisions and lets callers handle whole classes of
/// failure uniformly without inspecting message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A step's pre-execution validation rejected the operation
    Validation,
    /// A declared dependency is unknown, cyclic, or not completed
    Dependency,
    /// A step execution failed without further classification
    Execution,
    /// The per-step deadline expired
    Timeout,
    /// The operation or job context was cancelled
    Cancellation,
    /// An execution failure explicitly marked safe to retry
    Retryable,
    /// An engine invariant was violated
    Fatal,
    /// An unknown step, operation, job, or manifest identifier
    NotFound,
    /// An illegal transition, such as registering a duplicate step id
    InvalidState,
}

impl ErrorKind {
    /// Default retryability for this kind.
    ///
    /// Only `Timeout` and `Retryable` errors are retried by default;
    /// `Execution` errors may opt in at the construction site.
    pub fn default_retryable(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Retryable)
    }

    /// Short tag used in log output and error rendering.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Execution => "execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancellation => "cancellation",
            ErrorKind::Retryable => "retryable",
            ErrorKind::Fatal => "fatal",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error for the orchestration domain.
///
/// An `OrchestratorError` is a value: it is cheap to clone, safe to send
/// across tasks, and carries everything the engine needs to decide what to do
/// next — the classification kind, the step that failed (when known), a
/// human-readable message, an optional wrapped cause, free-form context, and
/// the retryability flag.
///
/// # Examples
///
/// ```
/// use marketflow_domain::error::{ErrorKind, OrchestratorError};
///
/// let err = OrchestratorError::execution("scraper exited with status 2", false)
///     .with_step("scraping")
///     .with_context("exit_code", "2");
///
/// assert_eq!(err.kind(), ErrorKind::Execution);
/// assert_eq!(err.step_id(), Some("scraping"));
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, Clone, Error)]
#[error("{}", self.render())]
pub struct OrchestratorError {
    kind: ErrorKind,
    step_id: Option<String>,
    message: String,
    retryable: bool,
    context: HashMap<String, String>,
    #[source]
    cause: Option<Box<OrchestratorError>>,
}

impl OrchestratorError {
    /// Creates an error with the given kind and its default retryability.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            step_id: None,
            message: message.into(),
            retryable: kind.default_retryable(),
            context: HashMap::new(),
            cause: None,
        }
    }

    /// Creates a validation error (never retryable).
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, msg)
    }

    /// Creates a dependency error (never retryable).
    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Dependency, msg)
    }

    /// Creates an execution error with caller-specified retryability.
    pub fn execution(msg: impl Into<String>, retryable: bool) -> Self {
        let mut err = Self::new(ErrorKind::Execution, msg);
        err.retryable = retryable;
        err
    }

    /// Creates a timeout error (retryable by default).
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    /// Creates a cancellation error (never retryable).
    pub fn cancellation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancellation, msg)
    }

    /// Creates an explicitly retryable error.
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retryable, msg)
    }

    /// Creates a fatal error for violated engine invariants.
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, msg)
    }

    /// Creates a not-found error for an unknown identifier.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    /// Creates an invalid-state error for an illegal transition.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, msg)
    }

    /// Wraps an existing error with a new kind and message.
    ///
    /// The wrapped cause is preserved for introspection. A retryable
    /// classification at any layer is sticky: the wrapper is retryable if
    /// either its own kind defaults to retryable or the cause already was.
    pub fn wrap(kind: ErrorKind, message: impl Into<String>, cause: OrchestratorError) -> Self {
        let retryable = kind.default_retryable() || cause.retryable;
        let step_id = cause.step_id.clone();
        Self {
            kind,
            step_id,
            message: message.into(),
            retryable,
            context: HashMap::new(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Attaches the failing step's identifier.
    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    /// Attaches a key/value pair of free-form context.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Overrides the retryability flag.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Gets the classification kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Gets the failing step id, when known.
    pub fn step_id(&self) -> Option<&str> {
        self.step_id.as_deref()
    }

    /// Gets the human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the free-form context map.
    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    /// Gets the wrapped cause, when present.
    pub fn cause(&self) -> Option<&OrchestratorError> {
        self.cause.as_deref()
    }

    /// Checks whether this failure may be retried.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Checks whether this failure came from cancellation at any layer.
    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorKind::Cancellation
            || self.cause.as_deref().is_some_and(OrchestratorError::is_cancellation)
    }

    fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(self.kind.as_str());
        out.push_str(" error");
        if let Some(step) = &self.step_id {
            out.push_str(&format!(" in step '{}'", step));
        }
        out.push_str(": ");
        out.push_str(&self.message);
        if let Some(cause) = &self.cause {
            out.push_str(&format!(": {}", cause));
        }
        out
    }
}

/// Classification helper mirroring the retryability flag on the error value.
pub fn is_retryable(err: &OrchestratorError) -> bool {
    err.is_retryable()
}

/// An aggregate of per-stage failures.
///
/// Collected by the operation manager when `continue_on_error` is set, and
/// rendered as a single operation error with one line per failure.
#[derive(Debug, Clone, Default)]
pub struct ErrorList {
    errors: Vec<OrchestratorError>,
}

impl ErrorList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a failure.
    pub fn push(&mut self, err: OrchestratorError) {
        self.errors.push(err);
    }

    /// Checks whether any failure was recorded.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// The recorded failures, in arrival order.
    pub fn errors(&self) -> &[OrchestratorError] {
        &self.errors
    }

    /// Collapses the list into a single error, if any failure was recorded.
    ///
    /// A single-entry list yields that entry unchanged; multiple entries
    /// become one `execution` error whose message joins all failures.
    pub fn into_error(mut self) -> Option<OrchestratorError> {
        match self.errors.len() {
            0 => None,
            1 => self.errors.pop(),
            _ => {
                let joined = self
                    .errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                Some(OrchestratorError::execution(
                    format!("{} stages failed: {}", self.errors.len(), joined),
                    false,
                ))
            }
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&rendered)
    }
}
