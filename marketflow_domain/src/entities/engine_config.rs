// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Engine Configuration
//!
//! Immutable-after-construction tunables for the operation manager: the
//! execution mode, per-step timeouts, the retry policy, error-handling
//! strategy, concurrency bound, checkpoint directory, and arbitrary per-step
//! configuration payloads. Built through a fluent builder and installed on
//! the manager once.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use crate::error::OrchestratorError;
use crate::value_objects::RetryPolicy;

/// Timeout applied to a step with no explicit entry in the timeout map.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How the manager schedules stages.
///
/// The ingestion pipelines are data-serial, so `Parallel` is accepted but
/// executes the same sequential loop; dependency order is always respected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One stage at a time, in dependency order
    #[default]
    Sequential,
    /// Accepted alias for sequential execution
    Parallel,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(ExecutionMode::Sequential),
            "parallel" => Ok(ExecutionMode::Parallel),
            _ => Err(OrchestratorError::invalid_state(format!(
                "Unknown execution mode: {}",
                s
            ))),
        }
    }
}

/// Engine tunables, set once on the operation manager.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    execution_mode: ExecutionMode,
    step_timeouts: HashMap<String, Duration>,
    retry_policy: RetryPolicy,
    continue_on_error: bool,
    max_concurrency: usize,
    checkpoint_dir: Option<PathBuf>,
    step_configs: HashMap<String, Value>,
}

impl EngineConfig {
    /// Starts a builder with default settings.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Scheduling mode.
    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    /// Timeout for the given step, falling back to [`DEFAULT_STEP_TIMEOUT`].
    pub fn timeout_for(&self, step_id: &str) -> Duration {
        self.step_timeouts
            .get(step_id)
            .copied()
            .unwrap_or(DEFAULT_STEP_TIMEOUT)
    }

    /// Retry shape for retryable step failures.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Whether a failed stage aborts the run or the loop carries on.
    pub fn continue_on_error(&self) -> bool {
        self.continue_on_error
    }

    /// Upper bound on concurrently executing stages.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Directory reserved for checkpoint artifacts.
    pub fn checkpoint_dir(&self) -> Option<&PathBuf> {
        self.checkpoint_dir.as_ref()
    }

    /// Arbitrary configuration payload for the given step.
    pub fn step_config(&self, step_id: &str) -> Option<&Value> {
        self.step_configs.get(step_id)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Sequential,
            step_timeouts: HashMap::new(),
            retry_policy: RetryPolicy::default(),
            continue_on_error: false,
            max_concurrency: 1,
            checkpoint_dir: None,
            step_configs: HashMap::new(),
        }
    }
}

/// Fluent builder for [`EngineConfig`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use marketflow_domain::entities::EngineConfig;
/// use marketflow_domain::value_objects::RetryPolicy;
///
/// let config = EngineConfig::builder()
///     .step_timeout("scraping", Duration::from_secs(3600))
///     .retry_policy(RetryPolicy::no_retry())
///     .continue_on_error(true)
///     .build();
///
/// assert!(config.continue_on_error());
/// assert_eq!(config.timeout_for("scraping"), Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Sets the scheduling mode.
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.config.execution_mode = mode;
        self
    }

    /// Sets the timeout for one step.
    pub fn step_timeout(mut self, step_id: impl Into<String>, timeout: Duration) -> Self {
        self.config.step_timeouts.insert(step_id.into(), timeout);
        self
    }

    /// Sets the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Sets whether stage failures abort the run.
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.config.continue_on_error = continue_on_error;
        self
    }

    /// Sets the concurrency bound; values below 1 are raised to 1.
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Sets the checkpoint directory.
    pub fn checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_dir = Some(dir.into());
        self
    }

    /// Attaches an arbitrary configuration payload to one step.
    pub fn step_config(mut self, step_id: impl Into<String>, value: Value) -> Self {
        self.config.step_configs.insert(step_id.into(), value);
        self
    }

    /// Finalizes the configuration.
    pub fn build(self) -> EngineConfig {
        self.config
    }
}
