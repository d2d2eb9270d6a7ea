// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Task Supervision Utilities
//!
//! Supervised spawning for the engine's background work. Spawn-and-forget
//! loses errors; these helpers log task lifecycle, and `join_supervised`
//! converts panics and aborts into typed errors, so a misbehaving stage
//! cannot silently take a queue worker down with it.

use tokio::task::JoinHandle;
use tracing::{debug, error};

use marketflow_domain::error::OrchestratorError;

/// Result type alias for engine operations
pub type AppResult<T> = Result<T, OrchestratorError>;

/// Spawns a task whose outcome is logged and whose handle must be awaited.
pub fn spawn_supervised<F, T>(name: &'static str, fut: F) -> JoinHandle<AppResult<T>>
where
    F: std::future::Future<Output = AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    debug!(task = name, "task starting");

    tokio::spawn(async move {
        let result = fut.await;

        match &result {
            Ok(_) => debug!(task = name, "task completed"),
            Err(e) => error!(task = name, error = %e, "task failed"),
        }

        result
    })
}

/// Awaits a supervised handle, converting panics into `fatal` errors and
/// aborts into `cancellation` errors.
pub async fn join_supervised<T>(handle: JoinHandle<AppResult<T>>) -> AppResult<T> {
    match handle.await {
        Ok(task_result) => task_result,
        Err(e) if e.is_panic() => Err(OrchestratorError::fatal(format!("task panicked: {}", e))),
        Err(e) if e.is_cancelled() => {
            Err(OrchestratorError::cancellation("task was aborted"))
        }
        Err(e) => Err(OrchestratorError::fatal(format!("task join failed: {}", e))),
    }
}
