// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Shutdown Coordination
//!
//! Cancellation tokens and a coordinator for tearing the engine down
//! gracefully. The broadcaster's worker, the queue's worker pool, and every
//! live operation each hold a token; firing it makes their `select!` loops
//! unwind at the next await point.
//!
//! A token is a lightweight clonable handle: an atomic flag plus a
//! [`tokio::sync::Notify`]. `cancel()` is idempotent, and `cancelled()`
//! resolves immediately for tokens that were cancelled before the call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Default grace period for graceful shutdown (in seconds)
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;

/// Clonable cancellation signal.
///
/// # Examples
///
/// ```
/// use marketflow_bootstrap::shutdown::CancellationToken;
///
/// # async fn example() {
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// tokio::spawn(async move {
///     tokio::select! {
///         _ = worker_token.cancelled() => { /* unwind */ }
///         _ = async { /* do work */ } => {}
///     }
/// });
///
/// token.cancel();
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    /// Creates a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the token. Idempotent; wakes every current and future waiter.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves when the token fires; immediately if it already has.
    pub async fn cancelled(&self) {
        // Register interest before re-checking the flag so a cancel between
        // the check and the await cannot be missed.
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Coordinates graceful shutdown with a bounded grace period.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace_period: Duration,
}

impl ShutdownCoordinator {
    /// Creates a coordinator with the given grace period.
    pub fn new(grace_period: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace_period,
        }
    }

    /// The shared token tasks should select on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Grace period granted to in-flight work.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Fires the shutdown signal.
    pub fn initiate_shutdown(&self) {
        tracing::info!("shutdown initiated");
        self.token.cancel();
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits for Ctrl-C and then fires the shutdown signal.
    pub async fn listen_for_signal(&self) {
        if tokio::signal::ctrl_c().await.is_ok() {
            self.initiate_shutdown();
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS))
    }
}
