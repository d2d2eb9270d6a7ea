// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bootstrap Logger
//!
//! A minimal logging abstraction for the bootstrap phase plus the one-time
//! tracing initialization the engine expects. The trait exists so bootstrap
//! code can log before (and independently of) the global subscriber, and so
//! tests can assert against a no-op implementation.

use tracing_subscriber::EnvFilter;

/// Bootstrap logging abstraction.
///
/// Implementations can route through tracing, stderr, or nothing at all.
pub trait BootstrapLogger: Send + Sync {
    /// Fatal errors that will terminate startup.
    fn error(&self, message: &str);

    /// Non-fatal issues that may affect operation.
    fn warn(&self, message: &str);

    /// Normal startup progress.
    fn info(&self, message: &str);

    /// Detailed diagnostics.
    fn debug(&self, message: &str);
}

/// Logger routing bootstrap messages through the tracing crate.
pub struct ConsoleLogger {
    prefix: String,
}

impl ConsoleLogger {
    /// Creates a console logger with the default `bootstrap` prefix.
    pub fn new() -> Self {
        Self::with_prefix("bootstrap")
    }

    /// Creates a console logger with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapLogger for ConsoleLogger {
    fn error(&self, message: &str) {
        tracing::error!(target: "bootstrap", "[{}] {}", self.prefix, message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "bootstrap", "[{}] {}", self.prefix, message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "bootstrap", "[{}] {}", self.prefix, message);
    }

    fn debug(&self, message: &str) {
        tracing::debug!(target: "bootstrap", "[{}] {}", self.prefix, message);
    }
}

/// Logger that swallows everything. For tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl BootstrapLogger for NoopLogger {
    fn error(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn debug(&self, _message: &str) {}
}

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, falling back to the supplied
/// default directive (e.g. `"info"` or `"marketflow=debug"`). Calling this
/// twice is harmless: the second installation fails quietly and the first
/// subscriber stays in place.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
