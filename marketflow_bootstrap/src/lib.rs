// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Marketflow Bootstrap
//!
//! Process-level plumbing the engine relies on but which belongs to the
//! composition root rather than the domain: logging initialization and
//! graceful shutdown coordination.

pub mod logger;
pub mod shutdown;

pub use logger::{init_tracing, BootstrapLogger, ConsoleLogger, NoopLogger};
pub use shutdown::{CancellationToken, ShutdownCoordinator, DEFAULT_GRACE_PERIOD_SECS};
