// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Marketflow Domain
//!
//! Pure business logic for the marketflow orchestration engine: the error
//! taxonomy, operation and step runtime state, the persistent pipeline
//! manifest, asynchronous jobs, broadcast snapshots, the step contract, the
//! insertion-ordered step registry, and the persistence ports.
//!
//! This crate is independent of the runtime and of storage technology: no
//! tokio, no database driver, no transport. Async appears only on the
//! infrastructure ports ([`services::PipelineStep`],
//! [`repositories::JobStore`]) because they abstract I/O-bound work.
//!
//! ## Module Structure
//!
//! - [`error`] — structured, classified, retry-aware errors
//! - [`entities`] — operation state, manifest, jobs, snapshots, engine
//!   configuration
//! - [`value_objects`] — retry policy, data specifications, progress
//!   arithmetic, request/response carriers
//! - [`services`] — the step contract and the snapshot observer port
//! - [`registry`] — insertion-ordered step registry with topological
//!   ordering
//! - [`repositories`] — the job/manifest persistence port

pub mod entities;
pub mod error;
pub mod registry;
pub mod repositories;
pub mod services;
pub mod value_objects;

pub use error::{ErrorKind, ErrorList, OrchestratorError};
pub use registry::StepRegistry;
