// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Marketflow Engine
//!
//! The orchestration engine for the financial-data ingestion pipeline. Four
//! tightly coupled subsystems cooperate:
//!
//! - the **step registry** (domain) holds the stage graph in insertion order
//! - the **operation manager** drives one operation end-to-end — dependency
//!   order, validation, per-step timeouts, retries, cancellation
//! - the **status broadcaster** serializes every state mutation through one
//!   task and publishes complete snapshots outward
//! - the **job queue** accepts asynchronous submissions, dispatches them to
//!   a bounded worker pool, persists lifecycle through a pluggable store,
//!   and recovers interrupted work on restart
//!
//! The shared **pipeline manifest** links them by recording what data exists
//! and what each stage has produced.
//!
//! ## Layering
//!
//! - [`application`] — use-case orchestration (the operation manager)
//! - [`infrastructure`] — runtime plumbing: broadcaster, queue, supervised
//!   tasks, store implementations, filesystem detection

pub mod application;
pub mod infrastructure;

pub use application::services::operation_manager::OperationManager;
pub use infrastructure::repositories::memory_job_store::InMemoryJobStore;
pub use infrastructure::repositories::sqlite_job_store::SqliteJobStore;
pub use infrastructure::runtime::job_queue::{JobQueue, QueueStats};
pub use infrastructure::services::status_broadcaster::StatusBroadcaster;
