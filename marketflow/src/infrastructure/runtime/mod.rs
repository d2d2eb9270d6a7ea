// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Runtime concerns: supervised task execution and the job queue.

pub mod job_queue;
pub mod supervisor;

pub use job_queue::{JobQueue, QueueStats};
pub use supervisor::{join_supervised, spawn_supervised, AppResult};
