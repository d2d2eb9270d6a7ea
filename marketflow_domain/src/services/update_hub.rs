// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Observer Port
//!
//! The single outward interface the engine publishes through. The
//! application injects an implementation (a WebSocket hub, in practice);
//! the transport owns fan-out, keep-alive, and serialization format. The
//! engine only ever emits complete [`OperationSnapshot`] payloads — partial
//! or delta events are deliberately absent.

use crate::entities::snapshot::OperationSnapshot;

/// Event type used for every snapshot publish.
pub const EVENT_OPERATION_SNAPSHOT: &str = "operation:snapshot";

/// Status string used for every snapshot publish.
pub const EVENT_STATUS_UPDATE: &str = "update";

/// Outward publishing port, implemented by the application's transport.
///
/// The broadcaster invokes this once per state mutation, from its single
/// serializing task, with `event_type = "operation:snapshot"`,
/// `key = operation_id`, and `status = "update"`. Implementations must not
/// block for long — they run on the broadcaster's only thread of progress.
pub trait UpdateHub: Send + Sync {
    /// Publishes one complete snapshot.
    fn broadcast_update(
        &self,
        event_type: &str,
        key: &str,
        status: &str,
        payload: &OperationSnapshot,
    );
}

/// Hub that discards every update. Useful in tests and headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullUpdateHub;

impl UpdateHub for NullUpdateHub {
    fn broadcast_update(&self, _: &str, _: &str, _: &str, _: &OperationSnapshot) {}
}
