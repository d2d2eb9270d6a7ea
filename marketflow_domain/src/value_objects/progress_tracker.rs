// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Small progress arithmetic helper: current/total counts, elapsed time, and
//! an ETA estimate with human-readable formatting. Stage implementations use
//! it to compose the progress messages they feed to the broadcaster.

use std::time::{Duration, Instant};

/// Tracks progress through a known amount of work.
///
/// # Examples
///
/// ```
/// use marketflow_domain::value_objects::ProgressTracker;
///
/// let mut tracker = ProgressTracker::new(200);
/// tracker.advance(50);
/// assert_eq!(tracker.percentage(), 25.0);
/// ```
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    current: u64,
    total: u64,
    started_at: Instant,
}

impl ProgressTracker {
    /// Creates a tracker for `total` units of work, starting now.
    pub fn new(total: u64) -> Self {
        Self {
            current: 0,
            total,
            started_at: Instant::now(),
        }
    }

    /// Records `units` additional completed units, saturating at `total`.
    pub fn advance(&mut self, units: u64) {
        self.current = self.current.saturating_add(units).min(self.total);
    }

    /// Sets the absolute completed count, saturating at `total`.
    pub fn set_current(&mut self, current: u64) {
        self.current = current.min(self.total);
    }

    /// Completed units.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Total units.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Completion percentage in `[0, 100]`. A zero-total tracker reports 0.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.current as f64 / self.total as f64) * 100.0
    }

    /// Wall-clock time since the tracker was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Estimated time remaining, extrapolated from the observed rate.
    ///
    /// Returns `None` before any progress has been made.
    pub fn eta(&self) -> Option<Duration> {
        if self.current == 0 || self.total == 0 {
            return None;
        }
        let elapsed = self.elapsed().as_secs_f64();
        let rate = self.current as f64 / elapsed.max(f64::EPSILON);
        let remaining = (self.total - self.current) as f64 / rate;
        Some(Duration::from_secs_f64(remaining.max(0.0)))
    }

    /// ETA formatted as `"2h 5m"`, `"3m 20s"`, or `"45s"`; `"--"` when no
    /// estimate is available yet.
    pub fn format_eta(&self) -> String {
        match self.eta() {
            None => "--".to_string(),
            Some(eta) => format_duration(eta),
        }
    }
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
