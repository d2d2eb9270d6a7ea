// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Retry Policy
//!
//! The retry shape applied to retryable step failures.
//!
//! ## Delay Semantics
//!
//! The delay before attempt `n` (attempts numbered from 1) is:
//!
//! ```text
//! min(initial_delay × (n − 1) × multiplier, max_delay)
//! ```
//!
//! Attempt 1 therefore waits zero, and the first retry waits
//! `initial_delay × multiplier`. This linear ramp — not the more common
//! `initial × multiplier^(n−1)` geometric one — is a load-bearing contract:
//! callers time their recovery windows around it and the engine's tests pin
//! it down. Do not "correct" it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// Shape of the retry schedule for retryable step failures.
///
/// Immutable once constructed. `max_attempts` counts the first attempt, so a
/// policy with `max_attempts = 3` executes a failing step at most three
/// times.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use marketflow_domain::value_objects::RetryPolicy;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(100), 2.0).unwrap();
///
/// assert_eq!(policy.delay_for(1), Duration::ZERO);
/// assert_eq!(policy.delay_for(2), Duration::from_millis(20));
/// assert_eq!(policy.delay_for(3), Duration::from_millis(40));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    /// Creates a new retry policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when `max_attempts` is zero, `max_delay` is
    /// smaller than `initial_delay`, or the multiplier is not finite and
    /// non-negative.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> Result<Self, OrchestratorError> {
        if max_attempts == 0 {
            return Err(OrchestratorError::invalid_state(
                "retry policy requires at least one attempt",
            ));
        }
        if max_delay < initial_delay {
            return Err(OrchestratorError::invalid_state(
                "retry max_delay must be at least initial_delay",
            ));
        }
        if !multiplier.is_finite() || multiplier < 0.0 {
            return Err(OrchestratorError::invalid_state(
                "retry multiplier must be finite and non-negative",
            ));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 0.0,
        }
    }

    /// Maximum number of attempts, counting the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay unit for the linear ramp.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Upper bound on any single delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Ramp multiplier.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Delay to wait before attempt `attempt` (numbered from 1).
    ///
    /// `delay_for(1)` is always zero.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let scaled = self.initial_delay.as_secs_f64() * f64::from(attempt - 1) * self.multiplier;
        let delay = Duration::from_secs_f64(scaled.max(0.0));
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    /// Three attempts, 500 ms base delay, capped at 30 s, multiplier 2.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_attempt_waits_zero() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::ZERO);
    }

    #[test]
    fn test_linear_ramp() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_millis(10),
            Duration::from_secs(1),
            2.0,
        )
        .unwrap();
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(4), Duration::from_millis(60));
    }

    #[test]
    fn test_delay_is_capped_at_max() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_millis(50),
            Duration::from_millis(120),
            3.0,
        )
        .unwrap();
        assert_eq!(policy.delay_for(2), Duration::from_millis(120));
        assert_eq!(policy.delay_for(9), Duration::from_millis(120));
    }

    #[test]
    fn test_invalid_policies_rejected() {
        assert!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO, 1.0).is_err());
        assert!(RetryPolicy::new(1, Duration::from_secs(2), Duration::from_secs(1), 1.0).is_err());
        assert!(RetryPolicy::new(1, Duration::ZERO, Duration::ZERO, f64::NAN).is_err());
        assert!(RetryPolicy::new(1, Duration::ZERO, Duration::ZERO, -1.0).is_err());
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_max(
            attempt in 1u32..64,
            initial_ms in 0u64..1_000,
            extra_ms in 0u64..10_000,
            multiplier in 0.0f64..8.0,
        ) {
            let initial = Duration::from_millis(initial_ms);
            let max = initial + Duration::from_millis(extra_ms);
            let policy = RetryPolicy::new(64, initial, max, multiplier).unwrap();
            prop_assert!(policy.delay_for(attempt) <= max);
        }

        #[test]
        fn prop_delay_matches_formula(
            attempt in 2u32..32,
            initial_ms in 1u64..500,
            multiplier in 0.1f64..4.0,
        ) {
            let initial = Duration::from_millis(initial_ms);
            let max = Duration::from_secs(3600);
            let policy = RetryPolicy::new(32, initial, max, multiplier).unwrap();
            let expected = initial.as_secs_f64() * f64::from(attempt - 1) * multiplier;
            let actual = policy.delay_for(attempt).as_secs_f64();
            prop_assert!((actual - expected).abs() < 1e-6);
        }
    }
}
