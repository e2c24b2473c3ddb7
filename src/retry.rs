// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Exponential backoff with jitter for requeueing failed work items.

use crate::constants::{REQUEUE_INITIAL_INTERVAL_MILLIS, REQUEUE_MAX_INTERVAL_SECS};
use rand::Rng;
use std::time::Duration;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
/// There is no elapsed-time limit: a work item keeps being retried at the maximum
/// interval until it succeeds.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            max_interval,
            multiplier,
            randomization_factor,
        }
    }

    /// Get the next backoff interval and advance the schedule.
    pub fn next_backoff(&mut self) -> Duration {
        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        jittered
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let mut rng = rand::thread_rng();
        let jittered = rng.gen_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Create the requeue backoff used by the work queue.
///
/// # Configuration
///
/// - **Initial interval**: 100ms
/// - **Max interval**: 5 minutes
/// - **Multiplier**: 2.0 (exponential growth)
/// - **Randomization**: ±10% (prevents thundering herd)
///
/// # Retry Schedule
///
/// 1. 100ms
/// 2. 200ms
/// 3. 400ms
/// 4. ...
/// 12. 204.8s
/// 13. 300s (capped at max interval), then every 5 minutes
#[must_use]
pub fn requeue_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(REQUEUE_INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(REQUEUE_MAX_INTERVAL_SECS),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
