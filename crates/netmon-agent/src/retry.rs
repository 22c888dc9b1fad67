// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Exponential backoff with symmetric jitter.
//!
//! The delay for attempt `i` is centred on `base * 2^i` and jittered uniformly
//! by up to [`RETRY_JITTER_FRACTION`] in either direction. Randomness comes from
//! the caller so that schedules are reproducible under a seeded [`fastrand::Rng`].

use std::time::Duration;

use crate::constants::RETRY_JITTER_FRACTION;

// 2^31 times any sane base already saturates; keeps `powi` and the cast exact.
const MAX_EXPONENT: u32 = 31;

/// Jitter-free centre of the delay for `attempt`.
#[must_use]
pub fn backoff_center(attempt: u32, base: Duration) -> Duration {
    let factor = 2f64.powi(attempt.min(MAX_EXPONENT) as i32);
    Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// Delay before retry `attempt` (0-based).
pub fn backoff_delay(attempt: u32, base: Duration, rng: &mut fastrand::Rng) -> Duration {
    let center = backoff_center(attempt, base);
    if center.is_zero() {
        return Duration::ZERO;
    }
    let spread = center.as_secs_f64() * RETRY_JITTER_FRACTION;
    // Uniform in [-spread, spread).
    let offset = (rng.f64() * 2.0 - 1.0) * spread;
    Duration::try_from_secs_f64((center.as_secs_f64() + offset).max(0.0)).unwrap_or(center)
}

/// One delay per attempt. Zero attempts is treated as one.
pub fn backoff_schedule(base: Duration, attempts: u32, rng: &mut fastrand::Rng) -> Vec<Duration> {
    (0..attempts.max(1))
        .map(|attempt| backoff_delay(attempt, base, rng))
        .collect()
}
