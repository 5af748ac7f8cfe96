// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Injected Collaborators: Clock, IdGenerator, RandomSource
//!
//! Every time-dependent, identity-generating or random decision in the
//! control plane goes through one of these traits so that the registry,
//! orchestrator and retry scheduler are deterministic under test.
//!
//! | Trait | Production | Deterministic |
//! |-------|------------|---------------|
//! | [`Clock`] | [`SystemClock`] | [`ManualClock`] |
//! | [`IdGenerator`] | [`UuidV4Generator`] | [`SequentialIds`] |
//! | [`RandomSource`] | [`ThreadRandom`] | [`FixedRandom`] |

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Source of the current UTC instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// 2026-01-01T00:00:00Z, a convenient fixed origin for tests.
    pub fn at_epoch() -> Self {
        Self::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Source of new entity and envelope identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Uuid;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidV4Generator;

impl IdGenerator for UuidV4Generator {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Yields `00000000-0000-0000-0000-000000000001`, `...0002`, ...
///
/// Sequential ids sort in creation order, which keeps selector tie-breaks
/// predictable in tests.
#[derive(Debug, Default)]
pub struct SequentialIds {
    counter: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> Uuid {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Uuid::from_u128(n as u128)
    }
}

/// Uniform random draws, used for retry jitter.
pub trait RandomSource: Send + Sync {
    /// Returns a value in `[low, high]`. Implementations must return `low`
    /// when `low >= high`.
    fn uniform(&self, low: f64, high: f64) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn uniform(&self, low: f64, high: f64) -> f64 {
        if low >= high {
            return low;
        }
        rand::rng().random_range(low..=high)
    }
}

/// Always lands at the same relative position inside the requested range.
///
/// `FixedRandom::midpoint()` cancels jitter out entirely; `FixedRandom::new(1.0)`
/// always picks the upper bound.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom {
    fraction: f64,
}

impl FixedRandom {
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction: fraction.clamp(0.0, 1.0),
        }
    }

    pub fn midpoint() -> Self {
        Self::new(0.5)
    }
}

impl RandomSource for FixedRandom {
    fn uniform(&self, low: f64, high: f64) -> f64 {
        if low >= high {
            return low;
        }
        low + (high - low) * self.fraction
    }
}
