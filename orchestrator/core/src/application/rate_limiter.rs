// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fixed-window rate limiter.
//!
//! One counter per `(scope, subject, minute)` on the bus, keyed
//! `ratelimit:<scope>:<subject>:<minute>` and expiring after two minutes.
//! While the bus is unreachable the limiter counts in-process instead, so a
//! single node still enforces the limit on its own traffic.

use crate::application::metrics::RATE_LIMITED_TOTAL;
use crate::domain::bus::Bus;
use crate::domain::clock::Clock;
use crate::domain::errors::ControlPlaneError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const WINDOW_TTL: Duration = Duration::from_secs(120);

pub fn rate_limit_key(scope: &str, subject: &str, minute: i64) -> String {
    format!("ratelimit:{}:{}:{}", scope, subject, minute)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limit of {limit}/min exceeded for {scope} '{subject}'")]
pub struct RateLimitError {
    pub scope: String,
    pub subject: String,
    pub limit: u64,
}

impl From<RateLimitError> for ControlPlaneError {
    fn from(err: RateLimitError) -> Self {
        ControlPlaneError::RateLimited(err.to_string())
    }
}

pub struct RateLimiter {
    bus: Arc<dyn Bus>,
    clock: Arc<dyn Clock>,
    limit: u64,
    /// Fallback windows, keyed like the bus counters.
    local: DashMap<String, u64>,
}

impl RateLimiter {
    pub fn new(bus: Arc<dyn Bus>, clock: Arc<dyn Clock>, limit_per_minute: u64) -> Self {
        Self {
            bus,
            clock,
            limit: limit_per_minute,
            local: DashMap::new(),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Count one call against `subject` in `scope`. Returns the running count
    /// for the current minute, or [`RateLimitError`] once it passes the limit.
    pub async fn check(&self, scope: &str, subject: &str) -> Result<u64, RateLimitError> {
        let minute = self.clock.now().timestamp().div_euclid(60);
        let key = rate_limit_key(scope, subject, minute);

        let count = match self.bus.counter_incr_with_expiry(&key, WINDOW_TTL).await {
            Ok(count) => u64::try_from(count).unwrap_or(0),
            Err(e) => {
                warn!(error = %e, scope, "Rate limit counter unavailable; counting locally");
                self.count_locally(key, minute)
            }
        };

        if count > self.limit {
            metrics::counter!(RATE_LIMITED_TOTAL, "scope" => scope.to_string()).increment(1);
            return Err(RateLimitError {
                scope: scope.to_string(),
                subject: subject.to_string(),
                limit: self.limit,
            });
        }
        Ok(count)
    }

    fn count_locally(&self, key: String, minute: i64) -> u64 {
        let suffix = format!(":{}", minute);
        self.local.retain(|k, _| k.ends_with(&suffix));
        let mut count = self.local.entry(key).or_default();
        *count += 1;
        *count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::infrastructure::memory_bus::InMemoryBus;

    fn limiter(limit: u64) -> (Arc<ManualClock>, Arc<InMemoryBus>, RateLimiter) {
        let clock = Arc::new(ManualClock::at_epoch());
        let bus = Arc::new(InMemoryBus::new(clock.clone()));
        let limiter = RateLimiter::new(bus.clone(), clock.clone(), limit);
        (clock, bus, limiter)
    }

    #[tokio::test]
    async fn test_limit_applies_per_minute_window() {
        let (clock, bus, limiter) = limiter(3);
        for expected in 1..=3 {
            assert_eq!(limiter.check("submit", "client-a").await.unwrap(), expected);
        }
        let err = limiter.check("submit", "client-a").await.unwrap_err();
        assert_eq!(err.limit, 3);
        assert_eq!(ControlPlaneError::from(err).kind().as_str(), "rate_limited");

        // Other subjects have their own window.
        assert_eq!(limiter.check("submit", "client-b").await.unwrap(), 1);

        let minute = clock.now().timestamp().div_euclid(60);
        let key = rate_limit_key("submit", "client-a", minute);
        let expires = bus.expires_at(&key).unwrap();
        assert_eq!((expires - clock.now()).num_seconds(), 120);

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(limiter.check("submit", "client-a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_local_fallback_when_bus_is_down() {
        let (clock, bus, limiter) = limiter(2);
        bus.set_unavailable(true);
        assert_eq!(limiter.check("register", "agent-1").await.unwrap(), 1);
        assert_eq!(limiter.check("register", "agent-1").await.unwrap(), 2);
        assert!(limiter.check("register", "agent-1").await.is_err());

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(limiter.check("register", "agent-1").await.unwrap(), 1);
        // Stale windows are dropped.
        assert_eq!(limiter.local.len(), 1);
    }
}
