// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Stream/Cache Bus Interface
//!
//! The narrow set of key-value, set, sorted-set, stream and pub/sub
//! primitives the control plane needs from its shared cache. The in-memory
//! implementation lives in `crate::infrastructure::memory_bus`.
//!
//! Any call may fail with [`BusError::Unavailable`]. Callers retry critical
//! state writes and degrade on reads (cache misses fall through to the
//! repository).
//!
//! ## Key conventions
//!
//! | Key | Kind | Owner |
//! |-----|------|-------|
//! | `mission:<id>` | hash | Orchestrator |
//! | `missions:index` | set | Orchestrator |
//! | `mission:<id>:retries` | counter | mission consumer |
//! | `mission.retries` | sorted set | Retry scheduler |
//! | `agent:<id>` | value (JSON) | Agent registry |
//! | `agent:<id>:load` | value | Agent registry |
//! | `agent:<id>:failures` | counter | Orchestrator |
//! | `cb:open:<id>` | value | Orchestrator |
//! | `msg:dedup:<envelope id>` | value | Event bus |

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// One stream record as returned by a consumer-group read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// `<millis>-<sequence>`.
    pub id: String,
    pub body: String,
}

#[async_trait]
pub trait Bus: Send + Sync {
    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), BusError>;

    /// Empty map when the key does not exist.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, BusError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, BusError>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, BusError>;
    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool, BusError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, BusError>;

    /// Keys matching a glob pattern where `*` matches any run of characters.
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, BusError>;

    /// Append to a stream and return the new entry id.
    async fn stream_publish(&self, stream: &str, body: &str) -> Result<String, BusError>;

    /// Create the consumer group if it does not exist yet. A new group starts
    /// at the beginning of the stream.
    async fn stream_group_ensure(&self, stream: &str, group: &str) -> Result<(), BusError>;

    /// Read up to `count` entries never delivered to `group`, waiting at most
    /// `block_ms` when none are available.
    async fn stream_group_read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, BusError>;

    async fn stream_ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<bool, BusError>;

    /// Every entry currently in the stream, oldest first.
    async fn stream_range(&self, stream: &str) -> Result<Vec<StreamEntry>, BusError>;

    /// Ids delivered to `group` and not yet acknowledged.
    async fn stream_pending(&self, stream: &str, group: &str) -> Result<Vec<String>, BusError>;

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<(), BusError>;

    /// Atomically remove and return every member whose score is `<= now`,
    /// lowest score first.
    async fn zset_pop_due(&self, key: &str, now: f64) -> Result<Vec<String>, BusError>;

    async fn zset_remove(&self, key: &str, member: &str) -> Result<bool, BusError>;
    async fn zset_score(&self, key: &str, member: &str) -> Result<Option<f64>, BusError>;

    /// Atomic increment. The expiry is applied when the counter is created,
    /// so the window is fixed from the first increment.
    async fn counter_incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, BusError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError>;

    /// Returns `true` when the key was absent and has now been written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BusError>;

    async fn get(&self, key: &str) -> Result<Option<String>, BusError>;
    async fn exists(&self, key: &str) -> Result<bool, BusError>;
    async fn delete(&self, key: &str) -> Result<bool, BusError>;

    /// Put a TTL on an existing key. `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, BusError>;

    /// Fire-and-forget fan-out. Returns the number of live subscribers.
    async fn publish_channel(&self, channel: &str, message: &str) -> Result<usize, BusError>;

    async fn subscribe_channel(&self, channel: &str) -> Result<BoxStream<'static, String>, BusError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    #[error("wrong value type at key '{0}'")]
    WrongType(String),

    #[error("bus serialization error: {0}")]
    Serialization(String),
}

impl BusError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Unavailable(_))
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Serialization(err.to_string())
    }
}

/// Glob match supporting `*` only, the subset `scan_match` needs.
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == candidate;
    }
    let mut rest = candidate;
    let first = parts[0];
    if !rest.starts_with(first) {
        return false;
    }
    rest = &rest[first.len()..];
    let last = parts[parts.len() - 1];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
