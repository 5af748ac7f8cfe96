// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # In-Memory Bus
//!
//! A single-process implementation of [`Bus`] for development and tests.
//!
//! All keyed data lives in one keyspace behind a `parking_lot::Mutex`, which
//! makes every operation (including counter increments and due-pops) atomic.
//! Expiry is measured against the injected [`Clock`], so tests can step
//! through TTLs with a `ManualClock`. An expired key is dropped when it is
//! touched, and the whole keyspace is swept for expired keys at most once per
//! clock second.
//!
//! Stream entries that every consumer group has read and acknowledged are
//! trimmed, keeping the newest `stream_retention` of them for inspection.
//!
//! Pub/sub channels are `tokio::sync::broadcast` senders. Blocking stream
//! reads park on a `tokio::sync::Notify` that every publish wakes.

use crate::domain::bus::{glob_match, Bus, BusError, StreamEntry};
use crate::domain::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio_stream::wrappers::BroadcastStream;

const CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_STREAM_RETENTION: usize = 1000;

enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
    Stream(StreamData),
}

struct Slot {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct StreamData {
    entries: VecDeque<StreamEntry>,
    /// Absolute position of `entries[0]`.
    base: u64,
    last_ms: i64,
    last_seq: u64,
    groups: HashMap<String, ConsumerGroup>,
}

#[derive(Default)]
struct ConsumerGroup {
    /// Absolute position of the next never-delivered entry.
    cursor: u64,
    /// entry id -> (position, consumer)
    pending: HashMap<String, (u64, String)>,
}

impl StreamData {
    /// Absolute position below which every group has read and acked.
    fn settled(&self) -> u64 {
        self.groups
            .values()
            .map(|g| {
                g.pending
                    .values()
                    .map(|(pos, _)| *pos)
                    .min()
                    .map_or(g.cursor, |p| p.min(g.cursor))
            })
            .min()
            .unwrap_or(self.base)
    }

    fn trim(&mut self, retention: usize) {
        let settled = self.settled().saturating_sub(self.base) as usize;
        let excess = settled.saturating_sub(retention).min(self.entries.len());
        if excess > 0 {
            self.entries.drain(..excess);
            self.base += excess as u64;
        }
    }
}

#[derive(Default)]
struct Keyspace {
    slots: HashMap<String, Slot>,
    next_sweep: Option<DateTime<Utc>>,
}

impl Keyspace {
    /// Drop every expired slot, at most once per second of clock time.
    fn sweep_expired(&mut self, now: DateTime<Utc>) {
        if self.next_sweep.is_some_and(|at| now < at) {
            return;
        }
        self.slots
            .retain(|_, s| s.expires_at.map_or(true, |at| at > now));
        self.next_sweep = Some(now + chrono::Duration::seconds(1));
    }

    fn purge_if_expired(&mut self, key: &str, now: DateTime<Utc>) {
        let expired = self
            .slots
            .get(key)
            .and_then(|s| s.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            self.slots.remove(key);
        }
    }

    fn live(&mut self, key: &str, now: DateTime<Utc>) -> Option<&mut Slot> {
        self.purge_if_expired(key, now);
        self.slots.get_mut(key)
    }

    /// Live slot at `key`, created from `init` (with `expires_at`) when absent.
    fn create_or_live(
        &mut self,
        key: &str,
        now: DateTime<Utc>,
        init: impl FnOnce() -> Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> &mut Slot {
        self.purge_if_expired(key, now);
        self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: init(),
            expires_at,
        })
    }

    fn live_keys(&mut self, now: DateTime<Utc>) -> Vec<String> {
        self.next_sweep = None;
        self.sweep_expired(now);
        self.slots.keys().cloned().collect()
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl).ok().map(|d| now + d)
}

pub struct InMemoryBus {
    clock: Arc<dyn Clock>,
    stream_retention: usize,
    keyspace: Mutex<Keyspace>,
    stream_notify: Notify,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    unavailable: AtomicBool,
}

impl InMemoryBus {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            stream_retention: DEFAULT_STREAM_RETENTION,
            keyspace: Mutex::new(Keyspace::default()),
            stream_notify: Notify::new(),
            channels: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// How many fully acknowledged entries each stream keeps.
    pub fn with_stream_retention(mut self, entries: usize) -> Self {
        self.stream_retention = entries;
        self
    }

    /// Number of slots held, live or not yet swept.
    pub fn slot_count(&self) -> usize {
        self.keyspace.lock().slots.len()
    }

    /// Lock the keyspace, sweeping expired slots when one is due.
    fn lock_keyspace(&self, now: DateTime<Utc>) -> parking_lot::MutexGuard<'_, Keyspace> {
        let mut ks = self.keyspace.lock();
        ks.sweep_expired(now);
        ks
    }

    /// Simulate an outage: every call fails with `BusError::Unavailable`
    /// until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Absolute expiry of a live key, if it has one.
    pub fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        self.lock_keyspace(now).live(key, now).and_then(|s| s.expires_at)
    }

    fn check(&self) -> Result<(), BusError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("in-memory bus marked unavailable".to_string()));
        }
        Ok(())
    }

    fn try_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        let Some(slot) = ks.live(stream, now) else {
            return Err(BusError::WrongType(format!("{} (no such stream)", stream)));
        };
        let Value::Stream(data) = &mut slot.value else {
            return Err(BusError::WrongType(stream.to_string()));
        };
        let Some(state) = data.groups.get_mut(group) else {
            return Err(BusError::WrongType(format!("{} (no such group {})", stream, group)));
        };
        let start = state.cursor.saturating_sub(data.base) as usize;
        let batch: Vec<StreamEntry> = data.entries.iter().skip(start).take(count).cloned().collect();
        for (offset, entry) in batch.iter().enumerate() {
            let position = data.base + (start + offset) as u64;
            state.pending.insert(entry.id.clone(), (position, consumer.to_string()));
        }
        state.cursor = data.base + (start + batch.len()) as u64;
        Ok(batch)
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        let slot = ks.create_or_live(key, now, || Value::Hash(HashMap::new()), None);
        let Value::Hash(hash) = &mut slot.value else {
            return Err(BusError::WrongType(key.to_string()));
        };
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match ks.live(key, now).map(|s| &s.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(BusError::WrongType(key.to_string())),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match &mut ks.create_or_live(key, now, || Value::Set(HashSet::new()), None).value {
            Value::Set(set) => Ok(set.insert(member.to_string())),
            _ => Err(BusError::WrongType(key.to_string())),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match ks.live(key, now).map(|s| &mut s.value) {
            None => Ok(false),
            Some(Value::Set(set)) => Ok(set.remove(member)),
            Some(_) => Err(BusError::WrongType(key.to_string())),
        }
    }

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match ks.live(key, now).map(|s| &s.value) {
            None => Ok(false),
            Some(Value::Set(set)) => Ok(set.contains(member)),
            Some(_) => Err(BusError::WrongType(key.to_string())),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match ks.live(key, now).map(|s| &s.value) {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            Some(_) => Err(BusError::WrongType(key.to_string())),
        }
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .lock_keyspace(now)
            .live_keys(now)
            .into_iter()
            .filter(|k| glob_match(pattern, k))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn stream_publish(&self, stream: &str, body: &str) -> Result<String, BusError> {
        self.check()?;
        let now = self.clock.now();
        let id = {
            let mut ks = self.lock_keyspace(now);
            let slot = ks.create_or_live(stream, now, || Value::Stream(StreamData::default()), None);
            let Value::Stream(data) = &mut slot.value else {
                return Err(BusError::WrongType(stream.to_string()));
            };
            let ms = now.timestamp_millis();
            if ms > data.last_ms {
                data.last_ms = ms;
                data.last_seq = 0;
            } else {
                data.last_seq += 1;
            }
            let id = format!("{}-{}", data.last_ms, data.last_seq);
            data.entries.push_back(StreamEntry {
                id: id.clone(),
                body: body.to_string(),
            });
            id
        };
        self.stream_notify.notify_waiters();
        Ok(id)
    }

    async fn stream_group_ensure(&self, stream: &str, group: &str) -> Result<(), BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        let slot = ks.create_or_live(stream, now, || Value::Stream(StreamData::default()), None);
        let Value::Stream(data) = &mut slot.value else {
            return Err(BusError::WrongType(stream.to_string()));
        };
        let base = data.base;
        data.groups.entry(group.to_string()).or_insert_with(|| ConsumerGroup {
            cursor: base,
            pending: HashMap::new(),
        });
        Ok(())
    }

    async fn stream_group_read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, BusError> {
        self.check()?;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(block_ms);
        loop {
            let notified = self.stream_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.try_read_group(stream, group, consumer, count)?;
            if !batch.is_empty() || block_ms == 0 {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
            self.check()?;
        }
    }

    async fn stream_ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<bool, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match ks.live(stream, now).map(|s| &mut s.value) {
            Some(Value::Stream(data)) => {
                let acked = data
                    .groups
                    .get_mut(group)
                    .is_some_and(|g| g.pending.remove(entry_id).is_some());
                if acked {
                    data.trim(self.stream_retention);
                }
                Ok(acked)
            }
            Some(_) => Err(BusError::WrongType(stream.to_string())),
            None => Ok(false),
        }
    }

    async fn stream_range(&self, stream: &str) -> Result<Vec<StreamEntry>, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match ks.live(stream, now).map(|s| &s.value) {
            None => Ok(Vec::new()),
            Some(Value::Stream(data)) => Ok(data.entries.iter().cloned().collect()),
            Some(_) => Err(BusError::WrongType(stream.to_string())),
        }
    }

    async fn stream_pending(&self, stream: &str, group: &str) -> Result<Vec<String>, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match ks.live(stream, now).map(|s| &s.value) {
            None => Ok(Vec::new()),
            Some(Value::Stream(data)) => {
                let mut ids: Vec<String> = data
                    .groups
                    .get(group)
                    .map(|g| g.pending.keys().cloned().collect())
                    .unwrap_or_default();
                ids.sort();
                Ok(ids)
            }
            Some(_) => Err(BusError::WrongType(stream.to_string())),
        }
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<(), BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match &mut ks.create_or_live(key, now, || Value::ZSet(HashMap::new()), None).value {
            Value::ZSet(zset) => {
                zset.insert(member.to_string(), score);
                Ok(())
            }
            _ => Err(BusError::WrongType(key.to_string())),
        }
    }

    async fn zset_pop_due(&self, key: &str, now_score: f64) -> Result<Vec<String>, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match ks.live(key, now).map(|s| &mut s.value) {
            None => Ok(Vec::new()),
            Some(Value::ZSet(zset)) => {
                let mut due: Vec<(String, f64)> = zset
                    .iter()
                    .filter(|(_, score)| **score <= now_score)
                    .map(|(m, s)| (m.clone(), *s))
                    .collect();
                due.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                for (member, _) in &due {
                    zset.remove(member);
                }
                Ok(due.into_iter().map(|(m, _)| m).collect())
            }
            Some(_) => Err(BusError::WrongType(key.to_string())),
        }
    }

    async fn zset_remove(&self, key: &str, member: &str) -> Result<bool, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match ks.live(key, now).map(|s| &mut s.value) {
            None => Ok(false),
            Some(Value::ZSet(zset)) => Ok(zset.remove(member).is_some()),
            Some(_) => Err(BusError::WrongType(key.to_string())),
        }
    }

    async fn zset_score(&self, key: &str, member: &str) -> Result<Option<f64>, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match ks.live(key, now).map(|s| &s.value) {
            None => Ok(None),
            Some(Value::ZSet(zset)) => Ok(zset.get(member).copied()),
            Some(_) => Err(BusError::WrongType(key.to_string())),
        }
    }

    async fn counter_incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        let slot = ks.create_or_live(key, now, || Value::Str("0".to_string()), expiry(now, ttl));
        let Value::Str(raw) = &mut slot.value else {
            return Err(BusError::WrongType(key.to_string()));
        };
        let next = raw
            .parse::<i64>()
            .map_err(|_| BusError::WrongType(key.to_string()))?
            + 1;
        *raw = next.to_string();
        Ok(next)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError> {
        self.check()?;
        let now = self.clock.now();
        self.lock_keyspace(now).slots.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: expiry(now, ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        if ks.live(key, now).is_some() {
            return Ok(false);
        }
        ks.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: expiry(now, ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match ks.live(key, now).map(|s| &s.value) {
            None => Ok(None),
            Some(Value::Str(v)) => Ok(Some(v.clone())),
            Some(_) => Err(BusError::WrongType(key.to_string())),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, BusError> {
        self.check()?;
        let now = self.clock.now();
        Ok(self.lock_keyspace(now).live(key, now).is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        ks.purge_if_expired(key, now);
        Ok(ks.slots.remove(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, BusError> {
        self.check()?;
        let now = self.clock.now();
        let mut ks = self.lock_keyspace(now);
        match ks.live(key, now) {
            Some(slot) => {
                slot.expires_at = expiry(now, ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn publish_channel(&self, channel: &str, message: &str) -> Result<usize, BusError> {
        self.check()?;
        let channels = self.channels.lock();
        Ok(channels
            .get(channel)
            .and_then(|tx| tx.send(message.to_string()).ok())
            .unwrap_or(0))
    }

    async fn subscribe_channel(&self, channel: &str) -> Result<BoxStream<'static, String>, BusError> {
        self.check()?;
        let rx = {
            let mut channels = self.channels.lock();
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };
        Ok(BroadcastStream::new(rx)
            .filter_map(|msg| async move { msg.ok() })
            .boxed())
    }
}
