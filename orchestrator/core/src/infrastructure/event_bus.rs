// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Envelope Streams over the shared Bus
//
// Two delivery modes coexist:
// - pub/sub channels: fan-out, fire-and-forget (agent change feed)
// - streams with consumer groups: at-least-once, explicit ack (mission
//   lifecycle and the dead-letter stream)
//
// Stream consumers get deduplication on the envelope id, poison handling
// and dead-lettering through `consume_batch`. The retry sorted set lives
// here too since every retry touches the same stream plumbing.

use crate::application::metrics as m;
use crate::domain::bus::{Bus, BusError, StreamEntry};
use crate::domain::clock::{Clock, IdGenerator, RandomSource};
use crate::domain::config::RetryPolicy;
use crate::domain::envelope::{payload, MessageEnvelope, MISSION_DLQ_STREAM, MSG_CONSUMER_ERROR};
use crate::domain::mission::MissionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Sorted set of scheduled retries: member = mission id, score = due epoch seconds.
pub const RETRY_ZSET: &str = "mission.retries";

/// Sender id stamped on envelopes produced by the control plane itself.
pub const CORE_SENDER: &str = "mission-control";

/// Role assumed by in-process publishers.
pub const SYSTEM_ROLE: &str = "general";

/// Role -> topic patterns. A pattern is a literal topic, a prefix ending in
/// `*` (`domain.*`), or `*` alone.
#[derive(Debug, Clone, Default)]
pub struct TopicAcl {
    rules: BTreeMap<String, Vec<String>>,
}

impl TopicAcl {
    pub fn new(rules: BTreeMap<String, Vec<String>>) -> Self {
        let rules = rules
            .into_iter()
            .map(|(role, patterns)| (role.trim().to_lowercase(), patterns))
            .collect();
        Self { rules }
    }

    pub fn allows(&self, role: &str, topic: &str) -> bool {
        let Some(patterns) = self.rules.get(&role.trim().to_lowercase()) else {
            return false;
        };
        patterns.iter().any(|pattern| {
            if pattern == "*" || pattern == topic {
                return true;
            }
            pattern
                .strip_suffix('*')
                .is_some_and(|prefix| topic.starts_with(prefix))
        })
    }
}

/// Consumer-side processing of one decoded envelope.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, envelope: &MessageEnvelope) -> Result<(), String>;
}

/// What happens to an entry whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Publish `mission.consumer.error` to the DLQ, then ack.
    DeadLetter,
    /// Log and ack. Used by the DLQ consumer itself.
    LogOnly,
}

/// A consumer group membership created by [`EventBus::subscribe`].
#[derive(Debug, Clone)]
pub struct StreamSubscription {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub batch_size: usize,
    pub block_ms: u64,
    pub on_failure: FailurePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Handled,
    /// Same envelope id seen within the dedup window.
    Suppressed,
    /// Entry body was not a valid envelope.
    Poisoned,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub handled: usize,
    pub suppressed: usize,
    pub poisoned: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.handled + self.suppressed + self.poisoned + self.failed
    }

    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Handled => self.handled += 1,
            DeliveryOutcome::Suppressed => self.suppressed += 1,
            DeliveryOutcome::Poisoned => self.poisoned += 1,
            DeliveryOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDecision {
    pub accepted: bool,
    pub delay_seconds: f64,
}

/// Event bus for publishing and consuming mission envelopes
#[derive(Clone)]
pub struct EventBus {
    bus: Arc<dyn Bus>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    random: Arc<dyn RandomSource>,
    acl: Arc<TopicAcl>,
    dedup_window: Duration,
}

impl EventBus {
    pub fn new(
        bus: Arc<dyn Bus>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        random: Arc<dyn RandomSource>,
        acl: TopicAcl,
        dedup_window: Duration,
    ) -> Self {
        Self {
            bus,
            clock,
            ids,
            random,
            acl: Arc::new(acl),
            dedup_window,
        }
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    /// Fresh envelope with a generated id and the current time.
    pub fn envelope(&self, message_type: &str, payload: Map<String, Value>) -> MessageEnvelope {
        MessageEnvelope::new(
            self.ids.next_id().to_string(),
            self.clock.now(),
            CORE_SENDER,
            message_type,
            payload,
        )
    }

    /// Append to a stream as the trusted system role.
    pub async fn publish(&self, stream: &str, envelope: &MessageEnvelope) -> Result<String, BusError> {
        let body = envelope.to_json()?;
        let entry_id = self.bus.stream_publish(stream, &body).await?;
        metrics::counter!(m::EVENT_BUS_PUBLISHED_TOTAL, "stream" => stream.to_string()).increment(1);
        debug!(
            stream = %stream,
            entry_id = %entry_id,
            message_type = %envelope.message_type,
            "Published envelope"
        );
        Ok(entry_id)
    }

    /// ACL-gated stream publish. A denial is logged and counted and yields
    /// `Ok(None)`.
    pub async fn publish_as(
        &self,
        role: &str,
        stream: &str,
        envelope: &MessageEnvelope,
    ) -> Result<Option<String>, BusError> {
        if !self.authorize(role, stream, "publish") {
            return Ok(None);
        }
        self.publish(stream, envelope).await.map(Some)
    }

    /// Fire-and-forget fan-out on a pub/sub channel.
    pub async fn broadcast<T: Serialize + Sync>(&self, channel: &str, message: &T) -> Result<usize, BusError> {
        let body = serde_json::to_string(message)?;
        let receivers = self.bus.publish_channel(channel, &body).await?;
        if receivers == 0 {
            debug!(channel = %channel, "No subscribers listening to channel");
        }
        Ok(receivers)
    }

    /// ACL check for either direction. Denials are logged and counted.
    pub fn authorize(&self, role: &str, topic: &str, action: &'static str) -> bool {
        if self.acl.allows(role, topic) {
            return true;
        }
        warn!(role = %role, topic = %topic, action, "ACL deny");
        metrics::counter!(m::EVENT_BUS_ACL_DENIED_TOTAL, "action" => action).increment(1);
        false
    }

    /// Join (creating if needed) a consumer group.
    pub async fn subscribe(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        batch_size: usize,
        block_ms: u64,
        on_failure: FailurePolicy,
    ) -> Result<StreamSubscription, BusError> {
        self.bus.stream_group_ensure(stream, group).await?;
        Ok(StreamSubscription {
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            batch_size,
            block_ms,
            on_failure,
        })
    }

    /// ACL-gated [`subscribe`](Self::subscribe). A denial yields `Ok(None)`
    /// and no group is created.
    #[allow(clippy::too_many_arguments)]
    pub async fn subscribe_as(
        &self,
        role: &str,
        stream: &str,
        group: &str,
        consumer: &str,
        batch_size: usize,
        block_ms: u64,
        on_failure: FailurePolicy,
    ) -> Result<Option<StreamSubscription>, BusError> {
        if !self.authorize(role, stream, "subscribe") {
            return Ok(None);
        }
        self.subscribe(stream, group, consumer, batch_size, block_ms, on_failure)
            .await
            .map(Some)
    }

    /// Read one batch (blocking up to `block_ms`) and deliver every entry.
    pub async fn consume_batch(
        &self,
        sub: &StreamSubscription,
        handler: &dyn EnvelopeHandler,
    ) -> Result<BatchReport, BusError> {
        let entries = self
            .bus
            .stream_group_read(&sub.stream, &sub.group, &sub.consumer, sub.batch_size, sub.block_ms)
            .await?;
        let mut report = BatchReport::default();
        for entry in entries {
            report.record(self.deliver(sub, &entry, handler).await?);
        }
        Ok(report)
    }

    /// Dedup, dispatch and ack a single entry.
    ///
    /// A bus failure before the ack leaves the entry pending for redelivery.
    pub async fn deliver(
        &self,
        sub: &StreamSubscription,
        entry: &StreamEntry,
        handler: &dyn EnvelopeHandler,
    ) -> Result<DeliveryOutcome, BusError> {
        let envelope = match MessageEnvelope::from_json(&entry.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    stream = %sub.stream,
                    entry_id = %entry.id,
                    error = %e,
                    "Poison message on stream"
                );
                metrics::counter!(m::EVENT_BUS_POISON_TOTAL, "stream" => sub.stream.clone()).increment(1);
                let dead = self.envelope(
                    MSG_CONSUMER_ERROR,
                    payload([
                        ("stream", json!(sub.stream)),
                        ("entry_id", json!(entry.id)),
                        ("error", json!(e.to_string())),
                        ("raw", json!(entry.body)),
                    ]),
                );
                self.dead_letter(sub, &dead).await;
                self.bus.stream_ack(&sub.stream, &sub.group, &entry.id).await?;
                return Ok(DeliveryOutcome::Poisoned);
            }
        };

        let fresh = self
            .bus
            .set_if_absent(&envelope.dedup_key(), "1", self.dedup_window)
            .await?;
        if !fresh {
            debug!(
                stream = %sub.stream,
                envelope_id = %envelope.id,
                "Duplicate envelope suppressed"
            );
            metrics::counter!(m::DEDUP_SUPPRESSED_TOTAL).increment(1);
            self.bus.stream_ack(&sub.stream, &sub.group, &entry.id).await?;
            return Ok(DeliveryOutcome::Suppressed);
        }

        let outcome = match handler.handle(&envelope).await {
            Ok(()) => DeliveryOutcome::Handled,
            Err(reason) => {
                error!(
                    stream = %sub.stream,
                    entry_id = %entry.id,
                    message_type = %envelope.message_type,
                    error = %reason,
                    "Envelope handler failed"
                );
                if sub.on_failure == FailurePolicy::DeadLetter {
                    let mut body = payload([
                        ("stream", json!(sub.stream)),
                        ("entry_id", json!(entry.id)),
                        ("message_type", json!(envelope.message_type)),
                        ("error", json!(reason)),
                    ]);
                    if let Some(mission_id) = envelope.mission_id() {
                        body.insert("mission_id".to_string(), json!(mission_id));
                    }
                    let dead = self
                        .envelope(MSG_CONSUMER_ERROR, body)
                        .with_correlation(envelope.id.clone());
                    self.dead_letter(sub, &dead).await;
                }
                DeliveryOutcome::Failed
            }
        };
        self.bus.stream_ack(&sub.stream, &sub.group, &entry.id).await?;
        Ok(outcome)
    }

    async fn dead_letter(&self, sub: &StreamSubscription, envelope: &MessageEnvelope) {
        if sub.stream == MISSION_DLQ_STREAM {
            return;
        }
        match self.publish(MISSION_DLQ_STREAM, envelope).await {
            Ok(_) => {
                metrics::counter!(m::MISSION_DLQ_TOTAL, "reason" => envelope.message_type.clone())
                    .increment(1);
            }
            Err(e) => error!(error = %e, "Failed to publish to dead-letter stream"),
        }
    }

    /// Schedule retry `attempt` (1-based) for a mission.
    ///
    /// Refused when `attempt > policy.max_attempts`. Otherwise
    /// `delay = min(max_delay, base * factor^(attempt-1))` plus a uniform
    /// jitter of `±jitter_fraction * delay`, clamped at zero.
    pub async fn schedule_retry(
        &self,
        mission_id: MissionId,
        attempt: u32,
        policy: &RetryPolicy,
    ) -> Result<RetryDecision, BusError> {
        if attempt > policy.max_attempts {
            metrics::counter!(m::MISSION_RETRY_REFUSED_TOTAL).increment(1);
            return Ok(RetryDecision {
                accepted: false,
                delay_seconds: 0.0,
            });
        }
        let exponent = attempt.saturating_sub(1) as i32;
        let base_delay = (policy.base_seconds * policy.factor.powi(exponent)).min(policy.max_delay_seconds);
        let spread = policy.jitter_fraction * base_delay;
        let delay = (base_delay + self.random.uniform(-spread, spread)).max(0.0);

        let due = epoch_seconds(self.clock.now()) + delay;
        self.bus.zset_add(RETRY_ZSET, &mission_id.to_string(), due).await?;
        metrics::counter!(m::MISSION_RETRY_SCHEDULED_TOTAL).increment(1);
        debug!(mission_id = %mission_id, attempt, delay, "Retry scheduled");
        Ok(RetryDecision {
            accepted: true,
            delay_seconds: delay,
        })
    }

    /// Claim every retry due at or before `now`.
    pub async fn dequeue_due_retries(&self, now: DateTime<Utc>) -> Result<Vec<MissionId>, BusError> {
        let members = self.bus.zset_pop_due(RETRY_ZSET, epoch_seconds(now)).await?;
        Ok(members
            .into_iter()
            .filter_map(|raw| match MissionId::from_string(&raw) {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(member = %raw, "Dropping malformed retry entry");
                    None
                }
            })
            .collect())
    }

    pub async fn clear_retry(&self, mission_id: MissionId) -> Result<bool, BusError> {
        self.bus.zset_remove(RETRY_ZSET, &mission_id.to_string()).await
    }

    /// Due time of a scheduled retry, in epoch seconds.
    pub async fn retry_due_at(&self, mission_id: MissionId) -> Result<Option<f64>, BusError> {
        self.bus.zset_score(RETRY_ZSET, &mission_id.to_string()).await
    }
}

pub fn epoch_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp_millis() as f64 / 1000.0
}
