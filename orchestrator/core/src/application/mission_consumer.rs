// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Mission Event Consumer
//!
//! Consumer group `mission-workers` on `mission.events`.
//!
//! - `mission.failed`: bump `mission:<id>:retries` and schedule the next
//!   attempt. Once the budget is spent, publish `mission.retry.exhausted`
//!   to the DLQ instead.
//! - `mission.completed`: drop the retry counter.
//!
//! Other message types are acked untouched. Handler errors are dead-lettered
//! by the event bus as `mission.consumer.error`.

use crate::application::background::{BackgroundTask, LoopError};
use crate::application::orchestrator::retry_counter_key;
use crate::domain::bus::{Bus, BusError};
use crate::domain::config::{MissionControlConfig, RetryPolicy};
use crate::domain::envelope::{
    payload, MessageEnvelope, MISSION_DLQ_STREAM, MISSION_EVENTS_STREAM, MISSION_WORKERS_GROUP,
    MSG_MISSION_COMPLETED, MSG_MISSION_FAILED, MSG_RETRY_EXHAUSTED,
};
use crate::domain::mission::MissionId;
use crate::infrastructure::event_bus::{
    BatchReport, EnvelopeHandler, EventBus, FailurePolicy, StreamSubscription,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct MissionEventConsumer {
    events: EventBus,
    bus: Arc<dyn Bus>,
    subscription: StreamSubscription,
    policy: RetryPolicy,
    counter_ttl: Duration,
}

impl MissionEventConsumer {
    /// Join the `mission-workers` group, creating it if needed.
    pub async fn subscribe(events: EventBus, config: &MissionControlConfig) -> Result<Self, BusError> {
        let subscription = events
            .subscribe(
                MISSION_EVENTS_STREAM,
                MISSION_WORKERS_GROUP,
                &config.consumer_name,
                config.consumer_batch_size,
                config.consumer_block_ms,
                FailurePolicy::DeadLetter,
            )
            .await?;
        Ok(Self {
            bus: events.bus().clone(),
            events,
            subscription,
            policy: config.retry_policy(),
            counter_ttl: Duration::from_secs(config.retry_counter_ttl_seconds),
        })
    }

    /// Read and handle one batch.
    pub async fn poll(&self) -> Result<BatchReport, BusError> {
        self.events.consume_batch(&self.subscription, self).await
    }

    async fn on_failed(&self, envelope: &MessageEnvelope, mission_id: MissionId) -> Result<(), BusError> {
        let attempt = self
            .bus
            .counter_incr_with_expiry(&retry_counter_key(mission_id), self.counter_ttl)
            .await?;
        let attempt = u32::try_from(attempt).unwrap_or(u32::MAX);
        let decision = self.events.schedule_retry(mission_id, attempt, &self.policy).await?;

        if decision.accepted {
            info!(
                mission_id = %mission_id,
                attempt,
                delay_seconds = decision.delay_seconds,
                "Retry scheduled"
            );
            return Ok(());
        }

        warn!(mission_id = %mission_id, retries = attempt, "Retry budget exhausted");
        let exhausted = self
            .events
            .envelope(
                MSG_RETRY_EXHAUSTED,
                payload([
                    ("mission_id", json!(mission_id.to_string())),
                    ("retries", json!(attempt)),
                ]),
            )
            .with_correlation(envelope.id.clone());
        self.events.publish(MISSION_DLQ_STREAM, &exhausted).await?;
        metrics::counter!(crate::application::metrics::MISSION_DLQ_TOTAL, "reason" => MSG_RETRY_EXHAUSTED)
            .increment(1);
        Ok(())
    }

    async fn on_completed(&self, mission_id: MissionId) -> Result<(), BusError> {
        self.bus.delete(&retry_counter_key(mission_id)).await?;
        self.events.clear_retry(mission_id).await?;
        debug!(mission_id = %mission_id, "Cleared retry state for completed mission");
        Ok(())
    }
}

fn mission_id_of(envelope: &MessageEnvelope) -> Result<MissionId, String> {
    let raw = envelope
        .mission_id()
        .ok_or_else(|| format!("{} without mission_id", envelope.message_type))?;
    MissionId::from_string(raw).map_err(|e| format!("invalid mission_id '{}': {}", raw, e))
}

#[async_trait]
impl EnvelopeHandler for MissionEventConsumer {
    async fn handle(&self, envelope: &MessageEnvelope) -> Result<(), String> {
        match envelope.message_type.as_str() {
            MSG_MISSION_FAILED => {
                let mission_id = mission_id_of(envelope)?;
                self.on_failed(envelope, mission_id).await.map_err(|e| e.to_string())
            }
            MSG_MISSION_COMPLETED => {
                let mission_id = mission_id_of(envelope)?;
                self.on_completed(mission_id).await.map_err(|e| e.to_string())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl BackgroundTask for MissionEventConsumer {
    fn name(&self) -> &'static str {
        "mission_event_consumer"
    }

    async fn tick(&self) -> Result<Duration, LoopError> {
        self.poll().await?;
        // The blocking read paces the loop.
        Ok(Duration::ZERO)
    }
}
