// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Dead-letter consumer.
//!
//! Consumer group `mission-dlq` on `mission.dlq`. Every message that names a
//! mission gets a `dlq` audit entry (actor `dlq`, reason = message type), so
//! dead-lettered missions stay inspectable through the audit log. Messages
//! flagged `replay: true` are republished as `mission.queued`.
//!
//! Failures here are logged and acked; the DLQ never dead-letters to itself.

use crate::application::audit_trail::AuditTrail;
use crate::application::background::{BackgroundTask, LoopError};
use crate::domain::audit::{AuditTransition, ACTOR_DLQ};
use crate::domain::bus::BusError;
use crate::domain::config::MissionControlConfig;
use crate::domain::envelope::{
    payload, MessageEnvelope, MISSION_DLQ_GROUP, MISSION_DLQ_STREAM, MISSION_EVENTS_STREAM,
    MSG_MISSION_QUEUED,
};
use crate::domain::mission::MissionId;
use crate::domain::repository::RepositoryError;
use crate::infrastructure::event_bus::{
    BatchReport, EnvelopeHandler, EventBus, FailurePolicy, StreamSubscription,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

pub struct DlqConsumer {
    events: EventBus,
    audit: AuditTrail,
    subscription: StreamSubscription,
}

impl DlqConsumer {
    pub async fn subscribe(
        events: EventBus,
        audit: AuditTrail,
        config: &MissionControlConfig,
    ) -> Result<Self, BusError> {
        let subscription = events
            .subscribe(
                MISSION_DLQ_STREAM,
                MISSION_DLQ_GROUP,
                &config.consumer_name,
                config.consumer_batch_size,
                config.consumer_block_ms,
                FailurePolicy::LogOnly,
            )
            .await?;
        Ok(Self {
            events,
            audit,
            subscription,
        })
    }

    pub async fn poll(&self) -> Result<BatchReport, BusError> {
        self.events.consume_batch(&self.subscription, self).await
    }

    async fn replay(&self, envelope: &MessageEnvelope, mission_id: MissionId) -> Result<(), String> {
        let queued = self
            .events
            .envelope(
                MSG_MISSION_QUEUED,
                payload([
                    ("mission_id", json!(mission_id.to_string())),
                    ("replay", json!(true)),
                ]),
            )
            .with_correlation(envelope.id.clone());
        self.events
            .publish(MISSION_EVENTS_STREAM, &queued)
            .await
            .map_err(|e| e.to_string())?;
        info!(mission_id = %mission_id, "Replayed dead-lettered mission");
        Ok(())
    }
}

#[async_trait]
impl EnvelopeHandler for DlqConsumer {
    async fn handle(&self, envelope: &MessageEnvelope) -> Result<(), String> {
        let Some(mission_id) = envelope.mission_id().and_then(|raw| MissionId::from_string(raw).ok()) else {
            warn!(
                envelope_id = %envelope.id,
                message_type = %envelope.message_type,
                "Dead-lettered message without a mission; nothing to audit"
            );
            return Ok(());
        };

        let entry = self
            .audit
            .entry(mission_id, AuditTransition::Dlq, None, None, ACTOR_DLQ)
            .with_reason(envelope.message_type.clone());
        match self.audit.record(&entry).await {
            Ok(()) => {}
            Err(RepositoryError::ForeignKeyViolation(_)) => {
                warn!(mission_id = %mission_id, "Dead-lettered message for unknown mission");
                return Ok(());
            }
            Err(e) => return Err(format!("dlq audit append failed: {}", e)),
        }

        if envelope.payload.get("replay") == Some(&Value::Bool(true)) {
            self.replay(envelope, mission_id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BackgroundTask for DlqConsumer {
    fn name(&self) -> &'static str {
        "dlq_consumer"
    }

    async fn tick(&self) -> Result<Duration, LoopError> {
        self.poll().await?;
        Ok(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bus::Bus;
    use crate::domain::clock::{Clock, FixedRandom, ManualClock, SequentialIds};
    use crate::domain::mission::{Mission, MissionRequest};
    use crate::domain::repository::{AuditRepository, MissionRepository};
    use crate::infrastructure::event_bus::TopicAcl;
    use crate::infrastructure::memory_bus::InMemoryBus;
    use crate::infrastructure::repositories::InMemoryRepository;
    use std::sync::Arc;

    struct Fixture {
        clock: Arc<ManualClock>,
        bus: Arc<InMemoryBus>,
        events: EventBus,
        repo: InMemoryRepository,
        consumer: DlqConsumer,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at_epoch());
        let bus = Arc::new(InMemoryBus::new(clock.clone()));
        let ids = Arc::new(SequentialIds::new());
        let events = EventBus::new(
            bus.clone(),
            clock.clone(),
            ids.clone(),
            Arc::new(FixedRandom::midpoint()),
            TopicAcl::default(),
            Duration::from_secs(3600),
        );
        let repo = InMemoryRepository::new();
        let audit = AuditTrail::new(Arc::new(repo.clone()), clock.clone(), ids);
        let config = MissionControlConfig {
            consumer_block_ms: 0,
            ..MissionControlConfig::default()
        };
        let consumer = DlqConsumer::subscribe(events.clone(), audit, &config).await.unwrap();
        Fixture {
            clock,
            bus,
            events,
            repo,
            consumer,
        }
    }

    async fn stored_mission(f: &Fixture) -> MissionId {
        let mission = Mission::new(MissionId::new(), MissionRequest::new("T"), f.clock.now());
        MissionRepository::create(&f.repo, &mission).await.unwrap();
        mission.id
    }

    async fn dead_letter(f: &Fixture, message_type: &str, body: serde_json::Map<String, Value>) {
        let envelope = f.events.envelope(message_type, body);
        f.events.publish(MISSION_DLQ_STREAM, &envelope).await.unwrap();
    }

    #[tokio::test]
    async fn test_dead_letter_is_audited() {
        let f = fixture().await;
        let id = stored_mission(&f).await;
        dead_letter(
            &f,
            "mission.retry.exhausted",
            payload([("mission_id", json!(id.to_string())), ("retries", json!(4))]),
        )
        .await;
        assert_eq!(f.consumer.poll().await.unwrap().handled, 1);

        let audit = f.repo.list_for_mission(id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].transition, AuditTransition::Dlq);
        assert_eq!(audit[0].actor, ACTOR_DLQ);
        assert_eq!(audit[0].reason.as_deref(), Some("mission.retry.exhausted"));
        assert!(f.bus.stream_range(MISSION_EVENTS_STREAM).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_flag_republishes_queued() {
        let f = fixture().await;
        let id = stored_mission(&f).await;
        dead_letter(
            &f,
            "mission.consumer.error",
            payload([("mission_id", json!(id.to_string())), ("replay", json!(true))]),
        )
        .await;
        f.consumer.poll().await.unwrap();

        let events = f.bus.stream_range(MISSION_EVENTS_STREAM).await.unwrap();
        assert_eq!(events.len(), 1);
        let queued = MessageEnvelope::from_json(&events[0].body).unwrap();
        assert_eq!(queued.message_type, MSG_MISSION_QUEUED);
        assert_eq!(queued.mission_id(), Some(id.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_messages_without_known_mission_are_acked() {
        let f = fixture().await;
        dead_letter(&f, "mission.consumer.error", payload([("raw", json!("{"))])).await;
        dead_letter(
            &f,
            "mission.retry.exhausted",
            payload([("mission_id", json!(MissionId::new().to_string()))]),
        )
        .await;
        let report = f.consumer.poll().await.unwrap();
        assert_eq!(report.handled, 2);
        assert!(f
            .bus
            .stream_pending(MISSION_DLQ_STREAM, MISSION_DLQ_GROUP)
            .await
            .unwrap()
            .is_empty());
        // Nothing is dead-lettered back onto the DLQ.
        assert_eq!(f.bus.stream_range(MISSION_DLQ_STREAM).await.unwrap().len(), 2);
    }
}
