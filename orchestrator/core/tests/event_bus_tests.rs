// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event bus integration tests: duplicate suppression on consumer groups and
//! the retry scheduling bounds.

mod common;

use async_trait::async_trait;
use common::ControlPlane;
use mission_control_core::domain::bus::Bus;
use mission_control_core::domain::clock::{Clock, FixedRandom, ManualClock, SequentialIds};
use mission_control_core::domain::config::RetryPolicy;
use mission_control_core::domain::envelope::{payload, MessageEnvelope, MISSION_EVENTS_STREAM, MISSION_WORKERS_GROUP};
use mission_control_core::domain::mission::MissionId;
use mission_control_core::infrastructure::event_bus::{
    epoch_seconds, EnvelopeHandler, EventBus, FailurePolicy, TopicAcl,
};
use mission_control_core::infrastructure::memory_bus::InMemoryBus;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl EnvelopeHandler for Recorder {
    async fn handle(&self, envelope: &MessageEnvelope) -> Result<(), String> {
        self.seen.lock().push(envelope.id.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_dedup_suppresses_duplicate_delivery() {
    let cp = ControlPlane::new();
    let sub = cp
        .events
        .subscribe(MISSION_EVENTS_STREAM, MISSION_WORKERS_GROUP, "core", 10, 0, FailurePolicy::DeadLetter)
        .await
        .unwrap();

    let body = payload([("mission_id", json!(MissionId::new().to_string()))]);
    let envelope = MessageEnvelope::new("E1", cp.clock.now(), "gateway", "mission.created", body);
    cp.events.publish(MISSION_EVENTS_STREAM, &envelope).await.unwrap();
    cp.events.publish(MISSION_EVENTS_STREAM, &envelope).await.unwrap();

    let recorder = Recorder::default();
    let report = cp.events.consume_batch(&sub, &recorder).await.unwrap();
    assert_eq!(report.handled, 1);
    assert_eq!(report.suppressed, 1);
    assert_eq!(*recorder.seen.lock(), vec!["E1".to_string()]);
    assert!(cp
        .bus
        .stream_pending(MISSION_EVENTS_STREAM, MISSION_WORKERS_GROUP)
        .await
        .unwrap()
        .is_empty());

    // Outside the window the id is fresh again.
    assert_eq!(cp.config.dedup_window_seconds, 3600);
    cp.advance_secs(3601);
    cp.events.publish(MISSION_EVENTS_STREAM, &envelope).await.unwrap();
    let report = cp.events.consume_batch(&sub, &recorder).await.unwrap();
    assert_eq!(report.handled, 1);
    assert_eq!(report.suppressed, 0);
    assert_eq!(*recorder.seen.lock(), vec!["E1".to_string(), "E1".to_string()]);
}

fn events_with(clock: Arc<ManualClock>, fraction: f64) -> EventBus {
    EventBus::new(
        Arc::new(InMemoryBus::new(clock.clone())),
        clock,
        Arc::new(SequentialIds::new()),
        Arc::new(FixedRandom::new(fraction)),
        TopicAcl::default(),
        Duration::from_secs(3600),
    )
}

#[tokio::test]
async fn test_schedule_retry_stays_within_jitter_bounds() {
    let policy = RetryPolicy {
        base_seconds: 2.0,
        factor: 2.0,
        jitter_fraction: 0.5,
        max_delay_seconds: 300.0,
        max_attempts: 5,
    };
    let clock = Arc::new(ManualClock::at_epoch());
    let now = epoch_seconds(clock.now());

    for fraction in [0.0, 0.25, 1.0] {
        let events = events_with(clock.clone(), fraction);
        for attempt in 1..=policy.max_attempts {
            let id = MissionId::new();
            let decision = events.schedule_retry(id, attempt, &policy).await.unwrap();
            assert!(decision.accepted);

            let nominal = policy.base_seconds * policy.factor.powi(attempt as i32 - 1);
            let low = now + nominal * (1.0 - policy.jitter_fraction);
            let high = now + nominal.min(policy.max_delay_seconds) * (1.0 + policy.jitter_fraction);
            let due = events.retry_due_at(id).await.unwrap().unwrap();
            assert!(due >= low - 1e-9 && due <= high + 1e-9, "attempt {} due {} outside [{}, {}]", attempt, due, low, high);
        }

        let refused = events
            .schedule_retry(MissionId::new(), policy.max_attempts + 1, &policy)
            .await
            .unwrap();
        assert!(!refused.accepted);
        assert_eq!(refused.delay_seconds, 0.0);
    }
}

#[tokio::test]
async fn test_max_delay_caps_backoff() {
    let policy = RetryPolicy {
        base_seconds: 10.0,
        factor: 10.0,
        jitter_fraction: 0.0,
        max_delay_seconds: 300.0,
        max_attempts: 5,
    };
    let clock = Arc::new(ManualClock::at_epoch());
    let events = events_with(clock, 0.5);
    let decision = events.schedule_retry(MissionId::new(), 4, &policy).await.unwrap();
    assert_eq!(decision.delay_seconds, 300.0);
}

#[tokio::test]
async fn test_ttl_flag_round_trip() {
    let cp = ControlPlane::new();
    cp.bus
        .set_with_ttl("cb:open:agent", "1", Duration::from_secs(60))
        .await
        .unwrap();
    cp.advance_secs(59);
    assert!(cp.bus.exists("cb:open:agent").await.unwrap());
    cp.advance_secs(2);
    assert!(!cp.bus.exists("cb:open:agent").await.unwrap());
}
