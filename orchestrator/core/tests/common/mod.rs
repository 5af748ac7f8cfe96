// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared wiring for the integration tests: every service over one
//! in-memory bus and repository, driven by a manual clock.

#![allow(dead_code)]

use mission_control_core::application::agent_registry::AgentRegistry;
use mission_control_core::application::audit_trail::AuditTrail;
use mission_control_core::application::dlq_consumer::DlqConsumer;
use mission_control_core::application::mission_consumer::MissionEventConsumer;
use mission_control_core::application::orchestrator::Orchestrator;
use mission_control_core::application::retry_scheduler::RetryScheduler;
use mission_control_core::domain::agent::{Agent, AgentRegistrationRequest};
use mission_control_core::domain::audit::{AuditEntry, AuditTransition};
use mission_control_core::domain::clock::{FixedRandom, ManualClock, SequentialIds};
use mission_control_core::domain::config::MissionControlConfig;
use mission_control_core::domain::mission::MissionState;
use mission_control_core::infrastructure::event_bus::{EventBus, TopicAcl};
use mission_control_core::infrastructure::memory_bus::InMemoryBus;
use mission_control_core::infrastructure::report_store::FilesystemReportStore;
use mission_control_core::infrastructure::repositories::InMemoryRepository;
use std::sync::Arc;

pub struct ControlPlane {
    pub config: MissionControlConfig,
    pub clock: Arc<ManualClock>,
    pub ids: Arc<SequentialIds>,
    pub bus: Arc<InMemoryBus>,
    pub repo: InMemoryRepository,
    pub events: EventBus,
    pub registry: Arc<AgentRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    _reports: tempfile::TempDir,
}

impl ControlPlane {
    pub fn new() -> Self {
        Self::with_config(MissionControlConfig {
            consumer_block_ms: 0,
            ..MissionControlConfig::default()
        })
    }

    pub fn with_config(config: MissionControlConfig) -> Self {
        let clock = Arc::new(ManualClock::at_epoch());
        let ids = Arc::new(SequentialIds::new());
        let bus = Arc::new(InMemoryBus::new(clock.clone()));
        let events = EventBus::new(
            bus.clone(),
            clock.clone(),
            ids.clone(),
            Arc::new(FixedRandom::midpoint()),
            TopicAcl::new(config.acl.clone()),
            config.dedup_window(),
        );
        let repo = InMemoryRepository::new();
        let registry = Arc::new(AgentRegistry::new(
            Arc::new(repo.clone()),
            events.clone(),
            clock.clone(),
            ids.clone(),
            config.liveness_ttl(),
        ));
        let reports = tempfile::tempdir().expect("temp dir");
        let orchestrator = Arc::new(
            Orchestrator::new(
                events.clone(),
                Arc::new(repo.clone()),
                AuditTrail::new(Arc::new(repo.clone()), clock.clone(), ids.clone()),
                registry.clone(),
                Arc::new(FilesystemReportStore::new(reports.path())),
                clock.clone(),
                ids.clone(),
            )
            .with_circuit_breaker((&config).into())
            .with_cache_retention(config.mission_cache_retention()),
        );
        Self {
            config,
            clock,
            ids,
            bus,
            repo,
            events,
            registry,
            orchestrator,
            _reports: reports,
        }
    }

    pub async fn register(&self, request: AgentRegistrationRequest) -> Agent {
        self.registry.register(request).await.expect("register").0
    }

    pub async fn mission_consumer(&self) -> MissionEventConsumer {
        MissionEventConsumer::subscribe(self.events.clone(), &self.config)
            .await
            .expect("subscribe mission-workers")
    }

    pub async fn dlq_consumer(&self) -> DlqConsumer {
        let audit = AuditTrail::new(Arc::new(self.repo.clone()), self.clock.clone(), self.ids.clone());
        DlqConsumer::subscribe(self.events.clone(), audit, &self.config)
            .await
            .expect("subscribe mission-dlq")
    }

    pub fn retry_scheduler(&self) -> RetryScheduler {
        RetryScheduler::new(self.orchestrator.clone(), self.clock.clone(), self.config.retry_tick())
    }

    pub fn advance_secs(&self, seconds: i64) {
        self.clock.advance(chrono::Duration::seconds(seconds));
    }
}

pub fn agent_request(role: &str, capabilities: &[&str], dedup_key: Option<&str>) -> AgentRegistrationRequest {
    AgentRegistrationRequest {
        name: format!("{}-agent", role),
        role: role.to_string(),
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        dedup_key: dedup_key.map(str::to_string),
        ..Default::default()
    }
}

pub fn transitions(entries: &[AuditEntry]) -> Vec<(AuditTransition, Option<MissionState>, Option<MissionState>)> {
    entries
        .iter()
        .map(|e| (e.transition, e.previous_state, e.new_state))
        .collect()
}

/// Checks that an audit log replays as a walk through the mission state
/// machine with non-decreasing timestamps.
pub fn assert_valid_audit_path(entries: &[AuditEntry]) {
    let mut current: Option<MissionState> = None;
    for pair in entries.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp, "audit timestamps went backwards");
    }
    for entry in entries {
        match entry.transition {
            AuditTransition::Create => {
                assert_eq!(current, None, "create must come first");
                assert_eq!(entry.new_state, Some(MissionState::Queued));
            }
            AuditTransition::Assign => {
                assert_eq!(entry.previous_state, Some(MissionState::Queued));
                assert_eq!(entry.new_state, Some(MissionState::Assigned));
            }
            AuditTransition::Retry => {
                assert_eq!(entry.previous_state, Some(MissionState::Failed));
                assert_eq!(entry.new_state, Some(MissionState::Queued));
            }
            AuditTransition::Update => {
                let (Some(from), Some(to)) = (entry.previous_state, entry.new_state) else {
                    panic!("update entry without states: {:?}", entry);
                };
                assert!(from.can_transition_to(to), "invalid edge {} -> {}", from, to);
            }
            AuditTransition::Approve => {
                assert_eq!(entry.previous_state, entry.new_state);
            }
            AuditTransition::Report | AuditTransition::Dlq => continue,
        }
        if entry.transition != AuditTransition::Create {
            assert_eq!(entry.previous_state, current, "audit chain broken at {:?}", entry);
        }
        current = entry.new_state;
    }
}
