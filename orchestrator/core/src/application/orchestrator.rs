// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Mission Orchestrator
//!
//! Sole owner of mission state. Every mutation runs under a per-mission lock
//! and applies its side effects in a fixed order:
//!
//! 1. cache hash `mission:<id>` (plus the `missions:index` set)
//! 2. repository (retried; masked when the cache write succeeded)
//! 3. audit entry (failure is counted, never rolled back)
//! 4. stream event on `mission.events`
//!
//! Reads go to the cache first and fall through to the repository, refilling
//! the cache on the way back.
//!
//! ## State machine
//!
//! ```text
//! submit -> queued -> assigned -> executing -> verifying -> completed
//!                                      \______________________/
//! any non-terminal state --fail--> failed --retry--> queued
//! ```
//!
//! Three failures of missions owned by the same agent within the breaker
//! window open `cb:open:<agent_id>`, which hides that agent from the
//! [`Selector`] until the flag expires.

use crate::application::agent_registry::{AgentRegistry, RegistryError};
use crate::application::audit_trail::{retry_transient, AuditTrail, WriteBackoff};
use crate::application::metrics as m;
use crate::application::selector::{circuit_open_key, Selection, Selector};
use crate::domain::agent::AgentId;
use crate::domain::audit::{AuditEntry, AuditTransition, ACTOR_MANAGER, ACTOR_ORCHESTRATOR, ACTOR_SYSTEM};
use crate::domain::bus::{Bus, BusError};
use crate::domain::clock::{Clock, IdGenerator};
use crate::domain::config::MissionControlConfig;
use crate::domain::envelope::{
    payload, MessageEnvelope, MISSION_EVENTS_STREAM, MSG_MISSION_ASSIGNED, MSG_MISSION_CREATED,
    MSG_MISSION_QUEUED,
};
use crate::domain::errors::ControlPlaneError;
use crate::domain::mission::{
    mission_cache_key, Mission, MissionId, MissionRequest, MissionState, MissionValidationError,
};
use crate::domain::repository::{MissionRepository, RepositoryError};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::report_store::ReportStore;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Set of every mission id the cache has seen.
pub const MISSIONS_INDEX: &str = "missions:index";

pub const MISSION_NOT_FOUND: &str = "Mission not found";

pub const DEFAULT_CACHE_RETENTION: Duration = Duration::from_secs(3600);

pub fn retry_counter_key(id: MissionId) -> String {
    format!("mission:{}:retries", id)
}

pub fn agent_failures_key(id: AgentId) -> String {
    format!("agent:{}:failures", id)
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("mission {0} not found")]
    NotFound(MissionId),

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: MissionState, to: MissionState },

    #[error(transparent)]
    Validation(#[from] MissionValidationError),

    #[error("mission repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<OrchestratorError> for ControlPlaneError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound(_) => ControlPlaneError::NotFound(err.to_string()),
            OrchestratorError::InvalidTransition { .. } | OrchestratorError::Validation(_) => {
                ControlPlaneError::Validation(err.to_string())
            }
            OrchestratorError::Repository(_) | OrchestratorError::Bus(_) => {
                ControlPlaneError::Transient(err.to_string())
            }
            OrchestratorError::Registry(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerPolicy {
    pub failure_threshold: i64,
    pub failure_window: Duration,
    pub open_for: Duration,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window: Duration::from_secs(300),
            open_for: Duration::from_secs(60),
        }
    }
}

impl From<&MissionControlConfig> for CircuitBreakerPolicy {
    fn from(config: &MissionControlConfig) -> Self {
        Self {
            failure_threshold: config.circuit_breaker_failure_threshold,
            failure_window: Duration::from_secs(config.circuit_breaker_failure_window_seconds),
            open_for: Duration::from_secs(config.circuit_breaker_open_seconds),
        }
    }
}

/// Result of `submit_report`, shaped for the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportReceipt {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReportReceipt {
    fn stored(path: String) -> Self {
        Self {
            ok: true,
            path: Some(path),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            path: None,
            error: Some(error.into()),
        }
    }
}

pub struct Orchestrator {
    bus: Arc<dyn Bus>,
    events: EventBus,
    missions: Arc<dyn MissionRepository>,
    audit: AuditTrail,
    registry: Arc<AgentRegistry>,
    selector: Selector,
    reports: Arc<dyn ReportStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    breaker: CircuitBreakerPolicy,
    write_backoff: WriteBackoff,
    cache_retention: Duration,
    locks: DashMap<MissionId, Arc<Mutex<()>>>,
}

impl Orchestrator {
    pub fn new(
        events: EventBus,
        missions: Arc<dyn MissionRepository>,
        audit: AuditTrail,
        registry: Arc<AgentRegistry>,
        reports: Arc<dyn ReportStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let bus = events.bus().clone();
        Self {
            selector: Selector::new(bus.clone(), clock.clone()),
            bus,
            events,
            missions,
            audit,
            registry,
            reports,
            clock,
            ids,
            breaker: CircuitBreakerPolicy::default(),
            write_backoff: WriteBackoff::default(),
            cache_retention: DEFAULT_CACHE_RETENTION,
            locks: DashMap::new(),
        }
    }

    pub fn with_circuit_breaker(mut self, policy: CircuitBreakerPolicy) -> Self {
        self.breaker = policy;
        self
    }

    pub fn with_write_backoff(mut self, backoff: WriteBackoff) -> Self {
        self.write_backoff = backoff;
        self
    }

    /// How long a finished mission's cache hash outlives its last write.
    pub fn with_cache_retention(mut self, retention: Duration) -> Self {
        self.cache_retention = retention;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    pub async fn submit(&self, request: MissionRequest) -> Result<Mission, OrchestratorError> {
        request.validate()?;
        let mission = Mission::new(MissionId(self.ids.next_id()), request, self.clock.now());
        let lock = self.lock_for(mission.id);
        let _guard = lock.lock().await;

        let cached = self.cache_write(&mission, "submit").await;
        self.persist(&mission, cached, true, "submit").await?;
        self.record_audit(self.audit.entry(
            mission.id,
            AuditTransition::Create,
            None,
            Some(MissionState::Queued),
            ACTOR_ORCHESTRATOR,
        ))
        .await;

        let envelope = self.events.envelope(
            MSG_MISSION_CREATED,
            payload([
                ("mission_id", json!(mission.id.to_string())),
                ("title", json!(mission.title)),
                ("priority", json!(mission.priority)),
                ("state", json!(mission.state.as_str())),
            ]),
        );
        self.emit(envelope).await;
        count_transition(None, MissionState::Queued, None);
        info!(mission_id = %mission.id, title = %mission.title, "Mission submitted");
        Ok(mission)
    }

    /// Assign the first queued mission the selector can place.
    pub async fn assign_next(&self) -> Result<Option<Mission>, OrchestratorError> {
        let candidates = self.registry.list(true).await?;
        if candidates.is_empty() {
            debug!("No live agents; nothing to assign");
            return Ok(None);
        }

        let mut queued = self.queued_missions().await?;
        queued.sort_by_key(|m| (m.created_at, Reverse(m.priority)));

        for snapshot in queued {
            let lock = self.lock_for(snapshot.id);
            let _guard = lock.lock().await;

            // State may have moved while waiting for the lock.
            let Some(mut mission) = self.load(snapshot.id).await? else {
                continue;
            };
            if mission.state != MissionState::Queued {
                continue;
            }
            let Some(selection) = self.selector.select(&mission, &candidates).await else {
                continue;
            };
            let agent_id = selection.agent_id();

            let entered = mission.updated_at;
            mission.state = MissionState::Assigned;
            mission.agent_id = Some(agent_id);
            mission.updated_at = self.clock.now();

            let cached = self.cache_write(&mission, "assign").await;
            self.persist(&mission, cached, false, "assign").await?;
            self.record_audit(self.audit.entry(
                mission.id,
                AuditTransition::Assign,
                Some(MissionState::Queued),
                Some(MissionState::Assigned),
                ACTOR_ORCHESTRATOR,
            ))
            .await;

            let envelope = self
                .events
                .envelope(MSG_MISSION_ASSIGNED, state_payload(&mission, MissionState::Queued))
                .with_recipient(agent_id.to_string());
            self.emit(envelope).await;
            count_transition(
                Some(MissionState::Queued),
                MissionState::Assigned,
                Some(mission.updated_at - entered),
            );
            info!(
                mission_id = %mission.id,
                agent_id = %agent_id,
                fallback = matches!(selection, Selection::Fallback { .. }),
                "Mission assigned"
            );
            return Ok(Some(mission));
        }
        Ok(None)
    }

    pub async fn start(&self, id: MissionId) -> Result<Mission, OrchestratorError> {
        self.transition(id, MissionState::Executing).await
    }

    pub async fn verify(&self, id: MissionId) -> Result<Mission, OrchestratorError> {
        self.transition(id, MissionState::Verifying).await
    }

    pub async fn complete(&self, id: MissionId) -> Result<Mission, OrchestratorError> {
        self.transition(id, MissionState::Completed).await
    }

    pub async fn fail(&self, id: MissionId) -> Result<Mission, OrchestratorError> {
        self.transition(id, MissionState::Failed).await
    }

    async fn transition(&self, id: MissionId, to: MissionState) -> Result<Mission, OrchestratorError> {
        let lock = self.lock_for(id);
        let guard = lock.lock().await;

        let mut mission = self.load(id).await?.ok_or(OrchestratorError::NotFound(id))?;
        let from = mission.state;
        if !from.can_transition_to(to) {
            warn!(mission_id = %id, from = %from, to = %to, "Rejected invalid transition");
            return Err(OrchestratorError::InvalidTransition { from, to });
        }

        let entered = mission.updated_at;
        mission.state = to;
        mission.updated_at = self.clock.now();
        let cached = self.cache_write(&mission, "transition").await;

        if to == MissionState::Failed {
            if let Some(agent_id) = mission.agent_id {
                self.record_agent_failure(agent_id).await;
            }
        }

        self.persist(&mission, cached, false, "transition").await?;
        self.record_audit(self.audit.entry(id, AuditTransition::Update, Some(from), Some(to), ACTOR_ORCHESTRATOR))
            .await;

        if to == MissionState::Completed {
            self.clear_retry_state(id).await;
        }

        let envelope = self.events.envelope(&to.event_type(), state_payload(&mission, from));
        self.emit(envelope).await;
        count_transition(Some(from), to, Some(mission.updated_at - entered));
        info!(mission_id = %id, from = %from, to = %to, "Mission transitioned");

        drop(guard);
        if to.is_terminal() {
            self.release_lock(id, lock);
        }
        Ok(mission)
    }

    /// Mark a mission approved. State is unchanged and no event is emitted.
    pub async fn approve(&self, id: MissionId) -> Result<Mission, OrchestratorError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut mission = self.load(id).await?.ok_or(OrchestratorError::NotFound(id))?;
        mission.approved = true;
        mission.updated_at = self.clock.now();

        let cached = self.cache_write(&mission, "approve").await;
        self.persist(&mission, cached, false, "approve").await?;
        self.record_audit(
            self.audit
                .entry(id, AuditTransition::Approve, Some(mission.state), Some(mission.state), ACTOR_MANAGER)
                .with_reason("Approval"),
        )
        .await;
        info!(mission_id = %id, "Mission approved");
        Ok(mission)
    }

    /// Move a failed mission back to `queued` once its retry is due.
    ///
    /// Returns `None` when the mission vanished or is no longer `failed`; the
    /// retry entry is cleared either way.
    pub async fn requeue_for_retry(&self, id: MissionId) -> Result<Option<Mission>, OrchestratorError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let Some(mut mission) = self.load(id).await? else {
            warn!(mission_id = %id, "Due retry for unknown mission");
            self.clear_retry_entry(id).await;
            return Ok(None);
        };
        if mission.state != MissionState::Failed {
            debug!(mission_id = %id, state = %mission.state, "Skipping retry for mission no longer failed");
            self.clear_retry_entry(id).await;
            return Ok(None);
        }

        let entered = mission.updated_at;
        mission.state = MissionState::Queued;
        mission.agent_id = None;
        mission.updated_at = self.clock.now();

        let cached = self.cache_write(&mission, "retry").await;
        self.persist(&mission, cached, false, "retry").await?;
        self.record_audit(self.audit.entry(
            id,
            AuditTransition::Retry,
            Some(MissionState::Failed),
            Some(MissionState::Queued),
            ACTOR_SYSTEM,
        ))
        .await;

        let envelope = self
            .events
            .envelope(MSG_MISSION_QUEUED, state_payload(&mission, MissionState::Failed));
        self.emit(envelope).await;
        self.clear_retry_entry(id).await;

        count_transition(
            Some(MissionState::Failed),
            MissionState::Queued,
            Some(mission.updated_at - entered),
        );
        metrics::counter!(m::MISSION_RETRY_DISPATCHED_TOTAL).increment(1);
        info!(mission_id = %id, "Mission requeued for retry");
        Ok(Some(mission))
    }

    /// Store an agent report and record it in the mission's audit log.
    pub async fn submit_report(&self, mission_id: MissionId, agent_id: &str, report: &Value) -> ReportReceipt {
        match self.load(mission_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return ReportReceipt::failed(MISSION_NOT_FOUND),
            Err(e) => return ReportReceipt::failed(e.to_string()),
        }

        let path = match self.reports.store(agent_id, self.clock.now(), report).await {
            Ok(path) => path,
            Err(e) => {
                error!(mission_id = %mission_id, agent_id, error = %e, "Report submit failed");
                return ReportReceipt::failed(e.to_string());
            }
        };

        let entry = self
            .audit
            .entry(mission_id, AuditTransition::Report, None, None, agent_id)
            .with_reason("Health check report submitted");
        match self.audit.record(&entry).await {
            Ok(()) => {}
            Err(RepositoryError::ForeignKeyViolation(_)) => return ReportReceipt::failed(MISSION_NOT_FOUND),
            Err(e) => {
                error!(mission_id = %mission_id, error = %e, "Audit append failed for report");
                metrics::counter!(m::AUDIT_WRITE_FAILED_TOTAL).increment(1);
            }
        }
        info!(mission_id = %mission_id, agent_id, path = %path, "Report stored");
        ReportReceipt::stored(path)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub async fn get(&self, id: MissionId) -> Result<Option<Mission>, OrchestratorError> {
        self.load(id).await
    }

    /// Newest first. Falls back to the cache when the repository is down.
    pub async fn list(&self, limit: usize) -> Result<Vec<Mission>, OrchestratorError> {
        match retry_transient(self.write_backoff, "mission_list", || self.missions.list(limit)).await {
            Ok(missions) => Ok(missions),
            Err(e) => {
                warn!(error = %e, "Mission list degraded to cache");
                metrics::counter!(m::ORCHESTRATOR_ERRORS_TOTAL, "operation" => "list").increment(1);
                let mut missions = self.cached_missions().await?;
                missions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                missions.truncate(limit);
                Ok(missions)
            }
        }
    }

    /// Audit log for a mission. A failed read yields an empty list.
    pub async fn audit(&self, id: MissionId) -> Result<Vec<AuditEntry>, OrchestratorError> {
        if self.load(id).await?.is_none() {
            return Err(OrchestratorError::NotFound(id));
        }
        match self.audit.list(id).await {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(mission_id = %id, error = %e, "Audit read failed; returning empty log");
                Ok(Vec::new())
            }
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn lock_for(&self, id: MissionId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_default().clone()
    }

    /// Forget the lock of a finished mission once nobody else holds it.
    fn release_lock(&self, id: MissionId, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(&id, |_, l| Arc::strong_count(l) == 1);
    }

    async fn load(&self, id: MissionId) -> Result<Option<Mission>, OrchestratorError> {
        match self.bus.hash_get_all(&mission_cache_key(id)).await {
            Ok(fields) if !fields.is_empty() => match Mission::from_cache_fields(&fields) {
                Ok(mission) => return Ok(Some(mission)),
                Err(e) => warn!(mission_id = %id, error = %e, "Discarding undecodable mission cache entry"),
            },
            Ok(_) => {}
            Err(e) => debug!(mission_id = %id, error = %e, "Mission cache read failed; using repository"),
        }

        let found = retry_transient(self.write_backoff, "mission_find", || self.missions.find_by_id(id)).await?;
        if let Some(mission) = &found {
            self.cache_write(mission, "refill").await;
        }
        Ok(found)
    }

    async fn queued_missions(&self) -> Result<Vec<Mission>, OrchestratorError> {
        match retry_transient(self.write_backoff, "mission_list_queued", || {
            self.missions.list_by_state(MissionState::Queued)
        })
        .await
        {
            Ok(missions) => Ok(missions),
            Err(e) => {
                warn!(error = %e, "Queued mission scan degraded to cache");
                metrics::counter!(m::ORCHESTRATOR_ERRORS_TOTAL, "operation" => "assign").increment(1);
                Ok(self
                    .cached_missions()
                    .await?
                    .into_iter()
                    .filter(|m| m.state == MissionState::Queued)
                    .collect())
            }
        }
    }

    async fn cached_missions(&self) -> Result<Vec<Mission>, OrchestratorError> {
        let mut missions = Vec::new();
        for raw in self.bus.set_members(MISSIONS_INDEX).await? {
            let Ok(id) = MissionId::from_string(&raw) else {
                continue;
            };
            let fields = self.bus.hash_get_all(&mission_cache_key(id)).await?;
            if fields.is_empty() {
                continue;
            }
            match Mission::from_cache_fields(&fields) {
                Ok(mission) => missions.push(mission),
                Err(e) => warn!(mission_id = %id, error = %e, "Skipping undecodable cached mission"),
            }
        }
        Ok(missions)
    }

    /// Returns whether the cache now holds the mission.
    async fn cache_write(&self, mission: &Mission, operation: &'static str) -> bool {
        let key = mission.cache_key();
        let result = async {
            self.bus.hash_set(&key, &mission.to_cache_fields()).await?;
            if mission.state.is_terminal() {
                // Finished missions age out of the cache; the repository keeps them.
                self.bus.set_remove(MISSIONS_INDEX, &mission.id.to_string()).await?;
                self.bus.expire(&key, self.cache_retention).await?;
            } else {
                self.bus.set_add(MISSIONS_INDEX, &mission.id.to_string()).await?;
            }
            Ok::<_, BusError>(())
        }
        .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(mission_id = %mission.id, operation, error = %e, "Mission cache write failed");
                metrics::counter!(m::ORCHESTRATOR_ERRORS_TOTAL, "operation" => "cache_write").increment(1);
                false
            }
        }
    }

    /// Durable write. A failure is masked when the cache already holds the
    /// new state, and surfaced otherwise.
    async fn persist(
        &self,
        mission: &Mission,
        cached: bool,
        create: bool,
        operation: &'static str,
    ) -> Result<(), OrchestratorError> {
        let result = retry_transient(self.write_backoff, operation, || async move {
            if create {
                return self.missions.create(mission).await;
            }
            match self.missions.update(mission).await {
                Err(RepositoryError::NotFound(_)) => self.missions.create(mission).await,
                other => other,
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if cached => {
                warn!(mission_id = %mission.id, operation, error = %e, "Mission persist failed; cache holds state");
                metrics::counter!(m::ORCHESTRATOR_ERRORS_TOTAL, "operation" => operation).increment(1);
                Ok(())
            }
            Err(e) => {
                error!(mission_id = %mission.id, operation, error = %e, "Mission persist failed");
                metrics::counter!(m::ORCHESTRATOR_ERRORS_TOTAL, "operation" => operation).increment(1);
                Err(e.into())
            }
        }
    }

    async fn record_audit(&self, entry: AuditEntry) {
        self.audit.record_or_count(&entry).await;
    }

    async fn emit(&self, envelope: MessageEnvelope) {
        if let Err(e) = self.events.publish(MISSION_EVENTS_STREAM, &envelope).await {
            warn!(
                message_type = %envelope.message_type,
                mission_id = envelope.mission_id().unwrap_or_default(),
                error = %e,
                "Failed to emit mission event"
            );
            metrics::counter!(m::ORCHESTRATOR_ERRORS_TOTAL, "operation" => "emit").increment(1);
        }
    }

    async fn record_agent_failure(&self, agent_id: AgentId) {
        let failures = match self
            .bus
            .counter_incr_with_expiry(&agent_failures_key(agent_id), self.breaker.failure_window)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Failed to count agent failure");
                return;
            }
        };
        if failures < self.breaker.failure_threshold {
            return;
        }
        if let Err(e) = self
            .bus
            .set_with_ttl(&circuit_open_key(agent_id), "1", self.breaker.open_for)
            .await
        {
            warn!(agent_id = %agent_id, error = %e, "Failed to open circuit breaker");
            return;
        }
        if failures == self.breaker.failure_threshold {
            warn!(agent_id = %agent_id, failures, "Circuit breaker opened");
            metrics::counter!(m::CIRCUIT_BREAKER_OPENED_TOTAL).increment(1);
        }
    }

    async fn clear_retry_state(&self, id: MissionId) {
        if let Err(e) = self.bus.delete(&retry_counter_key(id)).await {
            warn!(mission_id = %id, error = %e, "Failed to clear retry counter");
        }
        self.clear_retry_entry(id).await;
    }

    async fn clear_retry_entry(&self, id: MissionId) {
        if let Err(e) = self.events.clear_retry(id).await {
            warn!(mission_id = %id, error = %e, "Failed to clear scheduled retry");
        }
    }
}

fn state_payload(mission: &Mission, previous: MissionState) -> serde_json::Map<String, Value> {
    payload([
        ("mission_id", json!(mission.id.to_string())),
        ("state", json!(mission.state.as_str())),
        ("previous_state", json!(previous.as_str())),
        (
            "agent_id",
            mission.agent_id.map(|a| json!(a.to_string())).unwrap_or(Value::Null),
        ),
    ])
}

/// `in_state` is how long the mission sat in `from` since its last write.
fn count_transition(from: Option<MissionState>, to: MissionState, in_state: Option<chrono::Duration>) {
    let from_label = from.map_or("none", |s| s.as_str());
    metrics::counter!(
        m::MISSION_TRANSITIONS_TOTAL,
        "from" => from_label,
        "to" => to.as_str()
    )
    .increment(1);
    if let Some(elapsed) = in_state {
        metrics::histogram!(m::MISSION_STATE_DURATION_SECONDS, "state" => from_label)
            .record(elapsed.num_milliseconds().max(0) as f64 / 1000.0);
    }
}
