// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Registry
//!
//! Owns agent identity and liveness. The repository is the source of truth;
//! the bus holds a per-agent JSON cache (`agent:<id>`) and the last reported
//! load (`agent:<id>:load`), both expiring after the liveness TTL.
//!
//! ## Identity
//!
//! An agent is found again by its `dedup_key` when one is supplied, otherwise
//! by its lowercased role among agents registered without a key. `role` and
//! `dedup_key` never change after creation.
//!
//! ## Versioning on re-registration
//!
//! | Matched by | New version |
//! |------------|-------------|
//! | dedup key | minor + 1, patch = 0 |
//! | role slot | patch + 1 |
//!
//! Every change is broadcast on `agents:watch` as `{event, timestamp, data}`.
//!
//! ## Serialization
//!
//! `register` holds the lock of its lookup slot (`dedup:<key>` or
//! `role:<role>`) for the whole lookup-then-write. Writes to an existing
//! record also hold the lock of its agent id. Slot locks are always taken
//! before agent locks.

use crate::application::metrics as m;
use crate::domain::agent::{
    Agent, AgentId, AgentLookup, AgentRegistration, AgentRegistrationRequest, AgentStatus,
    AgentValidationError,
};
use crate::domain::bus::{Bus, BusError};
use crate::domain::clock::{Clock, IdGenerator};
use crate::domain::errors::ControlPlaneError;
use crate::domain::events::{RegistryChangeEvent, RegistryChangeKind, AGENTS_WATCH_CHANNEL};
use crate::domain::repository::{AgentRepository, RepositoryError};
use crate::infrastructure::event_bus::EventBus;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

pub fn agent_cache_key(id: AgentId) -> String {
    format!("agent:{}", id)
}

pub fn agent_load_key(id: AgentId) -> String {
    format!("agent:{}:load", id)
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] AgentValidationError),

    #[error("dedup_key and role are immutable after creation")]
    ImmutableField,

    #[error("agent repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

impl From<RegistryError> for ControlPlaneError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(e) => ControlPlaneError::Validation(e.to_string()),
            RegistryError::ImmutableField => ControlPlaneError::ImmutableField,
            RegistryError::Repository(RepositoryError::NotFound(what)) => {
                ControlPlaneError::NotFound(what)
            }
            other => ControlPlaneError::Transient(other.to_string()),
        }
    }
}

pub struct AgentRegistry {
    repo: Arc<dyn AgentRepository>,
    bus: Arc<dyn Bus>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    liveness_ttl: Duration,
    locks: KeyedLocks,
}

/// Async mutexes keyed by identity, dropped once nobody holds them.
#[derive(Default)]
struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    async fn lock(&self, key: String) -> KeyGuard<'_> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            owner: self,
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map holds one reference; any other means a waiter.
        self.owner
            .locks
            .remove_if(&self.key, |_, l| Arc::strong_count(l) == 1);
    }
}

fn slot_lock_key(lookup: &AgentLookup) -> String {
    match lookup {
        AgentLookup::DedupKey(key) => format!("dedup:{}", key),
        AgentLookup::RoleSlot(role) => format!("role:{}", role),
    }
}

fn agent_lock_key(id: AgentId) -> String {
    format!("agent:{}", id)
}

impl AgentRegistry {
    pub fn new(
        repo: Arc<dyn AgentRepository>,
        events: EventBus,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        liveness_ttl: Duration,
    ) -> Self {
        Self {
            repo,
            bus: events.bus().clone(),
            events,
            clock,
            ids,
            liveness_ttl,
            locks: KeyedLocks::default(),
        }
    }

    pub fn liveness_ttl(&self) -> Duration {
        self.liveness_ttl
    }

    /// Idempotent upsert. Returns the stored record and whether anything changed.
    pub async fn register(&self, request: AgentRegistrationRequest) -> Result<(Agent, bool), RegistryError> {
        let started = Instant::now();
        let registration = AgentRegistration::try_from(request)?;
        let lookup = AgentLookup::for_registration(&registration);
        let _slot = self.locks.lock(slot_lock_key(&lookup)).await;

        let existing = self
            .repo
            .find_first_by(&lookup)
            .await
            .map_err(|e| write_failed("register", e))?;

        let result = match existing {
            None => match self.create(&registration).await {
                // Another process created the same dedup_key first.
                Err(RegistryError::Repository(RepositoryError::UniqueViolation(_))) => {
                    match self.repo.find_first_by(&lookup).await? {
                        Some(agent) => self.reregister(agent, &registration, &lookup).await?,
                        None => return Err(RepositoryError::NotFound(format!("agent {:?}", lookup)).into()),
                    }
                }
                other => other?,
            },
            Some(agent) => self.reregister(agent, &registration, &lookup).await?,
        };

        metrics::histogram!(m::AGENT_REGISTRY_REGISTER_LATENCY_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(result)
    }

    async fn create(&self, registration: &AgentRegistration) -> Result<(Agent, bool), RegistryError> {
        let agent = Agent::register(AgentId(self.ids.next_id()), registration, self.clock.now());
        self.repo
            .create(&agent)
            .await
            .map_err(|e| write_failed("register", e))?;
        self.cache_put(&agent).await;

        metrics::counter!(m::AGENT_REGISTERED_TOTAL).increment(1);
        info!(agent_id = %agent.id, role = %agent.role, name = %agent.name, "Registered agent");
        self.emit(RegistryChangeKind::Registered, &agent).await;
        Ok((agent, true))
    }

    async fn reregister(
        &self,
        found: Agent,
        registration: &AgentRegistration,
        lookup: &AgentLookup,
    ) -> Result<(Agent, bool), RegistryError> {
        let _agent = self.locks.lock(agent_lock_key(found.id)).await;
        // Re-read under the agent lock so a concurrent heartbeat is not undone.
        let mut agent = self.repo.find_by_id(found.id).await?.unwrap_or(found);
        if agent.role.to_lowercase() != registration.role {
            warn!(
                agent_id = %agent.id,
                stored_role = %agent.role,
                requested_role = %registration.role,
                "Rejected re-registration changing an immutable field"
            );
            return Err(RegistryError::ImmutableField);
        }
        if agent.matches_descriptor(registration) {
            debug!(agent_id = %agent.id, "Re-registration is a no-op");
            return Ok((agent, false));
        }

        let version = match lookup {
            AgentLookup::DedupKey(_) => agent.version.bump_minor(),
            AgentLookup::RoleSlot(_) => agent.version.bump_patch(),
        };
        agent.apply_update(registration, version);
        self.repo
            .update(&agent)
            .await
            .map_err(|e| write_failed("register", e))?;
        self.cache_put(&agent).await;

        metrics::counter!(m::AGENT_UPDATED_TOTAL).increment(1);
        info!(agent_id = %agent.id, version = %agent.version, "Updated agent registration");
        self.emit(RegistryChangeKind::Updated, &agent).await;
        Ok((agent, true))
    }

    /// Refresh liveness. Returns `false` for an unknown agent.
    pub async fn heartbeat(
        &self,
        id: AgentId,
        status: AgentStatus,
        load: Option<f64>,
    ) -> Result<bool, RegistryError> {
        if let Some(load) = load {
            if !load.is_finite() || load < 0.0 {
                return Err(AgentValidationError::InvalidLoad(load).into());
            }
        }
        let _agent = self.locks.lock(agent_lock_key(id)).await;
        let Some(mut agent) = self.get(id).await? else {
            warn!(agent_id = %id, "Heartbeat for unknown agent");
            return Ok(false);
        };

        agent.status = status;
        agent.last_heartbeat = self.clock.now();
        self.repo
            .update(&agent)
            .await
            .map_err(|e| write_failed("heartbeat", e))?;
        self.cache_put(&agent).await;

        if let Some(load) = load {
            if let Err(e) = self
                .bus
                .set_with_ttl(&agent_load_key(id), &load.to_string(), self.liveness_ttl)
                .await
            {
                warn!(agent_id = %id, error = %e, "Failed to record agent load");
            }
        }
        Ok(true)
    }

    /// Cache read-through: a miss or cache failure loads from the repository
    /// and refills the cache.
    pub async fn get(&self, id: AgentId) -> Result<Option<Agent>, RegistryError> {
        match self.bus.get(&agent_cache_key(id)).await {
            Ok(Some(raw)) => match serde_json::from_str::<Agent>(&raw) {
                Ok(agent) => return Ok(Some(agent)),
                Err(e) => warn!(agent_id = %id, error = %e, "Discarding undecodable agent cache entry"),
            },
            Ok(None) => {}
            Err(e) => debug!(agent_id = %id, error = %e, "Agent cache read failed; using repository"),
        }

        let agent = self.repo.find_by_id(id).await?;
        if let Some(agent) = &agent {
            self.cache_put(agent).await;
        }
        Ok(agent)
    }

    /// Straight from the repository; never served from cache.
    pub async fn list(&self, exclude_offline: bool) -> Result<Vec<Agent>, RegistryError> {
        Ok(self.repo.list(exclude_offline).await?)
    }

    /// Mark an agent offline. Returns `false` for an unknown agent.
    pub async fn deregister(&self, id: AgentId) -> Result<bool, RegistryError> {
        let _agent = self.locks.lock(agent_lock_key(id)).await;
        let Some(mut agent) = self.repo.find_by_id(id).await? else {
            return Ok(false);
        };
        agent.status = AgentStatus::Offline;
        self.repo
            .update(&agent)
            .await
            .map_err(|e| write_failed("deregister", e))?;
        self.evict(id).await;

        metrics::counter!(m::AGENT_DEREGISTERED_TOTAL).increment(1);
        info!(agent_id = %id, "Deregistered agent");
        self.emit(RegistryChangeKind::Deregistered, &agent).await;
        Ok(true)
    }

    /// Force every silent agent offline. Returns how many were timed out.
    pub async fn sweep(&self) -> Result<usize, RegistryError> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.liveness_ttl).unwrap_or(chrono::Duration::MAX);
        let mut timed_out = 0;

        for listed in self.repo.list(true).await? {
            if !listed.is_stale(now, ttl) {
                continue;
            }
            let _agent = self.locks.lock(agent_lock_key(listed.id)).await;
            // A heartbeat may have landed since the listing.
            let mut agent = match self.repo.find_by_id(listed.id).await {
                Ok(Some(agent)) if agent.status != AgentStatus::Offline && agent.is_stale(now, ttl) => agent,
                Ok(_) => continue,
                Err(e) => {
                    write_failed("sweep", e);
                    continue;
                }
            };
            let age = agent.heartbeat_age(now).num_seconds();
            agent.status = AgentStatus::Offline;
            if let Err(e) = self.repo.update(&agent).await {
                write_failed("sweep", e);
                continue;
            }
            self.evict(agent.id).await;
            timed_out += 1;

            metrics::counter!(m::AGENT_TIMEOUT_TOTAL).increment(1);
            info!(agent_id = %agent.id, age_seconds = age, "Agent liveness timeout");
            self.emit(RegistryChangeKind::Timeout, &agent).await;
        }
        Ok(timed_out)
    }

    /// Decoded change events from the `agents:watch` channel.
    pub async fn watch(&self) -> Result<BoxStream<'static, RegistryChangeEvent>, RegistryError> {
        let raw = self.bus.subscribe_channel(AGENTS_WATCH_CHANNEL).await?;
        Ok(raw
            .filter_map(|msg| async move {
                match serde_json::from_str::<RegistryChangeEvent>(&msg) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed registry change event");
                        None
                    }
                }
            })
            .boxed())
    }

    async fn cache_put(&self, agent: &Agent) {
        let raw = match serde_json::to_string(agent) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "Failed to encode agent for cache");
                return;
            }
        };
        if let Err(e) = self
            .bus
            .set_with_ttl(&agent_cache_key(agent.id), &raw, self.liveness_ttl)
            .await
        {
            warn!(agent_id = %agent.id, error = %e, "Failed to refresh agent cache");
        }
    }

    async fn evict(&self, id: AgentId) {
        for key in [agent_cache_key(id), agent_load_key(id)] {
            if let Err(e) = self.bus.delete(&key).await {
                warn!(agent_id = %id, key = %key, error = %e, "Failed to evict agent cache key");
            }
        }
    }

    async fn emit(&self, kind: RegistryChangeKind, agent: &Agent) {
        let data = match serde_json::to_value(agent) {
            Ok(data) => data,
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "Failed to encode registry change");
                return;
            }
        };
        let event = RegistryChangeEvent::new(kind, self.clock.now(), data);
        if let Err(e) = self.events.broadcast(AGENTS_WATCH_CHANNEL, &event).await {
            warn!(agent_id = %agent.id, event = kind.as_str(), error = %e, "Failed to broadcast registry change");
        }
    }
}

fn write_failed(operation: &'static str, err: RepositoryError) -> RegistryError {
    metrics::counter!(m::AGENT_REGISTRY_ERRORS_TOTAL, "operation" => operation).increment(1);
    warn!(operation, error = %err, "Agent registry write failed");
    RegistryError::Repository(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::{FixedRandom, ManualClock, SequentialIds};
    use crate::domain::config::MissionControlConfig;
    use crate::infrastructure::event_bus::TopicAcl;
    use crate::infrastructure::memory_bus::InMemoryBus;
    use crate::infrastructure::repositories::InMemoryRepository;

    struct Fixture {
        clock: Arc<ManualClock>,
        bus: Arc<InMemoryBus>,
        repo: InMemoryRepository,
        registry: AgentRegistry,
    }

    fn fixture() -> Fixture {
        let repo = InMemoryRepository::new();
        fixture_over(repo.clone(), Arc::new(repo))
    }

    fn fixture_over(repo: InMemoryRepository, store: Arc<dyn AgentRepository>) -> Fixture {
        let clock = Arc::new(ManualClock::at_epoch());
        let bus = Arc::new(InMemoryBus::new(clock.clone()));
        let ids = Arc::new(SequentialIds::new());
        let events = EventBus::new(
            bus.clone(),
            clock.clone(),
            ids.clone(),
            Arc::new(FixedRandom::midpoint()),
            TopicAcl::new(MissionControlConfig::default().acl),
            Duration::from_secs(3600),
        );
        let registry = AgentRegistry::new(
            store,
            events,
            clock.clone(),
            ids,
            Duration::from_secs(60),
        );
        Fixture {
            clock,
            bus,
            repo,
            registry,
        }
    }

    /// Yields inside `find_first_by` like a real database round trip. With
    /// `hide_first` set, the first lookup misses as if another process
    /// created the record right after it. A frozen `listing` replaces
    /// `list` results.
    struct SlowLookupRepo {
        inner: InMemoryRepository,
        hide_first: std::sync::atomic::AtomicBool,
        listing: parking_lot::Mutex<Option<Vec<Agent>>>,
    }

    impl SlowLookupRepo {
        fn new(inner: InMemoryRepository, hide_first: bool) -> Self {
            Self {
                inner,
                hide_first: std::sync::atomic::AtomicBool::new(hide_first),
                listing: parking_lot::Mutex::new(None),
            }
        }
    }

    #[async_trait::async_trait]
    impl AgentRepository for SlowLookupRepo {
        async fn find_first_by(&self, lookup: &AgentLookup) -> Result<Option<Agent>, RepositoryError> {
            tokio::task::yield_now().await;
            if self.hide_first.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.find_first_by(lookup).await
        }

        async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn create(&self, agent: &Agent) -> Result<(), RepositoryError> {
            tokio::task::yield_now().await;
            AgentRepository::create(&self.inner, agent).await
        }

        async fn update(&self, agent: &Agent) -> Result<(), RepositoryError> {
            AgentRepository::update(&self.inner, agent).await
        }

        async fn list(&self, exclude_offline: bool) -> Result<Vec<Agent>, RepositoryError> {
            if let Some(frozen) = self.listing.lock().clone() {
                return Ok(frozen);
            }
            AgentRepository::list(&self.inner, exclude_offline).await
        }
    }

    fn request(role: &str, dedup_key: Option<&str>) -> AgentRegistrationRequest {
        AgentRegistrationRequest {
            name: "Idem Agent".to_string(),
            role: role.to_string(),
            version: "0.1.0".to_string(),
            capabilities: vec!["compute".to_string()],
            topics: vec!["agent.events".to_string()],
            health_url: Some("http://localhost:5001/health".to_string()),
            dedup_key: dedup_key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_noop() {
        let f = fixture();
        let (first, changed) = f.registry.register(request("worker", Some("K"))).await.unwrap();
        assert!(changed);
        let (second, changed) = f.registry.register(request("worker", Some("K"))).await.unwrap();
        assert!(!changed);
        assert_eq!(first, second);
        assert_eq!(f.repo.agent_write_count(), 1);
    }

    #[tokio::test]
    async fn test_dedup_match_bumps_minor() {
        let f = fixture();
        f.registry.register(request("worker", Some("K"))).await.unwrap();
        let mut changed_req = request("worker", Some("K"));
        changed_req.capabilities.push("gpu".to_string());
        let (agent, changed) = f.registry.register(changed_req).await.unwrap();
        assert!(changed);
        assert_eq!(agent.version.to_string(), "0.2.0");
        assert!(agent.capabilities.contains("gpu"));
    }

    #[tokio::test]
    async fn test_role_slot_match_bumps_patch() {
        let f = fixture();
        let (a, _) = f.registry.register(request("worker", None)).await.unwrap();
        let mut renamed = request("WORKER", None);
        renamed.name = "Renamed".to_string();
        let (b, changed) = f.registry.register(renamed).await.unwrap();
        assert!(changed);
        assert_eq!(a.id, b.id);
        assert_eq!(b.version.to_string(), "0.1.1");
    }

    #[tokio::test]
    async fn test_role_change_is_rejected_without_write() {
        let f = fixture();
        f.registry.register(request("worker", Some("K2"))).await.unwrap();
        let err = f.registry.register(request("architect", Some("K2"))).await.unwrap_err();
        assert!(matches!(err, RegistryError::ImmutableField));
        assert_eq!(
            ControlPlaneError::from(err).to_payload()["message"],
            "dedup_key and role are immutable after creation"
        );
        assert_eq!(f.repo.agent_write_count(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_records_load_and_rejects_unknown() {
        let f = fixture();
        let (agent, _) = f.registry.register(request("worker", None)).await.unwrap();
        f.clock.advance(chrono::Duration::seconds(10));
        assert!(f.registry.heartbeat(agent.id, AgentStatus::Busy, Some(0.4)).await.unwrap());
        let stored = f.registry.get(agent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Busy);
        assert_eq!(stored.last_heartbeat, f.clock.now());
        assert_eq!(f.bus.get(&agent_load_key(agent.id)).await.unwrap().as_deref(), Some("0.4"));

        assert!(!f.registry.heartbeat(AgentId::new(), AgentStatus::Active, None).await.unwrap());
        assert!(f.registry.heartbeat(agent.id, AgentStatus::Active, Some(f64::NAN)).await.is_err());
    }

    #[tokio::test]
    async fn test_get_refills_cache_after_miss() {
        let f = fixture();
        let (agent, _) = f.registry.register(request("worker", None)).await.unwrap();
        f.bus.delete(&agent_cache_key(agent.id)).await.unwrap();

        let loaded = f.registry.get(agent.id).await.unwrap().unwrap();
        assert_eq!(loaded, agent);
        let cached: Agent =
            serde_json::from_str(&f.bus.get(&agent_cache_key(agent.id)).await.unwrap().unwrap()).unwrap();
        assert_eq!(cached, agent);
    }

    #[tokio::test]
    async fn test_get_degrades_to_repository_when_bus_down() {
        let f = fixture();
        let (agent, _) = f.registry.register(request("worker", None)).await.unwrap();
        f.bus.set_unavailable(true);
        assert_eq!(f.registry.get(agent.id).await.unwrap().map(|a| a.id), Some(agent.id));
    }

    #[tokio::test]
    async fn test_deregister_keeps_record_offline() {
        let f = fixture();
        let (agent, _) = f.registry.register(request("worker", None)).await.unwrap();
        assert!(f.registry.deregister(agent.id).await.unwrap());
        assert_eq!(f.registry.get(agent.id).await.unwrap().unwrap().status, AgentStatus::Offline);
        assert!(f.registry.list(true).await.unwrap().is_empty());
        assert!(!f.registry.deregister(AgentId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_times_out_silent_agents() {
        let f = fixture();
        let (stale, _) = f.registry.register(request("worker", None)).await.unwrap();
        f.clock.advance(chrono::Duration::seconds(61));
        let (fresh, _) = f.registry.register(request("qa", None)).await.unwrap();

        let mut watch = f.registry.watch().await.unwrap();
        assert_eq!(f.registry.sweep().await.unwrap(), 1);

        let event = watch.next().await.unwrap();
        assert_eq!(event.event, RegistryChangeKind::Timeout);
        assert_eq!(event.data["id"], serde_json::json!(stale.id.to_string()));
        assert_eq!(f.registry.get(stale.id).await.unwrap().unwrap().status, AgentStatus::Offline);
        assert_eq!(f.registry.get(fresh.id).await.unwrap().unwrap().status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn test_sweep_boundary_is_exclusive() {
        let f = fixture();
        let (agent, _) = f.registry.register(request("worker", None)).await.unwrap();
        f.clock.advance(chrono::Duration::seconds(60));
        assert_eq!(f.registry.sweep().await.unwrap(), 0);
        f.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(f.registry.sweep().await.unwrap(), 1);
        assert_eq!(f.registry.get(agent.id).await.unwrap().unwrap().status, AgentStatus::Offline);
    }

    #[tokio::test]
    async fn test_concurrent_registration_creates_one_record() {
        let repo = InMemoryRepository::new();
        let f = fixture_over(repo.clone(), Arc::new(SlowLookupRepo::new(repo.clone(), false)));

        let (a, b) = tokio::join!(
            f.registry.register(request("worker", Some("K9"))),
            f.registry.register(request("worker", Some("K9")))
        );
        let (a, a_changed) = a.unwrap();
        let (b, b_changed) = b.unwrap();
        assert_eq!(a.id, b.id);
        assert!(a_changed ^ b_changed);

        let (c, d) = tokio::join!(
            f.registry.register(request("qa", None)),
            f.registry.register(request("QA", None))
        );
        assert_eq!(c.unwrap().0.id, d.unwrap().0.id);

        assert_eq!(AgentRepository::list(&repo, false).await.unwrap().len(), 2);
        assert_eq!(f.registry.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_unique_violation_on_create_falls_back_to_existing() {
        let repo = InMemoryRepository::new();
        let plain = fixture_over(repo.clone(), Arc::new(repo.clone()));
        let (existing, _) = plain.registry.register(request("worker", Some("K7"))).await.unwrap();

        let racing = fixture_over(repo.clone(), Arc::new(SlowLookupRepo::new(repo.clone(), true)));
        let (agent, changed) = racing.registry.register(request("worker", Some("K7"))).await.unwrap();
        assert_eq!(agent.id, existing.id);
        assert!(!changed);
        assert_eq!(AgentRepository::list(&repo, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_skips_agent_that_heartbeated_after_listing() {
        let repo = InMemoryRepository::new();
        let slow = Arc::new(SlowLookupRepo::new(repo.clone(), false));
        let f = fixture_over(repo.clone(), slow.clone());
        let (agent, _) = f.registry.register(request("worker", None)).await.unwrap();
        f.clock.advance(chrono::Duration::seconds(61));

        // The sweep lists the silent agent, then a heartbeat lands.
        *slow.listing.lock() = Some(AgentRepository::list(&repo, true).await.unwrap());
        let mut fresh = AgentRepository::find_by_id(&f.repo, agent.id).await.unwrap().unwrap();
        fresh.last_heartbeat = f.clock.now();
        AgentRepository::update(&f.repo, &fresh).await.unwrap();

        assert_eq!(f.registry.sweep().await.unwrap(), 0);
        assert_eq!(f.registry.get(agent.id).await.unwrap().unwrap().status, AgentStatus::Active);
    }
}
