// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository traits defined in
//! `crate::domain::repository`.
//!
//! ## PostgreSQL Repositories
//! - **PostgresMissionRepository** - `missions` table
//! - **PostgresAuditRepository** - `audit_log` table (FK to `missions`)
//! - **PostgresAgentRepository** - `agents` table
//!
//! ## In-Memory Repository
//! - **InMemoryRepository** - one shared store implementing all three traits,
//!   used for development and tests. Audit appends for unknown missions fail
//!   with `ForeignKeyViolation` and a second agent with the same `dedup_key`
//!   fails with `UniqueViolation`, like the relational schema.

pub mod postgres_agent;
pub mod postgres_audit;
pub mod postgres_mission;

pub use postgres_agent::PostgresAgentRepository;
pub use postgres_audit::PostgresAuditRepository;
pub use postgres_mission::PostgresMissionRepository;

use crate::domain::agent::{Agent, AgentId, AgentLookup, AgentStatus};
use crate::domain::audit::AuditEntry;
use crate::domain::mission::{Mission, MissionId, MissionState};
use crate::domain::repository::{AgentRepository, AuditRepository, MissionRepository, RepositoryError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Store {
    missions: HashMap<MissionId, Mission>,
    audit: Vec<AuditEntry>,
    agents: HashMap<AgentId, Agent>,
}

#[derive(Clone, Default)]
pub struct InMemoryRepository {
    store: Arc<RwLock<Store>>,
    agent_writes: Arc<AtomicUsize>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of agent create/update calls served so far.
    pub fn agent_write_count(&self) -> usize {
        self.agent_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MissionRepository for InMemoryRepository {
    async fn create(&self, mission: &Mission) -> Result<(), RepositoryError> {
        self.store.write().missions.insert(mission.id, mission.clone());
        Ok(())
    }

    async fn update(&self, mission: &Mission) -> Result<(), RepositoryError> {
        let mut store = self.store.write();
        match store.missions.get_mut(&mission.id) {
            Some(existing) => {
                *existing = mission.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("mission {}", mission.id))),
        }
    }

    async fn find_by_id(&self, id: MissionId) -> Result<Option<Mission>, RepositoryError> {
        Ok(self.store.read().missions.get(&id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Mission>, RepositoryError> {
        let mut missions: Vec<Mission> = self.store.read().missions.values().cloned().collect();
        missions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        missions.truncate(limit);
        Ok(missions)
    }

    async fn list_by_state(&self, state: MissionState) -> Result<Vec<Mission>, RepositoryError> {
        let mut missions: Vec<Mission> = self
            .store
            .read()
            .missions
            .values()
            .filter(|m| m.state == state)
            .cloned()
            .collect();
        missions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(missions)
    }
}

#[async_trait]
impl AuditRepository for InMemoryRepository {
    async fn append(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        let mut store = self.store.write();
        if !store.missions.contains_key(&entry.mission_id) {
            return Err(RepositoryError::ForeignKeyViolation(format!(
                "audit_log.mission_id {} not present in missions",
                entry.mission_id
            )));
        }
        store.audit.push(entry.clone());
        Ok(())
    }

    async fn list_for_mission(&self, mission_id: MissionId) -> Result<Vec<AuditEntry>, RepositoryError> {
        let mut entries: Vec<AuditEntry> = self
            .store
            .read()
            .audit
            .iter()
            .filter(|e| e.mission_id == mission_id)
            .cloned()
            .collect();
        // Stable sort keeps append order for equal timestamps.
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }
}

#[async_trait]
impl AgentRepository for InMemoryRepository {
    async fn find_first_by(&self, lookup: &AgentLookup) -> Result<Option<Agent>, RepositoryError> {
        let store = self.store.read();
        let mut matches: Vec<&Agent> = store.agents.values().filter(|a| lookup.matches(a)).collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matches.first().map(|a| (*a).clone()))
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.store.read().agents.get(&id).cloned())
    }

    async fn create(&self, agent: &Agent) -> Result<(), RepositoryError> {
        self.agent_writes.fetch_add(1, Ordering::SeqCst);
        let mut store = self.store.write();
        if let Some(key) = &agent.dedup_key {
            if store.agents.values().any(|a| a.dedup_key.as_ref() == Some(key)) {
                return Err(RepositoryError::UniqueViolation(format!("agent dedup_key {}", key)));
            }
        }
        store.agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn update(&self, agent: &Agent) -> Result<(), RepositoryError> {
        self.agent_writes.fetch_add(1, Ordering::SeqCst);
        let mut store = self.store.write();
        match store.agents.get_mut(&agent.id) {
            Some(existing) => {
                *existing = agent.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("agent {}", agent.id))),
        }
    }

    async fn list(&self, exclude_offline: bool) -> Result<Vec<Agent>, RepositoryError> {
        let mut agents: Vec<Agent> = self
            .store
            .read()
            .agents
            .values()
            .filter(|a| !exclude_offline || a.status != AgentStatus::Offline)
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentRegistration, AgentRegistrationRequest};
    use crate::domain::audit::{AuditTransition, ACTOR_SYSTEM};
    use crate::domain::mission::MissionRequest;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn mission_at(offset: i64) -> Mission {
        Mission::new(
            MissionId::new(),
            MissionRequest::new("m"),
            Utc::now() + Duration::seconds(offset),
        )
    }

    #[tokio::test]
    async fn test_audit_requires_existing_mission() {
        let repo = InMemoryRepository::new();
        let m = mission_at(0);
        let entry = AuditEntry::new(
            Uuid::new_v4(),
            m.id,
            AuditTransition::Create,
            None,
            Some(MissionState::Queued),
            ACTOR_SYSTEM,
            Utc::now(),
        );
        assert!(matches!(
            repo.append(&entry).await,
            Err(RepositoryError::ForeignKeyViolation(_))
        ));
        MissionRepository::create(&repo, &m).await.unwrap();
        repo.append(&entry).await.unwrap();
        assert_eq!(repo.list_for_mission(m.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_audit_entries_with_equal_timestamps_keep_append_order() {
        let repo = InMemoryRepository::new();
        let m = mission_at(0);
        MissionRepository::create(&repo, &m).await.unwrap();
        let at = Utc::now();
        let transitions = [AuditTransition::Update, AuditTransition::Create, AuditTransition::Approve];
        for transition in transitions {
            let entry = AuditEntry::new(Uuid::new_v4(), m.id, transition, None, None, ACTOR_SYSTEM, at);
            repo.append(&entry).await.unwrap();
        }
        let listed: Vec<_> = repo
            .list_for_mission(m.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.transition)
            .collect();
        assert_eq!(listed, transitions);
    }

    #[tokio::test]
    async fn test_mission_listing_orders() {
        let repo = InMemoryRepository::new();
        let old = mission_at(-10);
        let new = mission_at(0);
        MissionRepository::create(&repo, &new).await.unwrap();
        MissionRepository::create(&repo, &old).await.unwrap();

        let listed = MissionRepository::list(&repo, 10).await.unwrap();
        assert_eq!(listed[0].id, new.id);
        let queued = repo.list_by_state(MissionState::Queued).await.unwrap();
        assert_eq!(queued[0].id, old.id);
        assert_eq!(MissionRepository::list(&repo, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_agent_lookup_and_offline_filter() {
        let repo = InMemoryRepository::new();
        let reg = AgentRegistration::try_from(AgentRegistrationRequest {
            name: "a".into(),
            role: "worker".into(),
            version: "0.1.0".into(),
            ..Default::default()
        })
        .unwrap();
        let mut agent = Agent::register(AgentId::new(), &reg, Utc::now());
        AgentRepository::create(&repo, &agent).await.unwrap();

        let found = repo
            .find_first_by(&AgentLookup::RoleSlot("worker".into()))
            .await
            .unwrap();
        assert_eq!(found.map(|a| a.id), Some(agent.id));
        assert!(repo
            .find_first_by(&AgentLookup::DedupKey("worker".into()))
            .await
            .unwrap()
            .is_none());

        agent.status = AgentStatus::Offline;
        AgentRepository::update(&repo, &agent).await.unwrap();
        assert!(AgentRepository::list(&repo, true).await.unwrap().is_empty());
        assert_eq!(AgentRepository::list(&repo, false).await.unwrap().len(), 1);
        assert_eq!(repo.agent_write_count(), 2);
    }

    #[tokio::test]
    async fn test_agent_dedup_key_is_unique() {
        let repo = InMemoryRepository::new();
        let reg = AgentRegistration::try_from(AgentRegistrationRequest {
            name: "a".into(),
            role: "worker".into(),
            version: "0.1.0".into(),
            dedup_key: Some("K".into()),
            ..Default::default()
        })
        .unwrap();
        AgentRepository::create(&repo, &Agent::register(AgentId::new(), &reg, Utc::now()))
            .await
            .unwrap();
        let second = AgentRepository::create(&repo, &Agent::register(AgentId::new(), &reg, Utc::now())).await;
        assert!(matches!(second, Err(RepositoryError::UniqueViolation(_))));
        assert_eq!(AgentRepository::list(&repo, false).await.unwrap().len(), 1);
    }
}
