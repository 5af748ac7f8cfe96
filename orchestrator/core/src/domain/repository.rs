// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root: one repository per
//! aggregate, interface defined in the domain layer, implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `MissionRepository` | `Mission` | `InMemoryRepository`, `PostgresMissionRepository` |
//! | `AuditRepository` | `AuditEntry` | `InMemoryRepository`, `PostgresAuditRepository` |
//! | `AgentRepository` | `Agent` | `InMemoryRepository`, `PostgresAgentRepository` |
//!
//! ## Storage Backend Abstraction
//!
//! Concrete implementations are selected at startup from the `storage`
//! section of the configuration. In-memory implementations are used for
//! development and testing; PostgreSQL for production.

use crate::domain::agent::{Agent, AgentId, AgentLookup};
use crate::domain::audit::AuditEntry;
use crate::domain::mission::{Mission, MissionId, MissionState};
use async_trait::async_trait;

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

#[async_trait]
pub trait MissionRepository: Send + Sync {
    async fn create(&self, mission: &Mission) -> Result<(), RepositoryError>;

    /// Overwrite an existing mission. `NotFound` if it was never created.
    async fn update(&self, mission: &Mission) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: MissionId) -> Result<Option<Mission>, RepositoryError>;

    /// Most recently created first.
    async fn list(&self, limit: usize) -> Result<Vec<Mission>, RepositoryError>;

    /// Oldest first.
    async fn list_by_state(&self, state: MissionState) -> Result<Vec<Mission>, RepositoryError>;
}

/// Append-only log of mission transitions.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// `ForeignKeyViolation` when the mission does not exist.
    async fn append(&self, entry: &AuditEntry) -> Result<(), RepositoryError>;

    /// Entries for one mission in timestamp order.
    async fn list_for_mission(&self, mission_id: MissionId) -> Result<Vec<AuditEntry>, RepositoryError>;
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn find_first_by(&self, lookup: &AgentLookup) -> Result<Option<Agent>, RepositoryError>;

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError>;

    async fn create(&self, agent: &Agent) -> Result<(), RepositoryError>;

    async fn update(&self, agent: &Agent) -> Result<(), RepositoryError>;

    /// Ordered by creation time.
    async fn list(&self, exclude_offline: bool) -> Result<Vec<Agent>, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Database(_))
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                RepositoryError::ForeignKeyViolation(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::UniqueViolation(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
