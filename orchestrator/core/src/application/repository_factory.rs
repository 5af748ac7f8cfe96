// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Builds the mission, audit and agent repositories for the configured
//! storage backend. The domain layer only defines the traits; this is the
//! one place that picks concrete infrastructure types.

use std::sync::Arc;

use crate::domain::repository::{
    AgentRepository, AuditRepository, MissionRepository, RepositoryError, StorageBackend,
};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{
    InMemoryRepository, PostgresAgentRepository, PostgresAuditRepository,
    PostgresMissionRepository,
};

/// The three stores the control plane persists through.
#[derive(Clone)]
pub struct Repositories {
    pub missions: Arc<dyn MissionRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub agents: Arc<dyn AgentRepository>,
}

impl Repositories {
    /// One shared in-memory store backing all three traits.
    pub fn in_memory() -> Self {
        let store = InMemoryRepository::new();
        Self {
            missions: Arc::new(store.clone()),
            audit: Arc::new(store.clone()),
            agents: Arc::new(store),
        }
    }

    pub fn postgres(db: &Database) -> Self {
        let pool = db.get_pool().clone();
        Self {
            missions: Arc::new(PostgresMissionRepository::new(pool.clone())),
            audit: Arc::new(PostgresAuditRepository::new(pool.clone())),
            agents: Arc::new(PostgresAgentRepository::new(pool)),
        }
    }
}

/// Creates the repositories for `backend`, connecting the pool if needed.
pub async fn create_repositories(backend: &StorageBackend) -> Result<Repositories, RepositoryError> {
    match backend {
        StorageBackend::InMemory => Ok(Repositories::in_memory()),
        StorageBackend::PostgreSQL(config) => {
            let db = Database::connect(config).await?;
            tracing::info!(
                max_connections = config.max_connections,
                "Connected PostgreSQL repositories"
            );
            Ok(Repositories::postgres(&db))
        }
    }
}
