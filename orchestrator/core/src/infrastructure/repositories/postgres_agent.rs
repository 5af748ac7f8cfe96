// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Agent Repository
//!
//! `AgentRepository` backed by the `agents` table. Capabilities and topics
//! are stored as JSONB arrays.
//!
//! ```sql
//! CREATE TABLE agents (
//!     id              UUID PRIMARY KEY,
//!     role            TEXT NOT NULL,
//!     dedup_key       TEXT NULL UNIQUE,
//!     name            TEXT NOT NULL,
//!     version         TEXT NOT NULL,
//!     capabilities    JSONB NOT NULL DEFAULT '[]',
//!     topics          JSONB NOT NULL DEFAULT '[]',
//!     health_url      TEXT NULL,
//!     status          TEXT NOT NULL,
//!     last_heartbeat  TIMESTAMPTZ NOT NULL,
//!     created_at      TIMESTAMPTZ NOT NULL
//! );
//! ```

use crate::domain::agent::{Agent, AgentId, AgentLookup, AgentStatus, SemVer};
use crate::domain::repository::{AgentRepository, RepositoryError};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::collections::BTreeSet;

const AGENT_COLUMNS: &str = "id, role, dedup_key, name, version, capabilities, topics, \
                             health_url, status, last_heartbeat, created_at";

pub struct PostgresAgentRepository {
    pool: PgPool,
}

impl PostgresAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_agent(row: &PgRow) -> Result<Agent, RepositoryError> {
        let id: uuid::Uuid = row.try_get("id")?;
        let version: String = row.try_get("version")?;
        let status: String = row.try_get("status")?;
        let capabilities: serde_json::Value = row.try_get("capabilities")?;
        let topics: serde_json::Value = row.try_get("topics")?;

        Ok(Agent {
            id: AgentId(id),
            role: row.try_get("role")?,
            dedup_key: row.try_get("dedup_key")?,
            name: row.try_get("name")?,
            version: version
                .parse::<SemVer>()
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
            capabilities: serde_json::from_value::<BTreeSet<String>>(capabilities)?,
            topics: serde_json::from_value::<BTreeSet<String>>(topics)?,
            health_url: row.try_get("health_url")?,
            status: status
                .parse::<AgentStatus>()
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl AgentRepository for PostgresAgentRepository {
    async fn find_first_by(&self, lookup: &AgentLookup) -> Result<Option<Agent>, RepositoryError> {
        let (filter, value) = match lookup {
            AgentLookup::DedupKey(key) => ("dedup_key = $1", key),
            AgentLookup::RoleSlot(role) => ("dedup_key IS NULL AND lower(role) = $1", role),
        };
        let sql = format!(
            "SELECT {} FROM agents WHERE {} ORDER BY created_at ASC LIMIT 1",
            AGENT_COLUMNS, filter
        );
        let row = sqlx::query(&sql)
            .bind(value.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_agent).transpose()
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM agents WHERE id = $1", AGENT_COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_agent).transpose()
    }

    async fn create(&self, agent: &Agent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO agents (
                id, role, dedup_key, name, version, capabilities, topics,
                health_url, status, last_heartbeat, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(agent.id.0)
        .bind(&agent.role)
        .bind(agent.dedup_key.as_deref())
        .bind(&agent.name)
        .bind(agent.version.to_string())
        .bind(serde_json::to_value(&agent.capabilities)?)
        .bind(serde_json::to_value(&agent.topics)?)
        .bind(agent.health_url.as_deref())
        .bind(agent.status.as_str())
        .bind(agent.last_heartbeat)
        .bind(agent.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, agent: &Agent) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE agents SET
                name = $2,
                version = $3,
                capabilities = $4,
                topics = $5,
                health_url = $6,
                status = $7,
                last_heartbeat = $8
            WHERE id = $1
            "#,
        )
        .bind(agent.id.0)
        .bind(&agent.name)
        .bind(agent.version.to_string())
        .bind(serde_json::to_value(&agent.capabilities)?)
        .bind(serde_json::to_value(&agent.topics)?)
        .bind(agent.health_url.as_deref())
        .bind(agent.status.as_str())
        .bind(agent.last_heartbeat)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("agent {}", agent.id)));
        }
        Ok(())
    }

    async fn list(&self, exclude_offline: bool) -> Result<Vec<Agent>, RepositoryError> {
        let sql = if exclude_offline {
            format!(
                "SELECT {} FROM agents WHERE status <> 'offline' ORDER BY created_at ASC",
                AGENT_COLUMNS
            )
        } else {
            format!("SELECT {} FROM agents ORDER BY created_at ASC", AGENT_COLUMNS)
        };
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_agent).collect()
    }
}
