// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Mission Repository
//!
//! `MissionRepository` backed by the `missions` table:
//!
//! ```sql
//! CREATE TABLE missions (
//!     id          UUID PRIMARY KEY,
//!     title       TEXT NOT NULL,
//!     state       TEXT NOT NULL,
//!     priority    INTEGER NOT NULL,
//!     agent_id    UUID NULL,
//!     payload     JSONB NOT NULL DEFAULT '{}',
//!     approved    BOOLEAN NOT NULL DEFAULT FALSE,
//!     created_at  TIMESTAMPTZ NOT NULL,
//!     updated_at  TIMESTAMPTZ NOT NULL
//! );
//! ```

use crate::domain::agent::AgentId;
use crate::domain::mission::{Mission, MissionId, MissionState};
use crate::domain::repository::{MissionRepository, RepositoryError};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

pub struct PostgresMissionRepository {
    pool: PgPool,
}

impl PostgresMissionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_mission(row: &PgRow) -> Result<Mission, RepositoryError> {
        let id: uuid::Uuid = row.try_get("id")?;
        let state_str: String = row.try_get("state")?;
        let priority: i32 = row.try_get("priority")?;
        let agent_id: Option<uuid::Uuid> = row.try_get("agent_id")?;
        let payload: serde_json::Value = row.try_get("payload")?;

        let state: MissionState = state_str
            .parse()
            .map_err(|e: crate::domain::mission::MissionCodecError| RepositoryError::Serialization(e.to_string()))?;
        let priority = u8::try_from(priority)
            .map_err(|_| RepositoryError::Serialization(format!("priority {} out of range", priority)))?;
        let payload = match payload {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(RepositoryError::Serialization(format!(
                    "mission payload must be an object, got {}",
                    other
                )))
            }
        };

        Ok(Mission {
            id: MissionId(id),
            title: row.try_get("title")?,
            state,
            priority,
            agent_id: agent_id.map(AgentId),
            payload,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            approved: row.try_get("approved")?,
        })
    }
}

#[async_trait]
impl MissionRepository for PostgresMissionRepository {
    async fn create(&self, mission: &Mission) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO missions (
                id, title, state, priority, agent_id, payload, approved, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(mission.id.0)
        .bind(&mission.title)
        .bind(mission.state.as_str())
        .bind(mission.priority as i32)
        .bind(mission.agent_id.map(|a| a.0))
        .bind(serde_json::Value::Object(mission.payload.clone()))
        .bind(mission.approved)
        .bind(mission.created_at)
        .bind(mission.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, mission: &Mission) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE missions SET
                title = $2,
                state = $3,
                priority = $4,
                agent_id = $5,
                payload = $6,
                approved = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(mission.id.0)
        .bind(&mission.title)
        .bind(mission.state.as_str())
        .bind(mission.priority as i32)
        .bind(mission.agent_id.map(|a| a.0))
        .bind(serde_json::Value::Object(mission.payload.clone()))
        .bind(mission.approved)
        .bind(mission.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("mission {}", mission.id)));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: MissionId) -> Result<Option<Mission>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, state, priority, agent_id, payload, approved, created_at, updated_at
            FROM missions
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_mission).transpose()
    }

    async fn list(&self, limit: usize) -> Result<Vec<Mission>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, state, priority, agent_id, payload, approved, created_at, updated_at
            FROM missions
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_mission).collect()
    }

    async fn list_by_state(&self, state: MissionState) -> Result<Vec<Mission>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, state, priority, agent_id, payload, approved, created_at, updated_at
            FROM missions
            WHERE state = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_mission).collect()
    }
}
