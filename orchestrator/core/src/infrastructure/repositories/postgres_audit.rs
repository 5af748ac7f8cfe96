// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Audit Repository
//!
//! Append-only `audit_log` table. The foreign key on `mission_id` surfaces as
//! `RepositoryError::ForeignKeyViolation`, which the orchestrator reads as
//! "mission not found".
//!
//! Entries sharing a timestamp come back in insertion order via `seq`.
//!
//! ```sql
//! CREATE TABLE audit_log (
//!     id              UUID PRIMARY KEY,
//!     seq             BIGSERIAL NOT NULL,
//!     mission_id      UUID NOT NULL REFERENCES missions(id),
//!     transition      TEXT NOT NULL,
//!     previous_state  TEXT NULL,
//!     new_state       TEXT NULL,
//!     actor           TEXT NOT NULL,
//!     reason          TEXT NULL,
//!     timestamp       TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX audit_log_mission_ts ON audit_log (mission_id, timestamp, seq);
//! ```

use crate::domain::audit::{AuditEntry, AuditTransition};
use crate::domain::mission::{MissionId, MissionState};
use crate::domain::repository::{AuditRepository, RepositoryError};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

pub struct PostgresAuditRepository {
    pool: PgPool,
}

impl PostgresAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const LIST_FOR_MISSION_SQL: &str = r#"
    SELECT id, mission_id, transition, previous_state, new_state, actor, reason, timestamp
    FROM audit_log
    WHERE mission_id = $1
    ORDER BY timestamp ASC, seq ASC
"#;

fn parse_state(raw: Option<String>) -> Result<Option<MissionState>, RepositoryError> {
    raw.map(|s| {
        s.parse::<MissionState>()
            .map_err(|e| RepositoryError::Serialization(e.to_string()))
    })
    .transpose()
}

#[async_trait]
impl AuditRepository for PostgresAuditRepository {
    async fn append(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, mission_id, transition, previous_state, new_state, actor, reason, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.mission_id.0)
        .bind(entry.transition.as_str())
        .bind(entry.previous_state.map(|s| s.as_str()))
        .bind(entry.new_state.map(|s| s.as_str()))
        .bind(&entry.actor)
        .bind(entry.reason.as_deref())
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_mission(&self, mission_id: MissionId) -> Result<Vec<AuditEntry>, RepositoryError> {
        let rows = sqlx::query(LIST_FOR_MISSION_SQL)
        .bind(mission_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let transition: String = row.try_get("transition")?;
            let mission: uuid::Uuid = row.try_get("mission_id")?;
            entries.push(AuditEntry {
                id: row.try_get("id")?,
                mission_id: MissionId(mission),
                transition: transition
                    .parse::<AuditTransition>()
                    .map_err(RepositoryError::Serialization)?,
                previous_state: parse_state(row.try_get("previous_state")?)?,
                new_state: parse_state(row.try_get("new_state")?)?,
                actor: row.try_get("actor")?,
                reason: row.try_get("reason")?,
                timestamp: row.try_get("timestamp")?,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_breaks_timestamp_ties_by_insertion_order() {
        let order = LIST_FOR_MISSION_SQL
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with("ORDER BY"))
            .unwrap();
        assert_eq!(order, "ORDER BY timestamp ASC, seq ASC");
    }
}
