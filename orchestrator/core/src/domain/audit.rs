// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Append-only audit records for mission state changes.

use crate::domain::mission::{MissionId, MissionState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditTransition {
    Create,
    Assign,
    Update,
    Approve,
    Report,
    Retry,
    Dlq,
}

impl AuditTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditTransition::Create => "create",
            AuditTransition::Assign => "assign",
            AuditTransition::Update => "update",
            AuditTransition::Approve => "approve",
            AuditTransition::Report => "report",
            AuditTransition::Retry => "retry",
            AuditTransition::Dlq => "dlq",
        }
    }
}

impl fmt::Display for AuditTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditTransition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditTransition::Create),
            "assign" => Ok(AuditTransition::Assign),
            "update" => Ok(AuditTransition::Update),
            "approve" => Ok(AuditTransition::Approve),
            "report" => Ok(AuditTransition::Report),
            "retry" => Ok(AuditTransition::Retry),
            "dlq" => Ok(AuditTransition::Dlq),
            other => Err(format!("unknown audit transition '{}'", other)),
        }
    }
}

pub const ACTOR_SYSTEM: &str = "system";
pub const ACTOR_ORCHESTRATOR: &str = "orchestrator";
pub const ACTOR_MANAGER: &str = "manager";
pub const ACTOR_DLQ: &str = "dlq";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub mission_id: MissionId,
    pub transition: AuditTransition,
    pub previous_state: Option<MissionState>,
    pub new_state: Option<MissionState>,
    /// `system`, `orchestrator`, `manager`, `dlq` or an agent id.
    pub actor: String,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        id: Uuid,
        mission_id: MissionId,
        transition: AuditTransition,
        previous_state: Option<MissionState>,
        new_state: Option<MissionState>,
        actor: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            mission_id,
            transition,
            previous_state,
            new_state,
            actor: actor.into(),
            reason: None,
            timestamp,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
