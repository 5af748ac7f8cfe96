// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Mission Aggregate
//!
//! A unit of work with a lifecycle owned exclusively by the orchestrator.
//!
//! ## State Machine
//! | From | Via | To |
//! |------|-----|----|
//! | (new) | submit | `queued` |
//! | `queued` | assign | `assigned` |
//! | `assigned` | start | `executing` |
//! | `executing` | verify | `verifying` |
//! | `executing` / `verifying` | complete | `completed` |
//! | any non-terminal | fail | `failed` |
//! | `failed` | retry dispatcher | `queued` |
//!
//! The mission cache is a flat string hash; [`Mission::to_cache_fields`] and
//! [`Mission::from_cache_fields`] define that wire format.

use crate::domain::agent::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MissionId(pub Uuid);

impl MissionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for MissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionState {
    Queued,
    Assigned,
    Executing,
    Verifying,
    Completed,
    Failed,
    Escalated,
    Deferred,
}

impl MissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionState::Queued => "queued",
            MissionState::Assigned => "assigned",
            MissionState::Executing => "executing",
            MissionState::Verifying => "verifying",
            MissionState::Completed => "completed",
            MissionState::Failed => "failed",
            MissionState::Escalated => "escalated",
            MissionState::Deferred => "deferred",
        }
    }

    /// `failed` is only terminal once the retry budget is gone, which the
    /// state itself cannot know; it is not listed here.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionState::Completed | MissionState::Escalated)
    }

    /// Edges reachable through the orchestrator's explicit transitions
    /// (`start`, `verify`, `complete`, `fail`). Assignment and retry edges are
    /// driven by their own operations.
    pub fn can_transition_to(&self, to: MissionState) -> bool {
        use MissionState::*;
        match (self, to) {
            (Assigned, Executing) => true,
            (Executing, Verifying) => true,
            (Executing, Completed) | (Verifying, Completed) => true,
            (from, Failed) => !from.is_terminal() && *from != Failed,
            _ => false,
        }
    }

    /// Message type emitted on the mission stream when entering this state.
    pub fn event_type(&self) -> String {
        format!("mission.{}", self.as_str())
    }
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissionState {
    type Err = MissionCodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(MissionState::Queued),
            "assigned" => Ok(MissionState::Assigned),
            "executing" => Ok(MissionState::Executing),
            "verifying" => Ok(MissionState::Verifying),
            "completed" => Ok(MissionState::Completed),
            "failed" => Ok(MissionState::Failed),
            "escalated" => Ok(MissionState::Escalated),
            "deferred" => Ok(MissionState::Deferred),
            other => Err(MissionCodecError::UnknownState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: MissionId,
    pub title: String,
    pub state: MissionState,
    pub priority: u8,
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub approved: bool,
}

impl Mission {
    pub fn new(id: MissionId, request: MissionRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: request.title,
            state: MissionState::Queued,
            priority: request.priority,
            agent_id: None,
            payload: request.payload,
            created_at: now,
            updated_at: now,
            approved: false,
        }
    }

    /// `payload.requirements.capabilities`, empty when not declared.
    pub fn required_capabilities(&self) -> Result<Vec<String>, MissionValidationError> {
        required_capabilities(&self.payload)
    }

    pub fn cache_key(&self) -> String {
        mission_cache_key(self.id)
    }

    pub fn to_cache_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("id".to_string(), self.id.to_string()),
            ("title".to_string(), self.title.clone()),
            ("state".to_string(), self.state.as_str().to_string()),
            ("priority".to_string(), self.priority.to_string()),
            (
                "agent_id".to_string(),
                self.agent_id.map(|a| a.to_string()).unwrap_or_default(),
            ),
            (
                "payload".to_string(),
                Value::Object(self.payload.clone()).to_string(),
            ),
            ("created_at".to_string(), self.created_at.to_rfc3339()),
            ("updated_at".to_string(), self.updated_at.to_rfc3339()),
        ];
        if self.approved {
            fields.push(("approved".to_string(), "1".to_string()));
        }
        fields
    }

    pub fn from_cache_fields(fields: &HashMap<String, String>) -> Result<Self, MissionCodecError> {
        let get = |name: &'static str| {
            fields
                .get(name)
                .ok_or(MissionCodecError::MissingField(name))
        };
        let parse_time = |name: &'static str| -> Result<DateTime<Utc>, MissionCodecError> {
            let raw = get(name)?;
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| MissionCodecError::InvalidField(name, raw.clone()))
        };

        let id_raw = get("id")?;
        let id = MissionId::from_string(id_raw)
            .map_err(|_| MissionCodecError::InvalidField("id", id_raw.clone()))?;
        let priority_raw = get("priority")?;
        let priority = priority_raw
            .parse::<u8>()
            .map_err(|_| MissionCodecError::InvalidField("priority", priority_raw.clone()))?;
        let agent_id = match fields.get("agent_id").map(String::as_str) {
            None | Some("") => None,
            Some(raw) => Some(
                AgentId::from_string(raw)
                    .map_err(|_| MissionCodecError::InvalidField("agent_id", raw.to_string()))?,
            ),
        };
        let payload = match fields.get("payload").map(String::as_str) {
            None | Some("") => Map::new(),
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                _ => return Err(MissionCodecError::InvalidField("payload", raw.to_string())),
            },
        };

        Ok(Self {
            id,
            title: get("title")?.clone(),
            state: get("state")?.parse()?,
            priority,
            agent_id,
            payload,
            created_at: parse_time("created_at")?,
            updated_at: parse_time("updated_at")?,
            approved: fields.get("approved").map(|v| v == "1").unwrap_or(false),
        })
    }
}

pub fn mission_cache_key(id: MissionId) -> String {
    format!("mission:{}", id)
}

pub fn required_capabilities(payload: &Map<String, Value>) -> Result<Vec<String>, MissionValidationError> {
    let Some(requirements) = payload.get("requirements") else {
        return Ok(Vec::new());
    };
    let Some(caps) = requirements.get("capabilities") else {
        return Ok(Vec::new());
    };
    match caps {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                _ => Err(MissionValidationError::InvalidCapabilities),
            })
            .filter(|c| !matches!(c, Ok(s) if s.is_empty()))
            .collect(),
        _ => Err(MissionValidationError::InvalidCapabilities),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionRequest {
    pub title: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

fn default_priority() -> u8 {
    50
}

impl MissionRequest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            priority: default_priority(),
            payload: Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        if let Value::Object(map) = payload {
            self.payload = map;
        }
        self
    }

    pub fn validate(&self) -> Result<(), MissionValidationError> {
        if self.title.trim().is_empty() {
            return Err(MissionValidationError::EmptyTitle);
        }
        if self.priority > 100 {
            return Err(MissionValidationError::PriorityOutOfRange(self.priority));
        }
        required_capabilities(&self.payload)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MissionValidationError {
    #[error("mission title must not be empty")]
    EmptyTitle,

    #[error("priority {0} is outside 0..=100")]
    PriorityOutOfRange(u8),

    #[error("payload.requirements.capabilities must be a list of strings")]
    InvalidCapabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MissionCodecError {
    #[error("cache record is missing field '{0}'")]
    MissingField(&'static str),

    #[error("cache field '{0}' has invalid value '{1}'")]
    InvalidField(&'static str, String),

    #[error("unknown mission state '{0}'")]
    UnknownState(String),
}
