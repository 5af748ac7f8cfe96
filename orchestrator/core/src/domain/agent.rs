// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Aggregate
//!
//! A registered worker process. Identity is `dedup_key` when the worker
//! supplies one, otherwise the lowercased `role` acts as the identity slot.
//! `role` and `dedup_key` never change after the first registration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Busy,
    Error,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
            AgentStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = AgentValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(AgentStatus::Active),
            "busy" => Ok(AgentStatus::Busy),
            "error" => Ok(AgentStatus::Error),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(AgentValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// `major.minor.patch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    pub fn bump_minor(self) -> Self {
        Self::new(self.major, self.minor + 1, 0)
    }

    pub fn bump_patch(self) -> Self {
        Self::new(self.major, self.minor, self.patch + 1)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemVer {
    type Err = AgentValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(AgentValidationError::InvalidVersion(s.to_string()));
        }
        let parse = |p: &str| {
            p.parse::<u64>()
                .map_err(|_| AgentValidationError::InvalidVersion(s.to_string()))
        };
        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

impl TryFrom<String> for SemVer {
    type Error = AgentValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SemVer> for String {
    fn from(v: SemVer) -> Self {
        v.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentValidationError {
    #[error("invalid semantic version '{0}' (expected major.minor.patch)")]
    InvalidVersion(String),

    #[error("unknown agent status '{0}'")]
    UnknownStatus(String),

    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("load must be a finite number, got {0}")]
    InvalidLoad(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    pub name: String,
    pub version: SemVer,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub topics: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_url: Option<String>,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Build a fresh record from a validated registration.
    pub fn register(id: AgentId, registration: &AgentRegistration, now: DateTime<Utc>) -> Self {
        Self {
            id,
            role: registration.role.clone(),
            dedup_key: registration.dedup_key.clone(),
            name: registration.name.clone(),
            version: registration.version,
            capabilities: registration.capabilities.clone(),
            topics: registration.topics.clone(),
            health_url: registration.health_url.clone(),
            status: AgentStatus::Active,
            last_heartbeat: now,
            created_at: now,
        }
    }

    /// True when every descriptor field already equals the registration.
    pub fn matches_descriptor(&self, registration: &AgentRegistration) -> bool {
        self.name == registration.name
            && self.role == registration.role
            && self.version == registration.version
            && self.capabilities == registration.capabilities
            && self.topics == registration.topics
            && self.health_url == registration.health_url
    }

    /// Copy mutable descriptor fields over and set the bumped version.
    pub fn apply_update(&mut self, registration: &AgentRegistration, version: SemVer) {
        self.name = registration.name.clone();
        self.version = version;
        self.capabilities = registration.capabilities.clone();
        self.topics = registration.topics.clone();
        self.health_url = registration.health_url.clone();
    }

    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_heartbeat
    }

    /// Non-offline and silent for longer than `ttl`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.status != AgentStatus::Offline && self.heartbeat_age(now) > ttl
    }

    pub fn has_capabilities<'a, I>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        required.into_iter().all(|c| self.capabilities.contains(c))
    }
}

/// Registration payload as received from the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistrationRequest {
    pub name: String,
    pub role: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub health_url: Option<String>,
    #[serde(default)]
    pub dedup_key: Option<String>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl Default for AgentRegistrationRequest {
    fn default() -> Self {
        Self {
            name: String::new(),
            role: String::new(),
            version: default_version(),
            capabilities: Vec::new(),
            topics: Vec::new(),
            health_url: None,
            dedup_key: None,
        }
    }
}

/// Validated, normalized registration (role lowercased, sets deduplicated).
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRegistration {
    pub name: String,
    pub role: String,
    pub version: SemVer,
    pub capabilities: BTreeSet<String>,
    pub topics: BTreeSet<String>,
    pub health_url: Option<String>,
    pub dedup_key: Option<String>,
}

impl TryFrom<AgentRegistrationRequest> for AgentRegistration {
    type Error = AgentValidationError;

    fn try_from(req: AgentRegistrationRequest) -> Result<Self, Self::Error> {
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(AgentValidationError::EmptyField("name"));
        }
        let role = normalize_role(&req.role);
        if role.is_empty() {
            return Err(AgentValidationError::EmptyField("role"));
        }
        let dedup_key = req
            .dedup_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Ok(Self {
            name,
            role,
            version: req.version.parse()?,
            capabilities: req.capabilities.into_iter().collect(),
            topics: req.topics.into_iter().collect(),
            health_url: req.health_url.filter(|u| !u.trim().is_empty()),
            dedup_key,
        })
    }
}

pub fn normalize_role(role: &str) -> String {
    role.trim().to_lowercase()
}

/// Identity slot used to find an existing registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentLookup {
    DedupKey(String),
    /// Agents registered without a dedup key, by lowercased role.
    RoleSlot(String),
}

impl AgentLookup {
    pub fn for_registration(registration: &AgentRegistration) -> Self {
        match &registration.dedup_key {
            Some(key) => AgentLookup::DedupKey(key.clone()),
            None => AgentLookup::RoleSlot(registration.role.clone()),
        }
    }

    pub fn matches(&self, agent: &Agent) -> bool {
        match self {
            AgentLookup::DedupKey(key) => agent.dedup_key.as_deref() == Some(key.as_str()),
            AgentLookup::RoleSlot(role) => agent.dedup_key.is_none() && &agent.role == role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AgentRegistrationRequest {
        AgentRegistrationRequest {
            name: "Idem Agent".to_string(),
            role: " Worker ".to_string(),
            version: "0.1.0".to_string(),
            capabilities: vec!["compute".to_string(), "compute".to_string()],
            topics: vec!["agent.events".to_string()],
            health_url: Some("http://localhost:5001/health".to_string()),
            dedup_key: Some("K1".to_string()),
        }
    }

    #[test]
    fn test_semver_parse_and_bump() {
        let v: SemVer = "1.4.2".parse().unwrap();
        assert_eq!(v.bump_minor().to_string(), "1.5.0");
        assert_eq!(v.bump_patch().to_string(), "1.4.3");
        assert!("1.4".parse::<SemVer>().is_err());
        assert!("1.x.0".parse::<SemVer>().is_err());
    }

    #[test]
    fn test_registration_normalizes_role_and_sets() {
        let reg = AgentRegistration::try_from(request()).unwrap();
        assert_eq!(reg.role, "worker");
        assert_eq!(reg.capabilities.len(), 1);
        assert_eq!(AgentLookup::for_registration(&reg), AgentLookup::DedupKey("K1".to_string()));
    }

    #[test]
    fn test_registration_rejects_empty_role() {
        let mut req = request();
        req.role = "   ".to_string();
        assert_eq!(
            AgentRegistration::try_from(req).unwrap_err(),
            AgentValidationError::EmptyField("role")
        );
    }

    #[test]
    fn test_descriptor_comparison_ignores_set_order() {
        let reg = AgentRegistration::try_from(request()).unwrap();
        let agent = Agent::register(AgentId::new(), &reg, Utc::now());

        let mut reordered = request();
        reordered.capabilities = vec!["compute".to_string()];
        let reg2 = AgentRegistration::try_from(reordered).unwrap();
        assert!(agent.matches_descriptor(&reg2));

        let mut renamed = request();
        renamed.name = "Other".to_string();
        assert!(!agent.matches_descriptor(&AgentRegistration::try_from(renamed).unwrap()));
    }

    #[test]
    fn test_staleness_is_strictly_past_ttl() {
        let now = Utc::now();
        let reg = AgentRegistration::try_from(request()).unwrap();
        let mut agent = Agent::register(AgentId::new(), &reg, now);
        let ttl = Duration::seconds(60);

        assert!(!agent.is_stale(now + ttl, ttl));
        assert!(agent.is_stale(now + ttl + Duration::seconds(1), ttl));

        agent.status = AgentStatus::Offline;
        assert!(!agent.is_stale(now + Duration::hours(1), ttl));
    }

    #[test]
    fn test_role_slot_lookup_ignores_dedup_agents() {
        let reg = AgentRegistration::try_from(request()).unwrap();
        let agent = Agent::register(AgentId::new(), &reg, Utc::now());
        assert!(!AgentLookup::RoleSlot("worker".to_string()).matches(&agent));
        assert!(AgentLookup::DedupKey("K1".to_string()).matches(&agent));
    }
}
