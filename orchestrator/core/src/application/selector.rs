// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Selector
//!
//! Picks an agent for a mission from a registry snapshot.
//!
//! Candidates with an open circuit breaker (`cb:open:<id>`) or missing any
//! capability listed in `payload.requirements.capabilities` are discarded.
//! The rest are ranked by
//!
//! ```text
//! 0.5 * status + 0.3 * recency + 0.2 * load_factor
//! ```
//!
//! with ties broken by ascending agent id. When every candidate is filtered
//! out the first active agent is chosen anyway so missions without declared
//! capabilities do not starve; that path logs `selector_fallback`.

use crate::application::agent_registry::agent_load_key;
use crate::application::metrics as m;
use crate::domain::agent::{Agent, AgentId, AgentStatus};
use crate::domain::bus::Bus;
use crate::domain::clock::Clock;
use crate::domain::mission::Mission;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

const STATUS_WEIGHT: f64 = 0.5;
const RECENCY_WEIGHT: f64 = 0.3;
const LOAD_WEIGHT: f64 = 0.2;
const RECENCY_HORIZON_SECONDS: f64 = 60.0;

pub fn circuit_open_key(id: AgentId) -> String {
    format!("cb:open:{}", id)
}

pub fn status_weight(status: AgentStatus) -> f64 {
    match status {
        AgentStatus::Active => 1.0,
        AgentStatus::Busy => 0.7,
        AgentStatus::Error => 0.3,
        AgentStatus::Offline => 0.0,
    }
}

/// `1.0` for a heartbeat right now, falling linearly to `0.0` at 60 s.
pub fn recency(last_heartbeat: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age = (now - last_heartbeat).num_milliseconds().max(0) as f64 / 1000.0;
    (1.0 - (age / RECENCY_HORIZON_SECONDS).min(1.0)).max(0.0)
}

pub fn load_factor(load: f64) -> f64 {
    (1.0 - load.min(1.0)).max(0.0)
}

pub fn composite_score(status: AgentStatus, recency: f64, load: f64) -> f64 {
    STATUS_WEIGHT * status_weight(status) + RECENCY_WEIGHT * recency + LOAD_WEIGHT * load_factor(load)
}

/// Outcome of a selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection {
    Scored { agent_id: AgentId, score: f64 },
    /// Every candidate was filtered out.
    Fallback { agent_id: AgentId },
}

impl Selection {
    pub fn agent_id(&self) -> AgentId {
        match self {
            Selection::Scored { agent_id, .. } | Selection::Fallback { agent_id } => *agent_id,
        }
    }
}

pub struct Selector {
    bus: Arc<dyn Bus>,
    clock: Arc<dyn Clock>,
}

impl Selector {
    pub fn new(bus: Arc<dyn Bus>, clock: Arc<dyn Clock>) -> Self {
        Self { bus, clock }
    }

    pub async fn select(&self, mission: &Mission, candidates: &[Agent]) -> Option<Selection> {
        let required = match mission.required_capabilities() {
            Ok(required) => required,
            Err(e) => {
                warn!(mission_id = %mission.id, error = %e, "Ignoring malformed capability requirements");
                Vec::new()
            }
        };
        let now = self.clock.now();

        let mut best: Option<(f64, AgentId)> = None;
        for agent in candidates {
            if self.breaker_open(agent.id).await {
                debug!(agent_id = %agent.id, "Skipping agent with open circuit breaker");
                continue;
            }
            if !agent.has_capabilities(&required) {
                continue;
            }
            let load = self.load(agent.id).await;
            let score = composite_score(agent.status, recency(agent.last_heartbeat, now), load);
            let better = match best {
                None => true,
                Some((best_score, best_id)) => match score.partial_cmp(&best_score) {
                    Some(Ordering::Greater) => true,
                    Some(Ordering::Equal) => agent.id.to_string() < best_id.to_string(),
                    _ => false,
                },
            };
            if better {
                best = Some((score, agent.id));
            }
        }

        if let Some((score, agent_id)) = best {
            return Some(Selection::Scored { agent_id, score });
        }

        let fallback = candidates.iter().find(|a| a.status == AgentStatus::Active)?;
        warn!(
            mission_id = %mission.id,
            agent_id = %fallback.id,
            required = ?required,
            "selector_fallback"
        );
        metrics::counter!(m::SELECTOR_FALLBACK_TOTAL).increment(1);
        Some(Selection::Fallback { agent_id: fallback.id })
    }

    async fn breaker_open(&self, id: AgentId) -> bool {
        match self.bus.exists(&circuit_open_key(id)).await {
            Ok(open) => open,
            Err(e) => {
                debug!(agent_id = %id, error = %e, "Circuit breaker check failed; treating as closed");
                false
            }
        }
    }

    /// Last reported load, `0.0` when absent or unreadable.
    async fn load(&self, id: AgentId) -> f64 {
        match self.bus.get(&agent_load_key(id)).await {
            Ok(Some(raw)) => raw.parse::<f64>().ok().filter(|l| l.is_finite()).unwrap_or(0.0),
            _ => 0.0,
        }
    }
}
