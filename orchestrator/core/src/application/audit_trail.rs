// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Append-only mission audit log with bounded retries.
//!
//! Appends are retried on transient repository errors (three attempts,
//! exponential backoff from 50 ms capped at 500 ms). A foreign-key violation
//! means the mission does not exist and is never retried.

use crate::application::metrics as m;
use crate::domain::audit::{AuditEntry, AuditTransition};
use crate::domain::clock::{Clock, IdGenerator};
use crate::domain::mission::{MissionId, MissionState};
use crate::domain::repository::{AuditRepository, RepositoryError};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Backoff for repository writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteBackoff {
    pub attempts: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl Default for WriteBackoff {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial: Duration::from_millis(50),
            max: Duration::from_millis(500),
        }
    }
}

impl WriteBackoff {
    /// No sleeping between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            initial: Duration::ZERO,
            max: Duration::ZERO,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
pub async fn retry_transient<T, F, Fut>(
    backoff: WriteBackoff,
    operation: &'static str,
    mut op: F,
) -> Result<T, RepositoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RepositoryError>>,
{
    let mut delay = backoff.initial;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < backoff.attempts.max(1) => {
                warn!(operation, attempt, error = %e, "Transient repository error, retrying");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                delay = (delay * 2).min(backoff.max);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub struct AuditTrail {
    repo: Arc<dyn AuditRepository>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    backoff: WriteBackoff,
}

impl AuditTrail {
    pub fn new(repo: Arc<dyn AuditRepository>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            repo,
            clock,
            ids,
            backoff: WriteBackoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: WriteBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// New entry stamped with a fresh id and the current time.
    pub fn entry(
        &self,
        mission_id: MissionId,
        transition: AuditTransition,
        previous_state: Option<MissionState>,
        new_state: Option<MissionState>,
        actor: &str,
    ) -> AuditEntry {
        AuditEntry::new(
            self.ids.next_id(),
            mission_id,
            transition,
            previous_state,
            new_state,
            actor,
            self.clock.now(),
        )
    }

    pub async fn record(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        retry_transient(self.backoff, "audit_append", || self.repo.append(entry)).await
    }

    /// Append, logging and counting a failure instead of returning it.
    pub async fn record_or_count(&self, entry: &AuditEntry) -> bool {
        match self.record(entry).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    mission_id = %entry.mission_id,
                    transition = entry.transition.as_str(),
                    error = %e,
                    "Audit append failed"
                );
                metrics::counter!(m::AUDIT_WRITE_FAILED_TOTAL).increment(1);
                false
            }
        }
    }

    /// Entries for one mission, oldest first.
    pub async fn list(&self, mission_id: MissionId) -> Result<Vec<AuditEntry>, RepositoryError> {
        let started = Instant::now();
        let result = retry_transient(self.backoff, "audit_list", || self.repo.list_for_mission(mission_id)).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::histogram!(m::AUDIT_RETRIEVE_LATENCY_SECONDS, "status" => status)
            .record(started.elapsed().as_secs_f64());
        result
    }
}
