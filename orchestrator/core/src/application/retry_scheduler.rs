// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Retry dispatcher.
//!
//! Every tick claims the retries that are due from `mission.retries` and
//! hands each one to [`Orchestrator::requeue_for_retry`]. A claimed retry
//! that could not be requeued goes back into the set, due immediately, so
//! the next tick tries again. When even that write fails the id is held in
//! memory and retried first on the next tick.

use crate::application::background::{BackgroundTask, LoopError};
use crate::application::metrics as m;
use crate::application::orchestrator::Orchestrator;
use crate::domain::bus::BusError;
use crate::domain::clock::Clock;
use crate::domain::mission::MissionId;
use crate::infrastructure::event_bus::{epoch_seconds, RETRY_ZSET};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct RetryScheduler {
    orchestrator: Arc<Orchestrator>,
    clock: Arc<dyn Clock>,
    tick: Duration,
    /// Claimed retries that could not be put back into the set.
    stranded: Mutex<Vec<MissionId>>,
}

impl RetryScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, clock: Arc<dyn Clock>, tick: Duration) -> Self {
        Self {
            orchestrator,
            clock,
            tick: tick.min(Duration::from_secs(1)),
            stranded: Mutex::new(Vec::new()),
        }
    }

    /// Requeue every due retry. Returns how many missions went back to `queued`.
    pub async fn dispatch_due(&self) -> Result<usize, LoopError> {
        let now = self.clock.now();
        let events = self.orchestrator.events();
        let mut due = std::mem::take(&mut *self.stranded.lock());
        match events.dequeue_due_retries(now).await {
            Ok(claimed) => due.extend(claimed),
            Err(e) => {
                self.stranded.lock().extend(due);
                return Err(e.into());
            }
        }

        let mut requeued = 0;
        let mut unplaced = Vec::new();
        let mut first_error: Option<BusError> = None;
        for mission_id in due {
            match self.orchestrator.requeue_for_retry(mission_id).await {
                Ok(Some(_)) => requeued += 1,
                Ok(None) => {}
                Err(e) => {
                    error!(mission_id = %mission_id, error = %e, "Retry dispatch failed; rescheduling");
                    if let Err(e) = events
                        .bus()
                        .zset_add(RETRY_ZSET, &mission_id.to_string(), epoch_seconds(now))
                        .await
                    {
                        unplaced.push(mission_id);
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        if requeued > 0 {
            info!(requeued, "Dispatched due retries");
        }
        if let Some(e) = first_error {
            warn!(count = unplaced.len(), error = %e, "Could not reschedule claimed retries; holding them");
            metrics::counter!(m::ORCHESTRATOR_ERRORS_TOTAL, "operation" => "retry_reschedule")
                .increment(unplaced.len() as u64);
            self.stranded.lock().extend(unplaced);
            return Err(e.into());
        }
        Ok(requeued)
    }
}

#[async_trait]
impl BackgroundTask for RetryScheduler {
    fn name(&self) -> &'static str {
        "retry_scheduler"
    }

    async fn tick(&self) -> Result<Duration, LoopError> {
        self.dispatch_due().await?;
        Ok(self.tick)
    }
}
