// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Autonomous assignment loop, enabled with `auto_assign`.
//!
//! Keeps calling `assign_next` while it finds work and idles otherwise.

use crate::application::background::{BackgroundTask, LoopError};
use crate::application::orchestrator::Orchestrator;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct MissionAssigner {
    orchestrator: Arc<Orchestrator>,
    idle: Duration,
}

impl MissionAssigner {
    pub fn new(orchestrator: Arc<Orchestrator>, idle: Duration) -> Self {
        Self { orchestrator, idle }
    }
}

#[async_trait]
impl BackgroundTask for MissionAssigner {
    fn name(&self) -> &'static str {
        "mission_assigner"
    }

    async fn tick(&self) -> Result<Duration, LoopError> {
        match self.orchestrator.assign_next().await {
            Ok(Some(_)) => Ok(Duration::ZERO),
            Ok(None) => Ok(self.idle),
            Err(e) => {
                warn!(error = %e, "Autonomous assignment failed");
                Ok(self.idle)
            }
        }
    }
}
