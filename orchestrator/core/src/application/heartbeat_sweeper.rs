// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::application::agent_registry::AgentRegistry;
use crate::application::background::{BackgroundTask, LoopError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Runs the registry liveness sweep on a fixed interval.
pub struct HeartbeatSweeper {
    registry: Arc<AgentRegistry>,
    interval: Duration,
}

impl HeartbeatSweeper {
    pub fn new(registry: Arc<AgentRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }
}

#[async_trait]
impl BackgroundTask for HeartbeatSweeper {
    fn name(&self) -> &'static str {
        "heartbeat_sweeper"
    }

    async fn tick(&self) -> Result<Duration, LoopError> {
        let timed_out = self.registry.sweep().await?;
        debug!(timed_out, "Liveness sweep finished");
        Ok(self.interval)
    }
}
