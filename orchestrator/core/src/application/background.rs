// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Background loop supervision.
//!
//! Each loop is a [`BackgroundTask`] whose `tick` does one unit of work and
//! says how long to pause before the next. The supervisor races every tick
//! against the shared cancellation token, so shutdown aborts blocked stream
//! reads and drops in-flight dispatch without acking it. A failed tick is
//! logged and retried after a short backoff; it never ends the loop.

use crate::application::agent_registry::RegistryError;
use crate::application::orchestrator::OrchestratorError;
use crate::domain::bus::BusError;
use crate::domain::repository::RepositoryError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LoopError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

#[async_trait]
pub trait BackgroundTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// One unit of work. Returns the pause before the next tick.
    async fn tick(&self) -> Result<Duration, LoopError>;
}

/// Owns the spawned loops and the token that stops them.
pub struct BackgroundLoops {
    shutdown_token: CancellationToken,
    error_backoff: Duration,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundLoops {
    pub fn new(error_backoff: Duration) -> Self {
        Self {
            shutdown_token: CancellationToken::new(),
            error_backoff: error_backoff.min(Duration::from_secs(1)),
            handles: Vec::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn spawn(&mut self, task: Arc<dyn BackgroundTask>) {
        let name = task.name();
        let token = self.shutdown_token.child_token();
        let backoff = self.error_backoff;
        let handle = tokio::spawn(async move { run(task, token, backoff).await });
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every loop and wait for all of them to stop.
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Background task ended abnormally");
            }
        }
    }
}

/// Drive `task` until `token` is cancelled.
pub async fn run(task: Arc<dyn BackgroundTask>, token: CancellationToken, error_backoff: Duration) {
    let name = task.name();
    info!(task = name, "Starting background task");

    loop {
        let pause = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = task.tick() => match result {
                Ok(pause) => pause,
                Err(e) => {
                    warn!(task = name, error = %e, "Background tick failed");
                    error_backoff
                }
            },
        };

        if pause.is_zero() {
            // Let other tasks run between back-to-back ticks.
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(pause) => debug!(task = name, "Background tick"),
        }
    }

    info!(task = name, "Background task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        ticks: AtomicUsize,
        fail_every_other: bool,
    }

    #[async_trait]
    impl BackgroundTask for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn tick(&self) -> Result<Duration, LoopError> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.fail_every_other && n % 2 == 0 {
                return Err(BusError::Unavailable("down".into()).into());
            }
            Ok(Duration::from_millis(100))
        }
    }

    /// Never finishes a tick on its own.
    struct Stuck;

    #[async_trait]
    impl BackgroundTask for Stuck {
        fn name(&self) -> &'static str {
            "stuck"
        }

        async fn tick(&self) -> Result<Duration, LoopError> {
            std::future::pending::<()>().await;
            Ok(Duration::ZERO)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_back_off_and_loop_continues() {
        let task = Arc::new(Counting {
            ticks: AtomicUsize::new(0),
            fail_every_other: true,
        });
        let mut loops = BackgroundLoops::new(Duration::from_secs(5));
        loops.spawn(task.clone());

        // Backoff is capped at one second: fail (1s) + ok (100ms) per cycle.
        tokio::time::sleep(Duration::from_millis(2150)).await;
        loops.shutdown().await;
        assert_eq!(task.ticks.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_blocked_tick() {
        let mut loops = BackgroundLoops::new(Duration::from_millis(10));
        loops.spawn(Arc::new(Stuck));
        assert_eq!(loops.len(), 1);
        tokio::time::timeout(Duration::from_secs(1), loops.shutdown())
            .await
            .unwrap();
    }
}
