// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! The composition root: builds the bus, repositories and services once,
//! starts the background loops and runs until a shutdown signal arrives.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use mission_control_core::application::agent_registry::AgentRegistry;
use mission_control_core::application::audit_trail::AuditTrail;
use mission_control_core::application::background::{BackgroundLoops, BackgroundTask};
use mission_control_core::application::dlq_consumer::DlqConsumer;
use mission_control_core::application::heartbeat_sweeper::HeartbeatSweeper;
use mission_control_core::application::mission_assigner::MissionAssigner;
use mission_control_core::application::mission_consumer::MissionEventConsumer;
use mission_control_core::application::orchestrator::Orchestrator;
use mission_control_core::application::rate_limiter::RateLimiter;
use mission_control_core::application::repository_factory::{create_repositories, Repositories};
use mission_control_core::application::retry_scheduler::RetryScheduler;
use mission_control_core::domain::bus::Bus;
use mission_control_core::domain::clock::{Clock, IdGenerator, SystemClock, ThreadRandom, UuidV4Generator};
use mission_control_core::domain::config::{MissionControlConfig, StorageConfig};
use mission_control_core::infrastructure::event_bus::{EventBus, TopicAcl};
use mission_control_core::infrastructure::memory_bus::InMemoryBus;
use mission_control_core::infrastructure::report_store::FilesystemReportStore;

/// Every long-lived service, wired once at startup.
pub struct Services {
    pub config: MissionControlConfig,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub repositories: Repositories,
    pub events: EventBus,
    pub registry: Arc<AgentRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl Services {
    pub async fn build(config: MissionControlConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids: Arc<dyn IdGenerator> = Arc::new(UuidV4Generator);
        let bus: Arc<dyn Bus> = Arc::new(
            InMemoryBus::new(clock.clone()).with_stream_retention(config.stream_retained_entries),
        );

        let repositories = create_repositories(&config.storage.backend())
            .await
            .context("Failed to initialize repositories")?;

        let events = EventBus::new(
            bus.clone(),
            clock.clone(),
            ids.clone(),
            Arc::new(ThreadRandom),
            TopicAcl::new(config.acl.clone()),
            config.dedup_window(),
        );
        let registry = Arc::new(AgentRegistry::new(
            repositories.agents.clone(),
            events.clone(),
            clock.clone(),
            ids.clone(),
            config.liveness_ttl(),
        ));
        let orchestrator = Arc::new(
            Orchestrator::new(
                events.clone(),
                repositories.missions.clone(),
                AuditTrail::new(repositories.audit.clone(), clock.clone(), ids.clone()),
                registry.clone(),
                Arc::new(FilesystemReportStore::new(config.reports_dir.clone())),
                clock.clone(),
                ids.clone(),
            )
            .with_circuit_breaker((&config).into())
            .with_cache_retention(config.mission_cache_retention()),
        );
        let rate_limiter = Arc::new(RateLimiter::new(bus, clock.clone(), config.rate_limit_per_minute));

        Ok(Self {
            config,
            clock,
            ids,
            repositories,
            events,
            registry,
            orchestrator,
            rate_limiter,
        })
    }

    /// Start the sweeper, consumers, retry dispatcher and, when enabled, the
    /// autonomous assigner.
    pub async fn spawn_loops(&self) -> Result<BackgroundLoops> {
        let config = &self.config;
        let mut loops = BackgroundLoops::new(config.loop_error_backoff());

        let consumer = MissionEventConsumer::subscribe(self.events.clone(), config)
            .await
            .context("Failed to join mission-workers group")?;
        let dlq = DlqConsumer::subscribe(
            self.events.clone(),
            AuditTrail::new(self.repositories.audit.clone(), self.clock.clone(), self.ids.clone()),
            config,
        )
        .await
        .context("Failed to join mission-dlq group")?;

        let mut tasks: Vec<Arc<dyn BackgroundTask>> = vec![
            Arc::new(HeartbeatSweeper::new(self.registry.clone(), config.sweep_interval())),
            Arc::new(consumer),
            Arc::new(dlq),
            Arc::new(RetryScheduler::new(
                self.orchestrator.clone(),
                self.clock.clone(),
                config.retry_tick(),
            )),
        ];
        if config.auto_assign {
            tasks.push(Arc::new(MissionAssigner::new(self.orchestrator.clone(), config.assign_idle())));
        }
        for task in tasks {
            loops.spawn(task);
        }
        info!(loops = loops.len(), "Background loops started");
        Ok(loops)
    }
}

pub async fn start_daemon(config: MissionControlConfig) -> Result<()> {
    let storage = match config.storage {
        StorageConfig::InMemory => "in_memory",
        StorageConfig::Postgres { .. } => "postgres",
    };
    info!(
        storage,
        auto_assign = config.auto_assign,
        "Mission control starting (PID: {})",
        std::process::id()
    );

    let services = Services::build(config).await?;
    let loops = services.spawn_loops().await?;

    shutdown_signal().await;

    info!("Mission control shutting down");
    loops.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_control_core::domain::agent::AgentRegistrationRequest;
    use mission_control_core::domain::mission::{MissionRequest, MissionState};
    use std::time::Duration;

    fn test_config(reports: &std::path::Path) -> MissionControlConfig {
        MissionControlConfig {
            reports_dir: reports.to_path_buf(),
            consumer_block_ms: 50,
            auto_assign: true,
            assign_idle_seconds: 1,
            ..MissionControlConfig::default()
        }
    }

    #[tokio::test]
    async fn test_loops_start_and_stop() {
        let reports = tempfile::tempdir().unwrap();
        let services = Services::build(test_config(reports.path())).await.unwrap();
        let loops = services.spawn_loops().await.unwrap();
        assert_eq!(loops.len(), 5);

        tokio::time::timeout(Duration::from_secs(5), loops.shutdown())
            .await
            .expect("loops stop promptly");
    }

    #[tokio::test]
    async fn test_auto_assign_places_submitted_mission() {
        let reports = tempfile::tempdir().unwrap();
        let services = Services::build(test_config(reports.path())).await.unwrap();
        services
            .registry
            .register(AgentRegistrationRequest {
                name: "worker".to_string(),
                role: "worker".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let loops = services.spawn_loops().await.unwrap();

        let mission = services.orchestrator.submit(MissionRequest::new("T")).await.unwrap();
        let mut state = MissionState::Queued;
        for _ in 0..100 {
            state = services.orchestrator.get(mission.id).await.unwrap().unwrap().state;
            if state == MissionState::Assigned {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(state, MissionState::Assigned);

        loops.shutdown().await;
    }
}
