// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent_registry;
pub mod audit_trail;
pub mod metrics;
pub mod orchestrator;
pub mod rate_limiter;
pub mod repository_factory;
pub mod selector;

// Background loops
pub mod background;
pub mod dlq_consumer;
pub mod heartbeat_sweeper;
pub mod mission_assigner;
pub mod mission_consumer;
pub mod retry_scheduler;

pub use agent_registry::{AgentRegistry, RegistryError};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use repository_factory::{create_repositories, Repositories};
