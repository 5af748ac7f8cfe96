// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Mission Control
//!
//! The `mcp` binary runs the mission control plane: agent registry, mission
//! orchestration, event consumers and the retry dispatcher.
//!
//! ## Commands
//!
//! - `mcp` / `mcp run` - Run the control plane until SIGINT/SIGTERM
//! - `mcp config show|validate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use mission_control::commands::{self, ConfigCommand};
use mission_control::daemon;
use mission_control::telemetry::{init_logging, init_metrics, LogFormat};
use mission_control_core::domain::config::{MissionControlConfig, StorageConfig, CONFIG_PATH_ENV};

/// Mission control plane
#[derive(Parser)]
#[command(name = "mcp")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = CONFIG_PATH_ENV, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "MCP_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// PostgreSQL connection string; selects the postgres storage backend
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Prometheus scrape listener
    #[arg(long, global = true, env = "MCP_METRICS_ADDR", default_value = "0.0.0.0:9464")]
    metrics_addr: SocketAddr,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control plane (default)
    Run,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Config { command } => commands::config::handle_command(command, cli.config),
        Commands::Run => {
            let mut config = MissionControlConfig::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            if let Some(url) = cli.database_url {
                config.storage = with_database_url(config.storage, url);
            }
            config.validate().context("Configuration validation failed")?;

            init_metrics(cli.metrics_addr)?;
            daemon::start_daemon(config).await
        }
    }
}

fn with_database_url(storage: StorageConfig, url: String) -> StorageConfig {
    let max_connections = match storage {
        StorageConfig::Postgres { max_connections, .. } => max_connections,
        StorageConfig::InMemory => 5,
    };
    StorageConfig::Postgres {
        connection_string: url,
        max_connections,
    }
}
