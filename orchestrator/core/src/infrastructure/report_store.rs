// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Append-only storage for agent health reports.
//!
//! Each report is written once to its own file and never rewritten; the
//! returned path is opaque to the orchestrator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persist `report` and return where it was written.
    async fn store(
        &self,
        agent_id: &str,
        at: DateTime<Utc>,
        report: &Value,
    ) -> Result<String, ReportStoreError>;
}

#[derive(Debug, Error)]
pub enum ReportStoreError {
    #[error("failed to write report {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Writes `health_check_<agent_id>_<timestamp>.json` under a root directory.
pub struct FilesystemReportStore {
    root: PathBuf,
}

impl FilesystemReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_name(agent_id: &str, at: DateTime<Utc>) -> String {
        let stamp = at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string().replace(':', "-");
        let agent: String = agent_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("health_check_{}_{}.json", agent, stamp)
    }
}

#[async_trait]
impl ReportStore for FilesystemReportStore {
    async fn store(
        &self,
        agent_id: &str,
        at: DateTime<Utc>,
        report: &Value,
    ) -> Result<String, ReportStoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| ReportStoreError::Io {
                path: self.root.clone(),
                source,
            })?;

        let path = self.root.join(Self::file_name(agent_id, at));
        let body = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| ReportStoreError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path.to_string_lossy().into_owned())
    }
}
