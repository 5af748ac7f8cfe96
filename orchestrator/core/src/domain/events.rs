// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pub/sub channel carrying agent registry changes.
pub const AGENTS_WATCH_CHANNEL: &str = "agents:watch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryChangeKind {
    Registered,
    Updated,
    Deregistered,
    Timeout,
}

impl RegistryChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryChangeKind::Registered => "registered",
            RegistryChangeKind::Updated => "updated",
            RegistryChangeKind::Deregistered => "deregistered",
            RegistryChangeKind::Timeout => "timeout",
        }
    }
}

/// `{event, timestamp, data}` as published on [`AGENTS_WATCH_CHANNEL`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryChangeEvent {
    pub event: RegistryChangeKind,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl RegistryChangeEvent {
    pub fn new(event: RegistryChangeKind, timestamp: DateTime<Utc>, data: Value) -> Self {
        Self {
            event,
            timestamp,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_event_json() {
        let ev = RegistryChangeEvent::new(RegistryChangeKind::Timeout, Utc::now(), json!({"id": "a"}));
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "timeout");
        assert_eq!(v["data"]["id"], "a");
    }
}
