// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Envelope
//!
//! The typed JSON carrier appended to the mission streams. The envelope `id`
//! is the deduplication key: two entries carrying the same id within the
//! dedup window are dispatched once.
//!
//! Wire shape:
//! ```json
//! {"id":"...","timestamp":"2026-01-01T00:00:00Z","sender_id":"orchestrator",
//!  "recipient_id":null,"message_type":"mission.assigned","payload":{},"correlation_id":null}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MISSION_EVENTS_STREAM: &str = "mission.events";
pub const MISSION_DLQ_STREAM: &str = "mission.dlq";
pub const MISSION_WORKERS_GROUP: &str = "mission-workers";
pub const MISSION_DLQ_GROUP: &str = "mission-dlq";

pub const MSG_MISSION_CREATED: &str = "mission.created";
pub const MSG_MISSION_QUEUED: &str = "mission.queued";
pub const MSG_MISSION_ASSIGNED: &str = "mission.assigned";
pub const MSG_MISSION_FAILED: &str = "mission.failed";
pub const MSG_MISSION_COMPLETED: &str = "mission.completed";
pub const MSG_RETRY_EXHAUSTED: &str = "mission.retry.exhausted";
pub const MSG_CONSUMER_ERROR: &str = "mission.consumer.error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: String,
    #[serde(default)]
    pub recipient_id: Option<String>,
    pub message_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl MessageEnvelope {
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        sender_id: impl Into<String>,
        message_type: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            sender_id: sender_id.into(),
            recipient_id: None,
            message_type: message_type.into(),
            payload,
            correlation_id: None,
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient.into());
        self
    }

    pub fn with_correlation(mut self, correlation: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation.into());
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// `payload.mission_id`, when present as a string.
    pub fn mission_id(&self) -> Option<&str> {
        self.payload.get("mission_id").and_then(Value::as_str)
    }

    pub fn dedup_key(&self) -> String {
        format!("msg:dedup:{}", self.id)
    }
}

/// Builds a payload map from `(key, value)` pairs.
pub fn payload<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let env = MessageEnvelope::new(
            "E1",
            Utc::now(),
            "orchestrator",
            MSG_MISSION_ASSIGNED,
            payload([("mission_id", json!("m-1"))]),
        )
        .with_recipient("agent-7");

        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["message_type"], "mission.assigned");
        assert_eq!(value["recipient_id"], "agent-7");
        assert!(value["correlation_id"].is_null());
        assert!(value["timestamp"].as_str().unwrap().contains('T'));

        let back = MessageEnvelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(back.mission_id(), Some("m-1"));
        assert_eq!(back.dedup_key(), "msg:dedup:E1");
    }

    #[test]
    fn test_missing_optionals_default() {
        let raw = r#"{"id":"x","timestamp":"2026-01-01T00:00:00Z","sender_id":"s","message_type":"t"}"#;
        let env = MessageEnvelope::from_json(raw).unwrap();
        assert!(env.payload.is_empty());
        assert!(env.recipient_id.is_none());
    }
}
