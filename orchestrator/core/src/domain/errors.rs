// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error kinds surfaced to the gateway. Service-level errors convert into
//! [`ControlPlaneError`]; the gateway maps [`ErrorKind`] onto its transport.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

pub const IMMUTABLE_FIELD_MESSAGE: &str = "dedup_key and role are immutable after creation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ImmutableField,
    Validation,
    /// Retryable; maps to a 5xx.
    Transient,
    RateLimited,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ImmutableField => "immutable_field",
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::RateLimited => "rate_limited",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlPlaneError {
    #[error("{0}")]
    NotFound(String),

    #[error("{}", IMMUTABLE_FIELD_MESSAGE)]
    ImmutableField,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    RateLimited(String),
}

impl ControlPlaneError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlPlaneError::NotFound(_) => ErrorKind::NotFound,
            ControlPlaneError::ImmutableField => ErrorKind::ImmutableField,
            ControlPlaneError::Validation(_) => ErrorKind::Validation,
            ControlPlaneError::Transient(_) => ErrorKind::Transient,
            ControlPlaneError::RateLimited(_) => ErrorKind::RateLimited,
        }
    }

    /// `{"error": <kind>, "message": <text>}`
    pub fn to_payload(&self) -> Value {
        json!({
            "error": self.kind().as_str(),
            "message": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immutable_field_payload_is_exact() {
        let payload = ControlPlaneError::ImmutableField.to_payload();
        assert_eq!(
            payload,
            json!({"error": "immutable_field", "message": "dedup_key and role are immutable after creation"})
        );
    }

    #[test]
    fn test_kinds() {
        assert_eq!(ControlPlaneError::NotFound("x".into()).kind().as_str(), "not_found");
        assert_eq!(ControlPlaneError::RateLimited("x".into()).kind(), ErrorKind::RateLimited);
    }
}
