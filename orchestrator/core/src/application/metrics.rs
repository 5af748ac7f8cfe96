// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Metric names emitted through the `metrics` facade.
//!
//! The binary installs the Prometheus exporter and calls
//! [`describe_metrics`] once at startup; the library only records.

use metrics::{describe_counter, describe_histogram, Unit};

pub const AGENT_REGISTERED_TOTAL: &str = "agent_registered_total";
pub const AGENT_UPDATED_TOTAL: &str = "agent_updated_total";
pub const AGENT_DEREGISTERED_TOTAL: &str = "agent_deregistered_total";
pub const AGENT_TIMEOUT_TOTAL: &str = "agent_timeout_total";
pub const AGENT_REGISTRY_ERRORS_TOTAL: &str = "agent_registry_errors_total";
pub const AGENT_REGISTRY_REGISTER_LATENCY_SECONDS: &str = "agent_registry_register_latency_seconds";

pub const MISSION_TRANSITIONS_TOTAL: &str = "mission_transitions_total";
pub const MISSION_STATE_DURATION_SECONDS: &str = "mission_state_duration_seconds";
pub const MISSION_RETRY_SCHEDULED_TOTAL: &str = "mission_retry_scheduled_total";
pub const MISSION_RETRY_REFUSED_TOTAL: &str = "mission_retry_refused_total";
pub const MISSION_RETRY_DISPATCHED_TOTAL: &str = "mission_retry_dispatched_total";
pub const MISSION_DLQ_TOTAL: &str = "mission_dlq_total";
pub const ORCHESTRATOR_ERRORS_TOTAL: &str = "orchestrator_errors_total";

pub const AUDIT_WRITE_FAILED_TOTAL: &str = "audit_write_failed_total";
pub const AUDIT_RETRIEVE_LATENCY_SECONDS: &str = "audit_retrieve_latency_seconds";

pub const DEDUP_SUPPRESSED_TOTAL: &str = "dedup_suppressed_total";
pub const EVENT_BUS_ACL_DENIED_TOTAL: &str = "event_bus_acl_denied_total";
pub const EVENT_BUS_PUBLISHED_TOTAL: &str = "event_bus_published_total";
pub const EVENT_BUS_POISON_TOTAL: &str = "event_bus_poison_total";

pub const SELECTOR_FALLBACK_TOTAL: &str = "selector_fallback_total";
pub const CIRCUIT_BREAKER_OPENED_TOTAL: &str = "circuit_breaker_opened_total";
pub const RATE_LIMITED_TOTAL: &str = "rate_limited_total";

pub fn describe_metrics() {
    describe_counter!(AGENT_REGISTERED_TOTAL, "Agents created by register");
    describe_counter!(AGENT_UPDATED_TOTAL, "Re-registrations that changed an agent");
    describe_counter!(AGENT_DEREGISTERED_TOTAL, "Agents explicitly deregistered");
    describe_counter!(AGENT_TIMEOUT_TOTAL, "Agents forced offline by the liveness sweep");
    describe_counter!(AGENT_REGISTRY_ERRORS_TOTAL, "Registry write failures by operation");
    describe_histogram!(
        AGENT_REGISTRY_REGISTER_LATENCY_SECONDS,
        Unit::Seconds,
        "Latency of register calls"
    );

    describe_counter!(MISSION_TRANSITIONS_TOTAL, "Mission state transitions by from/to state");
    describe_histogram!(
        MISSION_STATE_DURATION_SECONDS,
        Unit::Seconds,
        "Time a mission spent in a state before leaving it"
    );
    describe_counter!(MISSION_RETRY_SCHEDULED_TOTAL, "Retries accepted by the scheduler");
    describe_counter!(MISSION_RETRY_REFUSED_TOTAL, "Retries refused after the budget ran out");
    describe_counter!(MISSION_RETRY_DISPATCHED_TOTAL, "Due retries requeued by the dispatcher");
    describe_counter!(MISSION_DLQ_TOTAL, "Messages dead-lettered by reason");
    describe_counter!(ORCHESTRATOR_ERRORS_TOTAL, "Degraded orchestrator writes by operation");

    describe_counter!(AUDIT_WRITE_FAILED_TOTAL, "Audit appends that failed after retries");
    describe_histogram!(
        AUDIT_RETRIEVE_LATENCY_SECONDS,
        Unit::Seconds,
        "Latency of audit log reads by status"
    );

    describe_counter!(DEDUP_SUPPRESSED_TOTAL, "Stream entries suppressed as duplicates");
    describe_counter!(EVENT_BUS_ACL_DENIED_TOTAL, "Publish/subscribe attempts denied by ACL");
    describe_counter!(EVENT_BUS_PUBLISHED_TOTAL, "Envelopes appended per stream");
    describe_counter!(EVENT_BUS_POISON_TOTAL, "Unparseable stream entries per stream");

    describe_counter!(SELECTOR_FALLBACK_TOTAL, "Selections that bypassed filtering");
    describe_counter!(CIRCUIT_BREAKER_OPENED_TOTAL, "Per-agent circuit breakers opened");
    describe_counter!(RATE_LIMITED_TOTAL, "Requests rejected by the rate limiter by scope");
}
