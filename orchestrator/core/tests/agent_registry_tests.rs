// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent registry integration tests: idempotent registration, immutable
//! identity fields, liveness sweeps and cache read-through.

mod common;

use common::{agent_request, ControlPlane};
use futures::StreamExt;
use mission_control_core::application::agent_registry::{agent_cache_key, RegistryError};
use mission_control_core::domain::agent::AgentStatus;
use mission_control_core::domain::bus::Bus;
use mission_control_core::domain::clock::Clock;
use mission_control_core::domain::errors::ControlPlaneError;
use mission_control_core::domain::events::RegistryChangeKind;
use serde_json::json;

#[tokio::test]
async fn test_role_is_immutable() {
    let cp = ControlPlane::new();
    let (created, changed) = cp
        .registry
        .register(agent_request("worker", &[], Some("K2")))
        .await
        .unwrap();
    assert!(changed);

    let err = cp
        .registry
        .register(agent_request("architect", &[], Some("K2")))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ImmutableField));
    assert_eq!(
        ControlPlaneError::from(err).to_payload(),
        json!({
            "error": "immutable_field",
            "message": "dedup_key and role are immutable after creation",
        })
    );

    assert_eq!(cp.repo.agent_write_count(), 1);
    let stored = cp.registry.get(created.id).await.unwrap().unwrap();
    assert_eq!(stored.role, "worker");
}

#[tokio::test]
async fn test_duplicate_registration_is_noop() {
    let cp = ControlPlane::new();
    let request = agent_request("worker", &["python", "rust"], Some("K3"));

    let (first, changed) = cp.registry.register(request.clone()).await.unwrap();
    assert!(changed);
    let key = agent_cache_key(first.id);
    assert!(cp.bus.delete(&key).await.unwrap());

    let (second, changed) = cp.registry.register(request).await.unwrap();
    assert!(!changed);
    assert_eq!(first, second);
    assert_eq!(cp.repo.agent_write_count(), 1);
    // An unchanged registration leaves the cache alone.
    assert!(!cp.bus.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_one_record_per_dedup_key_and_role_slot() {
    let cp = ControlPlane::new();
    let (a, _) = cp.registry.register(agent_request("coder", &["rust"], Some("K4"))).await.unwrap();
    let (b, changed) = cp
        .registry
        .register(agent_request("coder", &["rust", "go"], Some("K4")))
        .await
        .unwrap();
    assert!(changed);
    assert_eq!(a.id, b.id);
    assert_eq!(b.version.to_string(), "0.2.0");

    // Without a dedup key the role is the slot.
    let (c, _) = cp.registry.register(agent_request("qa", &[], None)).await.unwrap();
    let (d, _) = cp.registry.register(agent_request("QA", &["pytest"], None)).await.unwrap();
    assert_eq!(c.id, d.id);
    assert_eq!(d.version.to_string(), "0.1.1");

    assert_eq!(cp.registry.list(false).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_sweep_boundary() {
    let cp = ControlPlane::new();
    let ttl = cp.config.liveness_ttl_seconds as i64;
    let silent = cp.register(agent_request("worker", &[], Some("silent"))).await;
    let chatty = cp.register(agent_request("worker", &[], Some("chatty"))).await;

    cp.advance_secs(ttl - 1);
    assert_eq!(cp.registry.sweep().await.unwrap(), 0);
    assert!(cp.registry.heartbeat(chatty.id, AgentStatus::Busy, Some(0.4)).await.unwrap());

    cp.advance_secs(2);
    assert_eq!(cp.registry.sweep().await.unwrap(), 1);

    let silent = cp.registry.get(silent.id).await.unwrap().unwrap();
    assert_eq!(silent.status, AgentStatus::Offline);
    let live: Vec<_> = cp.registry.list(true).await.unwrap().into_iter().map(|a| a.id).collect();
    assert_eq!(live, vec![chatty.id]);

    // Offline agents are not timed out twice.
    cp.advance_secs(ttl * 2);
    assert_eq!(cp.registry.sweep().await.unwrap(), 1);
}

#[tokio::test]
async fn test_cache_miss_refills_from_repository() {
    let cp = ControlPlane::new();
    let agent = cp.register(agent_request("worker", &[], None)).await;
    let key = agent_cache_key(agent.id);

    cp.bus.delete(&key).await.unwrap();
    let loaded = cp.registry.get(agent.id).await.unwrap().unwrap();
    assert_eq!(loaded, agent);

    assert!(cp.bus.exists(&key).await.unwrap());
    let ttl = cp.bus.expires_at(&key).unwrap() - cp.clock.now();
    assert_eq!(ttl.num_seconds(), cp.config.liveness_ttl_seconds as i64);
    assert_eq!(cp.registry.get(agent.id).await.unwrap(), Some(loaded));
}

#[tokio::test]
async fn test_unknown_agent_heartbeat_returns_false() {
    let cp = ControlPlane::new();
    let ghost = mission_control_core::domain::agent::AgentId::new();
    assert!(!cp.registry.heartbeat(ghost, AgentStatus::Active, None).await.unwrap());
    assert!(!cp.registry.deregister(ghost).await.unwrap());
}

#[tokio::test]
async fn test_watch_streams_registry_changes() {
    let cp = ControlPlane::new();
    let mut changes = cp.registry.watch().await.unwrap();

    let agent = cp.register(agent_request("worker", &[], None)).await;
    cp.registry.deregister(agent.id).await.unwrap();

    let first = changes.next().await.unwrap();
    assert_eq!(first.event, RegistryChangeKind::Registered);
    let second = changes.next().await.unwrap();
    assert_eq!(second.event, RegistryChangeKind::Deregistered);
    assert_eq!(second.data["id"], json!(agent.id.to_string()));
}
