// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mission control plane
//!
//! Agent registry, mission lifecycle orchestration, the event bus and the
//! retry and dead-letter machinery that sit behind the API gateway.
//!
//! # Architecture
//!
//! - **domain:** aggregates, state machines and the `Bus`/repository traits
//! - **application:** services and background loops built on those traits
//! - **infrastructure:** in-memory bus, event bus, PostgreSQL repositories

pub mod application;
pub mod domain;
pub mod infrastructure;
