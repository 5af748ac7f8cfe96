// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: aggregates, value objects and the collaborator traits the
//! application services depend on.

pub mod agent;
pub mod audit;
pub mod bus;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod mission;
pub mod repository;
