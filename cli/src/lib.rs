// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mission control binary support: command handlers and the daemon
//! composition root, exposed as a library so they can be tested.

pub mod commands;
pub mod daemon;
pub mod telemetry;
