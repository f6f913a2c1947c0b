// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat turn handling
//!
//! Stream decoding, argument repair, and the per-turn engine that wires the
//! transport to the tool scheduler.

pub mod engine;
pub mod repair;
pub mod streaming;

pub use engine::{ChatEngine, NoopTurnObserver, TurnObserver, TurnSummary};
