// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! grokit - command-line client for the xAI chat-completions API.
//!
//! Architecture highlights:
//! - `llm`: wire types, the HTTPS transport and the retry policy
//! - `chat`: stream decoding, argument repair and the per-turn engine
//! - `scheduler`: priority queue, result cache and paced batch dispatch
//! - `tools`: the executor trait and the local file tools
//! - `config`: `~/.grokit/settings.json`
//! - `cli`: command-line argument definitions

pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod scheduler;
pub mod tools;

pub use error::{GrokitError, Result};
