// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM module for grokit
//!
//! Transport to the chat-completions API, message types and retry policy.

pub mod client;
pub mod message;
pub mod mock_transport;
pub mod provider;
pub mod retry;

pub use message::*;
pub use provider::*;
