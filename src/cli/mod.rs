// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Command-line interface

pub mod args;
pub mod repl;

pub use args::*;
pub use repl::{parse_repl_command, ReplCommand, REPL_HELP};
