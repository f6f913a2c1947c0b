// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Slash commands understood by the interactive session

/// A parsed `/command`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Exit,
    Help,
    /// Show scheduler queue and cache status
    Queue,
    ClearCache,
    /// Forget the conversation
    Clear,
    /// Switch model for later turns
    Model(Option<String>),
    Unknown(String),
}

/// Lines starting with `/` are commands; anything else is a prompt.
/// `exit` and `quit` without a slash are accepted too.
pub fn parse_repl_command(input: &str) -> Option<ReplCommand> {
    let input = input.trim();
    if input == "exit" || input == "quit" {
        return Some(ReplCommand::Exit);
    }

    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default().to_lowercase();
    let arg = parts
        .next()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    Some(match name.as_str() {
        "exit" | "quit" | "q" => ReplCommand::Exit,
        "help" | "?" => ReplCommand::Help,
        "queue" | "status" => ReplCommand::Queue,
        "clear-cache" => ReplCommand::ClearCache,
        "clear" | "reset" => ReplCommand::Clear,
        "model" => ReplCommand::Model(arg),
        _ => ReplCommand::Unknown(name),
    })
}

/// Help text for the interactive session
pub const REPL_HELP: &[(&str, &str)] = &[
    ("/help", "Show this help"),
    ("/queue", "Show pending tool requests and cache size"),
    ("/clear-cache", "Drop cached tool results"),
    ("/clear", "Start a fresh conversation"),
    ("/model [name]", "Show or switch the model"),
    ("/exit", "Leave the session"),
];
