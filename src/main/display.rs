// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io::{self, Write};

use crossterm::{
    style::{Color, ResetColor, SetForegroundColor},
    ExecutableCommand,
};
use serde_json::Value;

use grokit::chat::TurnObserver;
use grokit::cli::REPL_HELP;
use grokit::error::Result;
use grokit::llm::retry::{RetryClass, RetryNotice};
use grokit::tools::ToolOutcome;

/// Terminal rendering of a turn
#[derive(Debug, Default)]
pub(super) struct TerminalObserver {
    prefix_printed: bool,
}

impl TerminalObserver {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Call before each turn so the `grok` prefix is printed again
    pub(super) fn reset(&mut self) {
        self.prefix_printed = false;
    }

    fn ensure_prefix(&mut self) -> Result<()> {
        if self.prefix_printed {
            return Ok(());
        }
        let mut stdout = io::stdout();
        stdout.execute(SetForegroundColor(Color::Cyan))?;
        print!("\ngrok: ");
        stdout.execute(ResetColor)?;
        self.prefix_printed = true;
        Ok(())
    }
}

impl TurnObserver for TerminalObserver {
    fn on_text_delta(&mut self, text: &str) -> Result<()> {
        self.ensure_prefix()?;
        print!("{text}");
        io::stdout().flush()?;
        Ok(())
    }

    fn on_rate_limited(&mut self, notice: &RetryNotice) {
        print_retry_notice("API", notice);
    }

    fn on_tool_invocation(&mut self, tool_name: &str, input: &Value) -> Result<()> {
        // Tool output starts on its own line after any streamed text
        if self.prefix_printed {
            println!();
            self.prefix_printed = false;
        }

        let mut stdout = io::stdout();
        stdout.execute(SetForegroundColor(Color::DarkGrey))?;
        print!("  ╭─ ");
        stdout.execute(SetForegroundColor(Color::Magenta))?;
        print!("{tool_name}");

        let target = ["filename", "directory", "path"]
            .iter()
            .find_map(|key| input.get(*key).and_then(Value::as_str));
        if let Some(target) = target {
            stdout.execute(SetForegroundColor(Color::DarkGrey))?;
            print!(" → ");
            stdout.execute(SetForegroundColor(Color::Blue))?;
            print!("{target}");
        }
        println!();

        stdout.execute(ResetColor)?;
        stdout.flush()?;
        Ok(())
    }

    fn on_tool_result(&mut self, tool_name: &str, outcome: &ToolOutcome) -> Result<()> {
        let mut stdout = io::stdout();
        stdout.execute(SetForegroundColor(Color::DarkGrey))?;
        print!("  ╰─ ");

        match outcome {
            ToolOutcome::Error(message) => {
                stdout.execute(SetForegroundColor(Color::Red))?;
                println!("✗ {tool_name}: {}", truncate(message, 100));
            }
            ToolOutcome::Success(_) => {
                stdout.execute(SetForegroundColor(Color::Green))?;
                println!("✓ {tool_name}");
            }
        }

        stdout.execute(ResetColor)?;
        stdout.flush()?;
        Ok(())
    }
}

/// Yellow progress line before a retry wait
pub(super) fn print_retry_notice(what: &str, notice: &RetryNotice) {
    let reason = match notice.class {
        RetryClass::RateLimit => "rate limited",
        RetryClass::ServerError => "server error",
        RetryClass::Transport => "transport error",
    };

    let mut stdout = io::stdout();
    let _ = stdout.execute(SetForegroundColor(Color::Yellow));
    println!(
        "\n  ⏳ {what} {reason}, waiting {:.1}s (attempt {}/{})",
        notice.delay.as_secs_f64(),
        notice.attempt,
        notice.budget
    );
    let _ = stdout.execute(ResetColor);
    let _ = stdout.flush();
}

pub(super) fn print_error(message: &str) -> Result<()> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::Red))?;
    println!("\nError: {message}");
    stdout.execute(ResetColor)?;
    Ok(())
}

pub(super) fn print_notice(message: &str) -> Result<()> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::DarkGrey))?;
    println!("{message}");
    stdout.execute(ResetColor)?;
    Ok(())
}

pub(super) fn print_welcome(model: &str, root: &str) -> Result<()> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::Cyan))?;
    print!("grokit");
    stdout.execute(ResetColor)?;
    println!(" v{}", env!("CARGO_PKG_VERSION"));
    print_notice(&format!("model {model}, tools in {root}"))?;
    print_notice("Type /help for commands, /exit to leave.\n")?;
    Ok(())
}

pub(super) fn print_help() -> Result<()> {
    let mut stdout = io::stdout();
    for (command, description) in REPL_HELP {
        stdout.execute(SetForegroundColor(Color::Green))?;
        print!("  {command:<16}");
        stdout.execute(ResetColor)?;
        println!("{description}");
    }
    Ok(())
}

pub(super) fn read_user_input() -> Result<Option<String>> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::Green))?;
    print!("\nyou: ");
    stdout.execute(ResetColor)?;
    stdout.flush()?;

    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        // EOF
        return Ok(None);
    }
    Ok(Some(input.trim().to_string()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.chars().count() <= max_chars {
        return first_line.to_string();
    }
    let kept: String = first_line.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}
