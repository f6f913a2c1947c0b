// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// grokit - chat with xAI models from your terminal
#[derive(Parser, Debug)]
#[command(name = "grokit")]
#[command(version, about = "Chat with xAI models from your terminal")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory the file tools operate in (defaults to current)
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<PathBuf>,

    /// Settings file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive chat session (default when no command given)
    Chat(ChatArgs),

    /// Ask a single question and exit
    Ask(AskArgs),

    /// List models available to the configured API key
    Models,

    /// Inspect or initialise the settings file
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Options shared by chat and ask
#[derive(clap::Args, Debug, Default, Clone)]
pub struct TurnOptions {
    /// Model to use
    #[arg(short, long)]
    pub model: Option<String>,

    /// Disable streaming output
    #[arg(long)]
    pub no_stream: bool,

    /// Upper bound on model rounds per message
    #[arg(long, value_name = "N")]
    pub max_rounds: Option<u32>,
}

/// Arguments for the chat subcommand
#[derive(clap::Args, Debug, Default)]
pub struct ChatArgs {
    /// Initial prompt (optional)
    pub prompt: Option<String>,

    #[command(flatten)]
    pub options: TurnOptions,
}

/// Arguments for the ask subcommand
#[derive(clap::Args, Debug)]
pub struct AskArgs {
    /// The question to ask
    pub prompt: String,

    #[command(flatten)]
    pub options: TurnOptions,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Print the effective settings as JSON
    Show,
    /// Print the settings file location
    Path,
    /// Write a settings file with defaults if none exists
    Init,
}
