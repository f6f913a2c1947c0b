// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! grokit - chat with xAI models from your terminal
//!
//! Entry point for the grokit CLI application.

use clap::Parser;

use grokit::cli::{ChatArgs, Cli, Commands};
use grokit::config::Settings;
use grokit::error::Result;

#[path = "main/commands.rs"]
mod commands;
#[path = "main/display.rs"]
mod display;

use commands::{run_ask, run_chat, run_config, run_models};

fn init_tracing(verbose: u8) {
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    // `-v` turns on grokit's own targets; `RUST_LOG` still applies on top.
    let level = match verbose {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    };
    if let Some(level) = level {
        for target in [
            "grokit.chat.engine",
            "grokit.stream",
            "grokit.scheduler",
            "grokit.llm.retry",
            "grokit.llm.client",
            "grokit.tools.shell",
            "grokit.tools.search",
        ] {
            if let Ok(parsed) = format!("{target}={level}").parse() {
                env_filter = env_filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let settings = Settings::load_from(&settings_path)?;
    settings.validate()?;

    let directory = cli.directory.as_deref();
    match cli.command {
        None => run_chat(ChatArgs::default(), settings, directory).await?,
        Some(Commands::Chat(args)) => run_chat(args, settings, directory).await?,
        Some(Commands::Ask(args)) => run_ask(args, settings, directory).await?,
        Some(Commands::Models) => run_models(&settings).await?,
        Some(Commands::Config(command)) => run_config(command, &settings, &settings_path)?,
    }

    Ok(())
}
