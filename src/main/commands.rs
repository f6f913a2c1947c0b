// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use grokit::chat::{ChatEngine, TurnSummary};
use grokit::cli::{
    parse_repl_command, AskArgs, ChatArgs, ConfigCommand, ReplCommand, TurnOptions,
};
use grokit::config::Settings;
use grokit::error::{GrokitError, Result};
use grokit::llm::client::XaiClient;
use grokit::llm::retry::RetryNotice;
use grokit::scheduler::RequestScheduler;
use grokit::tools::{BraveSearch, LocalToolExecutor};

use crate::display::{
    print_error, print_help, print_notice, print_retry_notice, print_welcome, read_user_input,
    TerminalObserver,
};

type Engine = ChatEngine<LocalToolExecutor>;

/// Fold command-line overrides into the loaded settings
pub(super) fn apply_turn_options(settings: &mut Settings, options: &TurnOptions) {
    if let Some(model) = &options.model {
        settings.defaults.model = model.clone();
    }
    if options.no_stream {
        settings.defaults.stream = false;
    }
    if let Some(rounds) = options.max_rounds {
        settings.defaults.max_tool_rounds = rounds;
    }
}

pub(super) fn resolve_root(directory: Option<&Path>) -> Result<PathBuf> {
    match directory {
        Some(dir) if !dir.is_dir() => Err(GrokitError::InvalidInput(format!(
            "'{}' is not a directory",
            dir.display()
        ))),
        Some(dir) => Ok(dir.to_path_buf()),
        None => Ok(std::env::current_dir()?),
    }
}

fn require_api_key(settings: &Settings) -> Result<String> {
    settings.get_api_key().ok_or_else(|| {
        GrokitError::Config(format!(
            "no API key found; set {} or api.api_key in {}",
            settings.api.api_key_env,
            Settings::default_path().display()
        ))
    })
}

fn build_engine(settings: &Settings, root: &Path) -> Result<Engine> {
    let api_key = require_api_key(settings)?;
    let client = XaiClient::from_config(&settings.api, api_key)?;

    let mut executor = LocalToolExecutor::new(root);
    if let Some(brave_key) = settings.get_brave_api_key() {
        executor = executor.with_search(BraveSearch::new(brave_key)?);
    }

    let scheduler = RequestScheduler::from_settings(executor, settings)
        .with_wait_hook(Arc::new(|notice: &RetryNotice| {
            print_retry_notice("Tool dispatch", notice)
        }));

    Ok(ChatEngine::from_settings(Arc::new(client), scheduler, settings))
}

/// Run one turn; Ctrl+C asks the engine to stop at its next checkpoint
async fn run_interruptible(
    engine: &mut Engine,
    prompt: &str,
    observer: &mut TerminalObserver,
) -> Result<TurnSummary> {
    let flag = engine.interrupt_flag();
    observer.reset();

    let turn = engine.run_turn(prompt, observer);
    tokio::pin!(turn);

    loop {
        tokio::select! {
            result = &mut turn => return result,
            _ = tokio::signal::ctrl_c() => {
                flag.store(true, Ordering::SeqCst);
                print_notice("\nInterrupting after the current step...")?;
            }
        }
    }
}

fn report_summary(summary: &TurnSummary) -> Result<()> {
    println!();
    if summary.round_limit_reached {
        print_notice(&format!(
            "[stopped after {} rounds; the model still wanted tools]",
            summary.rounds
        ))?;
    }
    if let Some(usage) = &summary.usage {
        tracing::debug!(
            target: "grokit.chat.engine",
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "turn usage"
        );
    }
    Ok(())
}

pub(super) async fn run_ask(
    args: AskArgs,
    mut settings: Settings,
    directory: Option<&Path>,
) -> Result<()> {
    apply_turn_options(&mut settings, &args.options);
    let root = resolve_root(directory)?;
    let mut engine = build_engine(&settings, &root)?;
    let mut observer = TerminalObserver::new();

    let summary = run_interruptible(&mut engine, &args.prompt, &mut observer).await?;
    report_summary(&summary)
}

pub(super) async fn run_chat(
    args: ChatArgs,
    mut settings: Settings,
    directory: Option<&Path>,
) -> Result<()> {
    apply_turn_options(&mut settings, &args.options);
    let root = resolve_root(directory)?;
    let mut engine = build_engine(&settings, &root)?;
    let mut observer = TerminalObserver::new();

    print_welcome(engine.model(), &root.display().to_string())?;

    let mut pending_prompt = args.prompt;
    loop {
        let input = match pending_prompt.take() {
            Some(prompt) => prompt,
            None => match read_user_input()? {
                Some(input) => input,
                None => break,
            },
        };
        if input.is_empty() {
            continue;
        }

        if let Some(command) = parse_repl_command(&input) {
            match command {
                ReplCommand::Exit => break,
                ReplCommand::Help => print_help()?,
                ReplCommand::Queue => {
                    print_notice(&engine.scheduler().status().to_string())?;
                }
                ReplCommand::ClearCache => {
                    let dropped = engine.scheduler_mut().clear_cache();
                    print_notice(&format!("Dropped {dropped} cached results"))?;
                }
                ReplCommand::Clear => {
                    engine.reset();
                    print_notice("Conversation cleared")?;
                }
                ReplCommand::Model(None) => print_notice(engine.model())?,
                ReplCommand::Model(Some(model)) => {
                    engine = engine.with_model(model);
                    print_notice(&format!("Switched to {}", engine.model()))?;
                }
                ReplCommand::Unknown(name) => {
                    print_error(&format!("Unknown command '/{name}', try /help"))?;
                }
            }
            continue;
        }

        match run_interruptible(&mut engine, &input, &mut observer).await {
            Ok(summary) => report_summary(&summary)?,
            Err(GrokitError::Interrupted) => print_notice("\n[interrupted]")?,
            Err(e) => print_error(&e.to_string())?,
        }
    }

    Ok(())
}

pub(super) async fn run_models(settings: &Settings) -> Result<()> {
    let client = XaiClient::from_config(&settings.api, require_api_key(settings)?)?;
    for model in client.list_models().await? {
        println!("{model}");
    }
    Ok(())
}

pub(super) fn run_config(command: ConfigCommand, settings: &Settings, path: &Path) -> Result<()> {
    match command {
        ConfigCommand::Show => println!("{}", serde_json::to_string_pretty(settings)?),
        ConfigCommand::Path => println!("{}", path.display()),
        ConfigCommand::Init => {
            if path.exists() {
                print_notice(&format!("{} already exists", path.display()))?;
            } else {
                settings.save_to(path)?;
                println!("Wrote {}", path.display());
            }
        }
    }
    Ok(())
}
