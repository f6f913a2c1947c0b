// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! `run_shell`: a handful of file commands interpreted in-process
//!
//! Nothing is handed to a real shell. Commands that change the filesystem
//! are confined to the source directory like the other write tools. There
//! is no `cd`; every path is taken against the source directory.

use serde_json::{json, Map, Value};
use std::path::Path;

use crate::tools::local::LocalToolExecutor;
use crate::tools::ToolOutcome;

const COMMANDS: [&str; 7] = ["cat", "echo", "touch", "mkdir", "rm", "ls", "pwd"];

/// Split `command` into a program and its arguments.
///
/// `{"command": "rm -rf build"}` and `{"command": "rm", "args": ["-rf",
/// "build"]}` are equivalent.
fn parse(params: &Value) -> std::result::Result<(String, Vec<String>), ToolOutcome> {
    let Some(command) = params.get("command").and_then(Value::as_str) else {
        return Err(ToolOutcome::error("Missing required parameter 'command'"));
    };

    let mut words = command.split_whitespace().map(str::to_string);
    let Some(program) = words.next() else {
        return Err(ToolOutcome::error("Empty command"));
    };

    let mut args: Vec<String> = words.collect();
    if let Some(extra) = params.get("args").and_then(Value::as_array) {
        args.extend(extra.iter().filter_map(Value::as_str).map(str::to_string));
    }
    Ok((program, args))
}

pub(crate) fn run(executor: &LocalToolExecutor, params: &Value) -> ToolOutcome {
    let (program, args) = match parse(params) {
        Ok(parsed) => parsed,
        Err(outcome) => return outcome,
    };

    tracing::debug!(target: "grokit.tools.shell", %program, args = args.len(), "run_shell");

    match program.as_str() {
        "cat" => cat(executor, &args),
        "echo" => ToolOutcome::success(json!({"command": "echo", "output": args.join(" ")})),
        "touch" => touch(executor, &args),
        "mkdir" => mkdir(executor, &args),
        "rm" => rm(executor, &args),
        "ls" => ls(executor, &args),
        "pwd" => ToolOutcome::success(json!({
            "command": "pwd",
            "directory": executor.root().to_string_lossy(),
        })),
        other => ToolOutcome::error(format!(
            "Command '{other}' not allowed. Available: {}",
            COMMANDS.join(", ")
        )),
    }
}

/// Per-path results wrapped the way every multi-path command reports them
fn report(command: &str, results: Map<String, Value>) -> ToolOutcome {
    ToolOutcome::success(json!({"command": command, "results": results}))
}

fn cat(executor: &LocalToolExecutor, args: &[String]) -> ToolOutcome {
    if args.is_empty() {
        return ToolOutcome::error("cat: missing file operand");
    }

    let mut results = Map::new();
    for filename in args {
        let outcome = match std::fs::read_to_string(executor.resolve(filename)) {
            Ok(content) => ToolOutcome::success(json!({"content": content})),
            Err(_) => ToolOutcome::error(format!("cat: {filename}: No such file or directory")),
        };
        results.insert(filename.clone(), outcome.to_json());
    }
    report("cat", results)
}

fn touch(executor: &LocalToolExecutor, args: &[String]) -> ToolOutcome {
    if args.is_empty() {
        return ToolOutcome::error("touch: missing file operand");
    }

    let mut results = Map::new();
    for filename in args {
        let outcome = match executor.resolve_confined(filename) {
            Ok(path) => match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                Ok(_) => ToolOutcome::success(json!({"message": format!("Touched '{filename}'")})),
                Err(e) => ToolOutcome::error(format!("touch: {filename}: {e}")),
            },
            Err(refused) => refused,
        };
        results.insert(filename.clone(), outcome.to_json());
    }
    report("touch", results)
}

fn mkdir(executor: &LocalToolExecutor, args: &[String]) -> ToolOutcome {
    let parents = args.iter().any(|a| a == "-p" || a == "--parents");
    let paths: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
    if paths.is_empty() {
        return ToolOutcome::error("mkdir: missing operand");
    }

    let mut results = Map::new();
    for name in paths {
        let outcome = match executor.resolve_confined(name) {
            Ok(path) => {
                let created = if parents {
                    std::fs::create_dir_all(&path)
                } else {
                    std::fs::create_dir(&path)
                };
                match created {
                    Ok(()) => ToolOutcome::success(
                        json!({"message": format!("Created directory '{name}'")}),
                    ),
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => ToolOutcome::error(
                        format!("mkdir: cannot create directory '{name}': File exists"),
                    ),
                    Err(e) => ToolOutcome::error(format!("mkdir: {name}: {e}")),
                }
            }
            Err(refused) => refused,
        };
        results.insert(name.clone(), outcome.to_json());
    }
    report("mkdir", results)
}

fn rm(executor: &LocalToolExecutor, args: &[String]) -> ToolOutcome {
    let mut recursive = false;
    let mut force = false;
    let mut paths = Vec::new();
    for arg in args {
        match arg.as_str() {
            "-r" | "-R" | "--recursive" => recursive = true,
            "-f" | "--force" => force = true,
            "-rf" | "-fr" => {
                recursive = true;
                force = true;
            }
            _ => paths.push(arg),
        }
    }
    if paths.is_empty() {
        return ToolOutcome::error("rm: missing operand");
    }

    let mut results = Map::new();
    for name in paths {
        let outcome = match executor.resolve_confined(name) {
            Ok(path) if path == executor.root() => Some(ToolOutcome::error(format!(
                "rm: refusing to remove '{name}'"
            ))),
            Ok(path) => remove(&path, name, recursive, force),
            Err(refused) => Some(refused),
        };
        if let Some(outcome) = outcome {
            results.insert(name.clone(), outcome.to_json());
        }
    }
    report("rm", results)
}

/// `None` when a forced removal finds nothing to remove
fn remove(path: &Path, name: &str, recursive: bool, force: bool) -> Option<ToolOutcome> {
    let removed = if path.is_file() {
        std::fs::remove_file(path).map(|()| format!("Removed file '{name}'"))
    } else if path.is_dir() {
        if !recursive {
            return Some(ToolOutcome::error(format!(
                "rm: cannot remove '{name}': Is a directory (use -r for recursive)"
            )));
        }
        std::fs::remove_dir_all(path).map(|()| format!("Removed directory '{name}'"))
    } else if force {
        return None;
    } else {
        return Some(ToolOutcome::error(format!(
            "rm: cannot remove '{name}': No such file or directory"
        )));
    };

    Some(match removed {
        Ok(message) => ToolOutcome::success(json!({"message": message})),
        Err(e) => ToolOutcome::error(format!("rm: {name}: {e}")),
    })
}

fn ls(executor: &LocalToolExecutor, args: &[String]) -> ToolOutcome {
    let target = args
        .iter()
        .find(|a| !a.starts_with('-'))
        .map(String::as_str)
        .unwrap_or(".");
    let path = executor.resolve(target);

    if path.is_file() {
        return ToolOutcome::success(json!({"command": "ls", "files": [target], "type": "file"}));
    }
    match std::fs::read_dir(&path) {
        Ok(entries) => {
            let mut files: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().to_string())
                .collect();
            files.sort();
            ToolOutcome::success(json!({"command": "ls", "files": files, "directory": target}))
        }
        Err(_) => ToolOutcome::error(format!(
            "ls: cannot access '{target}': No such file or directory"
        )),
    }
}
