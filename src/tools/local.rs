// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Filesystem tools run in-process
//!
//! Reads may name any path. Writes, appends, deletes and replacements are
//! confined to the source directory the executor was created with.

use async_trait::async_trait;
use ignore::WalkBuilder;
use serde_json::{json, Map, Value};
use std::path::{Component, Path, PathBuf};

use crate::error::Result;
use crate::llm::provider::ToolDefinition;
use crate::scheduler::cache::Resource;
use crate::tools::definition::{tool, SchemaBuilder};
use crate::tools::search::BraveSearch;
use crate::tools::{shell, ToolExecutor, ToolInvocation, ToolOutcome};

/// Executes the built-in file tools against a source directory
#[derive(Debug, Clone)]
pub struct LocalToolExecutor {
    root: PathBuf,
    search: Option<BraveSearch>,
}

impl LocalToolExecutor {
    /// A relative root is taken against the current directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&root))
                .unwrap_or(root)
        };
        Self {
            root: normalize(&root),
            search: None,
        }
    }

    /// Also offer `brave_search`
    pub fn with_search(mut self, search: BraveSearch) -> Self {
        self.search = Some(search);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a model-supplied path against the source directory
    pub(crate) fn resolve(&self, filename: &str) -> PathBuf {
        let path = Path::new(filename);
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        normalize(&joined)
    }

    /// Resolve a path that will be modified; must stay inside the root
    pub(crate) fn resolve_confined(&self, filename: &str) -> std::result::Result<PathBuf, ToolOutcome> {
        let path = self.resolve(filename);
        if path.starts_with(&self.root) {
            Ok(path)
        } else {
            Err(ToolOutcome::error(format!(
                "Cannot modify '{filename}' outside source directory"
            )))
        }
    }

    fn read_file(&self, params: &Value) -> ToolOutcome {
        let filename = match required_str(params, "filename") {
            Ok(filename) => filename,
            Err(outcome) => return outcome,
        };
        read_one(&self.resolve(filename), filename)
    }

    fn batch_read_files(&self, params: &Value) -> ToolOutcome {
        let Some(filenames) = params.get("filenames").and_then(Value::as_array) else {
            return ToolOutcome::error("Missing required parameter 'filenames'");
        };

        let mut results = Map::new();
        for filename in filenames.iter().filter_map(Value::as_str) {
            let outcome = read_one(&self.resolve(filename), filename);
            results.insert(filename.to_string(), outcome.to_json());
        }
        ToolOutcome::success(json!({"results": results}))
    }

    fn list_files(&self, params: &Value) -> ToolOutcome {
        let directory = params
            .get("directory")
            .and_then(Value::as_str)
            .unwrap_or(".");
        let path = self.resolve(directory);

        let entries = match std::fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) => return ToolOutcome::error(format!("Cannot list '{directory}': {e}")),
        };

        let mut files: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        files.sort();

        ToolOutcome::success(json!({"directory": directory, "files": files}))
    }

    fn list_files_recursive(&self, params: &Value) -> ToolOutcome {
        let directory = params
            .get("directory")
            .and_then(Value::as_str)
            .unwrap_or(".");
        let base = self.resolve(directory);
        if !base.is_dir() {
            return ToolOutcome::error(format!("Directory '{directory}' not found"));
        }

        let mut walker = WalkBuilder::new(&base);
        walker
            .hidden(false)
            .parents(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .require_git(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(|entry| entry.file_name() != ".git");

        let files: Vec<String> = walker
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&base)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .collect();

        ToolOutcome::success(json!({"directory": directory, "files": files}))
    }

    fn create_file(&self, params: &Value) -> ToolOutcome {
        let filename = match required_str(params, "filename") {
            Ok(filename) => filename,
            Err(outcome) => return outcome,
        };
        let content = params.get("content").and_then(Value::as_str).unwrap_or("");
        let path = match self.resolve_confined(filename) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolOutcome::error(format!("Cannot create directory: {e}"));
            }
        }
        match std::fs::write(&path, content) {
            Ok(()) => ToolOutcome::success(json!({"message": format!("Created file '{filename}'")})),
            Err(e) => ToolOutcome::error(format!("Cannot write '{filename}': {e}")),
        }
    }

    fn append_to_file(&self, params: &Value) -> ToolOutcome {
        use std::io::Write;

        let filename = match required_str(params, "filename") {
            Ok(filename) => filename,
            Err(outcome) => return outcome,
        };
        let content = match required_str(params, "content") {
            Ok(content) => content,
            Err(outcome) => return outcome,
        };
        let path = match self.resolve_confined(filename) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(content.as_bytes()));
        match result {
            Ok(()) => {
                ToolOutcome::success(json!({"message": format!("Appended to file '{filename}'")}))
            }
            Err(e) => ToolOutcome::error(format!("Cannot append to '{filename}': {e}")),
        }
    }

    fn delete_file(&self, params: &Value) -> ToolOutcome {
        let filename = match required_str(params, "filename") {
            Ok(filename) => filename,
            Err(outcome) => return outcome,
        };
        let path = match self.resolve_confined(filename) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };

        if !path.is_file() {
            return ToolOutcome::error(format!("File '{filename}' not found"));
        }
        match std::fs::remove_file(&path) {
            Ok(()) => ToolOutcome::success(json!({"message": format!("Deleted file '{filename}'")})),
            Err(e) => ToolOutcome::error(format!("Cannot delete '{filename}': {e}")),
        }
    }

    fn str_replace(&self, params: &Value) -> ToolOutcome {
        let (filename, old_str, new_str) = match (
            required_str(params, "filename"),
            required_str(params, "old_str"),
            required_str(params, "new_str"),
        ) {
            (Ok(f), Ok(o), Ok(n)) => (f, o, n),
            (Err(outcome), _, _) | (_, Err(outcome), _) | (_, _, Err(outcome)) => return outcome,
        };
        let path = match self.resolve_confined(filename) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return ToolOutcome::error(format!("File '{filename}' not found")),
        };
        if old_str.is_empty() || !content.contains(old_str) {
            return ToolOutcome::error(format!("String '{old_str}' not found in file"));
        }

        let replacements = content.matches(old_str).count();
        match std::fs::write(&path, content.replace(old_str, new_str)) {
            Ok(()) => ToolOutcome::success(json!({
                "message": format!("Replaced string in '{filename}'"),
                "replacements": replacements,
            })),
            Err(e) => ToolOutcome::error(format!("Cannot write '{filename}': {e}")),
        }
    }
}

#[async_trait]
impl ToolExecutor for LocalToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = vec![
            tool(
                "read_file",
                "Read the complete content of a file. Use it to examine code, configs and logs.",
                SchemaBuilder::new().string(
                    "filename",
                    "The name of the file to read (relative or absolute path)",
                    true,
                ),
            ),
            tool(
                "batch_read_files",
                "Read multiple files in one operation.",
                SchemaBuilder::new().string_array(
                    "filenames",
                    "List of filenames to read (relative or absolute paths)",
                    true,
                ),
            ),
            tool(
                "list_files",
                "List the entries of a single directory. Directories end with '/'.",
                SchemaBuilder::new().string_with_default(
                    "directory",
                    "Directory to list (default: current directory)",
                    ".",
                ),
            ),
            tool(
                "list_files_recursive",
                "List all files below a directory, skipping paths ignored by .gitignore.",
                SchemaBuilder::new().string_with_default(
                    "directory",
                    "Directory to start from (default: current directory)",
                    ".",
                ),
            ),
            tool(
                "create_file",
                "Create a file with the given content, replacing any existing file.",
                SchemaBuilder::new()
                    .string(
                        "filename",
                        "The name of the file to create (relative or absolute path)",
                        true,
                    )
                    .string("content", "The content to write to the file", false),
            ),
            tool(
                "append_to_file",
                "Append content to the end of a file, creating it if missing.",
                SchemaBuilder::new()
                    .string("filename", "The file to append to", true)
                    .string("content", "The content to append", true),
            ),
            tool(
                "delete_file",
                "Delete a file.",
                SchemaBuilder::new().string("filename", "The file to delete", true),
            ),
            tool(
                "str_replace",
                "Replace every occurrence of a string in a file.",
                SchemaBuilder::new()
                    .string("filename", "The file to edit", true)
                    .string("old_str", "Exact text to replace", true)
                    .string("new_str", "Replacement text", true),
            ),
            tool(
                "run_shell",
                "Run a file command: cat, echo, touch, mkdir, rm, ls or pwd. \
                 Paths are taken against the source directory.",
                SchemaBuilder::new()
                    .string("command", "The command, optionally with its arguments", true)
                    .string_array("args", "Command arguments", false),
            ),
        ];
        if self.search.is_some() {
            definitions.push(BraveSearch::definition());
        }
        definitions
    }

    /// Paths resolved to absolute form under the source directory
    fn resource_of(&self, operation: &str, params: &Value) -> Option<Resource> {
        let resolved = |path: &str| self.resolve(path).to_string_lossy().into_owned();
        Some(match Resource::of(operation, params)? {
            Resource::File(path) => Resource::File(resolved(&path)),
            Resource::Directory(path) => Resource::Directory(resolved(&path)),
        })
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutcome> {
        let params = &invocation.params;
        let outcome = match invocation.operation.as_str() {
            "read_file" => self.read_file(params),
            "batch_read_files" => self.batch_read_files(params),
            "list_files" => self.list_files(params),
            "list_files_recursive" => self.list_files_recursive(params),
            "create_file" => self.create_file(params),
            "append_to_file" => self.append_to_file(params),
            "delete_file" => self.delete_file(params),
            "str_replace" => self.str_replace(params),
            "run_shell" => shell::run(self, params),
            "brave_search" => match &self.search {
                Some(search) => return search.search(params).await,
                None => ToolOutcome::error("Brave Search API key not configured"),
            },
            other => ToolOutcome::error(format!("Unknown tool: {other}")),
        };
        Ok(outcome)
    }
}

fn required_str<'a>(params: &'a Value, name: &str) -> std::result::Result<&'a str, ToolOutcome> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolOutcome::error(format!("Missing required parameter '{name}'")))
}

fn read_one(path: &Path, filename: &str) -> ToolOutcome {
    if !path.is_file() {
        return ToolOutcome::error(format!("File '{filename}' not found"));
    }
    match std::fs::read_to_string(path) {
        Ok(content) => ToolOutcome::success(json!({"content": content})),
        Err(e) => ToolOutcome::error(format!("Cannot read '{filename}': {e}")),
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalToolExecutor) {
        let temp_dir = TempDir::new().unwrap();
        let executor = LocalToolExecutor::new(temp_dir.path());
        (temp_dir, executor)
    }

    async fn run(executor: &LocalToolExecutor, operation: &str, params: Value) -> ToolOutcome {
        executor
            .execute(&ToolInvocation::new(operation, params))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_read_file() {
        let (temp_dir, executor) = setup();
        std::fs::write(temp_dir.path().join("a.txt"), "hello").unwrap();

        let outcome = run(&executor, "read_file", json!({"filename": "a.txt"})).await;
        assert_eq!(outcome.to_json(), json!({"success": true, "content": "hello"}));
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let (_temp_dir, executor) = setup();
        let outcome = run(&executor, "read_file", json!({"filename": "nope.txt"})).await;
        assert_eq!(outcome, ToolOutcome::error("File 'nope.txt' not found"));
    }

    #[tokio::test]
    async fn test_missing_parameter() {
        let (_temp_dir, executor) = setup();
        let outcome = run(&executor, "read_file", json!({})).await;
        assert_eq!(
            outcome,
            ToolOutcome::error("Missing required parameter 'filename'")
        );
    }

    #[tokio::test]
    async fn test_batch_read_files() {
        let (temp_dir, executor) = setup();
        std::fs::write(temp_dir.path().join("a.txt"), "A").unwrap();

        let outcome = run(
            &executor,
            "batch_read_files",
            json!({"filenames": ["a.txt", "b.txt"]}),
        )
        .await;
        let value = outcome.to_json();
        assert_eq!(value["results"]["a.txt"]["content"], "A");
        assert!(value["results"]["b.txt"]["error"].is_string());
    }

    #[tokio::test]
    async fn test_list_files() {
        let (temp_dir, executor) = setup();
        std::fs::write(temp_dir.path().join("b.txt"), "").unwrap();
        std::fs::create_dir(temp_dir.path().join("src")).unwrap();

        let outcome = run(&executor, "list_files", json!({})).await;
        assert_eq!(outcome.to_json()["files"], json!(["b.txt", "src/"]));
    }

    #[tokio::test]
    async fn test_list_files_recursive_respects_gitignore() {
        let (temp_dir, executor) = setup();
        let root = temp_dir.path();
        std::fs::write(root.join(".gitignore"), "# build output\ntarget/\n*.log\n").unwrap();
        std::fs::create_dir_all(root.join("src/nested")).unwrap();
        std::fs::create_dir_all(root.join("target/debug")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("src/main.rs"), "").unwrap();
        std::fs::write(root.join("src/nested/lib.rs"), "").unwrap();
        std::fs::write(root.join("target/debug/app"), "").unwrap();
        std::fs::write(root.join(".git/HEAD"), "").unwrap();
        std::fs::write(root.join("run.log"), "").unwrap();

        let outcome = run(&executor, "list_files_recursive", json!({"directory": "."})).await;
        assert_eq!(
            outcome.to_json()["files"],
            json!([".gitignore", "src/main.rs", "src/nested/lib.rs"])
        );
    }

    #[tokio::test]
    async fn test_list_files_recursive_honours_negation_and_subdirectories() {
        let (temp_dir, executor) = setup();
        let root = temp_dir.path();
        std::fs::write(root.join(".gitignore"), "*.log\n!keep.log\n").unwrap();
        std::fs::create_dir_all(root.join("src/gen")).unwrap();
        std::fs::write(root.join("src/.gitignore"), "gen/\n").unwrap();
        std::fs::write(root.join("src/gen/out.rs"), "").unwrap();
        std::fs::write(root.join("src/lib.rs"), "").unwrap();
        std::fs::write(root.join("drop.log"), "").unwrap();
        std::fs::write(root.join("keep.log"), "").unwrap();

        let outcome = run(&executor, "list_files_recursive", json!({})).await;
        assert_eq!(
            outcome.to_json()["files"],
            json!([".gitignore", "keep.log", "src/.gitignore", "src/lib.rs"])
        );

        // Rules from the parent still apply when listing a subdirectory
        std::fs::write(root.join("src/trace.log"), "").unwrap();
        let outcome = run(&executor, "list_files_recursive", json!({"directory": "src"})).await;
        assert_eq!(outcome.to_json()["files"], json!([".gitignore", "lib.rs"]));
    }

    #[tokio::test]
    async fn test_create_and_append_file() {
        let (temp_dir, executor) = setup();

        let outcome = run(
            &executor,
            "create_file",
            json!({"filename": "notes/todo.md", "content": "one\n"}),
        )
        .await;
        assert!(outcome.is_success());

        let outcome = run(
            &executor,
            "append_to_file",
            json!({"filename": "notes/todo.md", "content": "two\n"}),
        )
        .await;
        assert!(outcome.is_success());

        let content = std::fs::read_to_string(temp_dir.path().join("notes/todo.md")).unwrap();
        assert_eq!(content, "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_create_outside_root_rejected() {
        let (_temp_dir, executor) = setup();
        let outcome = run(
            &executor,
            "create_file",
            json!({"filename": "../escape.txt", "content": "x"}),
        )
        .await;
        assert!(!outcome.is_success());
        assert!(outcome.to_json()["error"]
            .as_str()
            .unwrap()
            .contains("outside source directory"));
    }

    #[tokio::test]
    async fn test_delete_file() {
        let (temp_dir, executor) = setup();
        std::fs::write(temp_dir.path().join("gone.txt"), "").unwrap();

        let outcome = run(&executor, "delete_file", json!({"filename": "gone.txt"})).await;
        assert!(outcome.is_success());
        assert!(!temp_dir.path().join("gone.txt").exists());

        let outcome = run(&executor, "delete_file", json!({"filename": "gone.txt"})).await;
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_str_replace() {
        let (temp_dir, executor) = setup();
        let path = temp_dir.path().join("main.rs");
        std::fs::write(&path, "let x = 1; let y = 1;").unwrap();

        let outcome = run(
            &executor,
            "str_replace",
            json!({"filename": "main.rs", "old_str": "1", "new_str": "2"}),
        )
        .await;
        assert_eq!(outcome.to_json()["replacements"], 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "let x = 2; let y = 2;");

        let outcome = run(
            &executor,
            "str_replace",
            json!({"filename": "main.rs", "old_str": "zzz", "new_str": "q"}),
        )
        .await;
        assert_eq!(outcome, ToolOutcome::error("String 'zzz' not found in file"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (_temp_dir, executor) = setup();
        let outcome = run(&executor, "launch_rocket", json!({})).await;
        assert_eq!(outcome, ToolOutcome::error("Unknown tool: launch_rocket"));
    }

    #[test]
    fn test_definitions_cover_every_tool() {
        let executor = LocalToolExecutor::new(".");
        let names: Vec<String> = executor.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names.len(), 9);
        assert!(names.contains(&"list_files_recursive".to_string()));
        assert!(names.contains(&"run_shell".to_string()));
        assert!(!names.contains(&"brave_search".to_string()));

        let executor = executor.with_search(BraveSearch::new("k").unwrap());
        let names: Vec<String> = executor.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names.len(), 10);
        assert_eq!(names.last().map(String::as_str), Some("brave_search"));
    }

    #[tokio::test]
    async fn test_search_without_key() {
        let (_temp_dir, executor) = setup();
        let outcome = run(&executor, "brave_search", json!({"query": "rust"})).await;
        assert_eq!(outcome, ToolOutcome::error("Brave Search API key not configured"));
    }

    #[tokio::test]
    async fn test_run_shell_dispatch() {
        let (temp_dir, executor) = setup();
        let outcome = run(&executor, "run_shell", json!({"command": "touch", "args": ["t.txt"]})).await;
        assert!(outcome.is_success());
        assert!(temp_dir.path().join("t.txt").is_file());
    }

    #[test]
    fn test_resource_of_resolves_against_root() {
        let (temp_dir, executor) = setup();
        let root = executor.root().to_string_lossy().to_string();
        let absolute = temp_dir.path().join("src/a.rs").to_string_lossy().to_string();

        let expected = Some(Resource::File(format!("{root}/src/a.rs")));
        assert_eq!(executor.resource_of("read_file", &json!({"filename": "src/a.rs"})), expected);
        assert_eq!(executor.resource_of("read_file", &json!({"filename": "./src//a.rs"})), expected);
        assert_eq!(executor.resource_of("read_file", &json!({"filename": absolute})), expected);

        assert_eq!(
            executor.resource_of("list_files", &json!({})),
            Some(Resource::Directory(root))
        );
        assert_eq!(executor.resource_of("run_shell", &json!({"command": "ls"})), None);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
    }
}
