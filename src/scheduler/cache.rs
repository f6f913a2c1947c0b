// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Session-scoped result cache
//!
//! Entries hold successful payloads only and live until a destructive
//! operation invalidates them. There is no TTL.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Instant;

use crate::tools::ToolOutcome;

/// SHA-256 hex digest identifying an operation and its parameters
pub type CacheKey = String;

/// Parameters that name a path
pub const PATH_PARAMS: [&str; 4] = ["filename", "path", "file", "directory"];

/// What a request's parameters point at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    File(String),
    Directory(String),
}

impl Resource {
    /// Derive the resource from an operation's parameters.
    ///
    /// Listing operations without a `directory` target the current one.
    pub fn of(operation: &str, params: &Value) -> Option<Self> {
        let text = |name: &str| params.get(name).and_then(Value::as_str);

        if let Some(path) = text("filename").or_else(|| text("path")).or_else(|| text("file")) {
            return Some(Resource::File(normalize_resource(path)));
        }
        if let Some(directory) = text("directory") {
            return Some(Resource::Directory(normalize_resource(directory)));
        }
        if operation.starts_with("list_files") {
            return Some(Resource::Directory(".".to_string()));
        }
        None
    }

    pub fn path(&self) -> &str {
        match self {
            Resource::File(path) | Resource::Directory(path) => path,
        }
    }

    /// Whether a change to `target` can make a result about `self` stale
    pub fn affected_by(&self, target: &Resource) -> bool {
        let changed = target.path();
        match self {
            Resource::File(path) => {
                path == changed
                    || matches!(target, Resource::Directory(_)) && is_ancestor(changed, path)
            }
            Resource::Directory(directory) => {
                directory == changed
                    || is_ancestor(directory, changed)
                    || matches!(target, Resource::Directory(_)) && is_ancestor(changed, directory)
            }
        }
    }
}

/// Lexical normal form: no `.` segments, no empty segments, no trailing `/`
pub fn normalize_resource(raw: &str) -> String {
    let absolute = raw.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Whether `directory` contains `path` at any depth
fn is_ancestor(directory: &str, path: &str) -> bool {
    if directory == "." {
        return !path.starts_with('/');
    }
    path == directory
        || path
            .strip_prefix(directory)
            .is_some_and(|rest| rest.starts_with('/') || directory.ends_with('/'))
}

/// Rewrite `value` with every object's keys in sorted order
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// `sha256(operation + ":" + canonical JSON)`, hex encoded
pub fn cache_key(operation: &str, params: &Value) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update(b":");
    hasher.update(canonicalize(params).to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Cache key with the path parameters replaced by the resolved resource, so
/// every spelling of one path shares an entry
pub fn resource_cache_key(operation: &str, params: &Value, resource: Option<&Resource>) -> CacheKey {
    match (resource, params) {
        (Some(resource), Value::Object(fields)) => {
            let mut keyed = fields.clone();
            for name in PATH_PARAMS {
                keyed.remove(name);
            }
            keyed.insert(
                "resource".to_string(),
                Value::String(resource.path().to_string()),
            );
            cache_key(operation, &Value::Object(keyed))
        }
        _ => cache_key(operation, params),
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub operation: String,
    pub resource: Option<Resource>,
    pub result: ToolOutcome,
    pub inserted_at: Instant,
}

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store a successful outcome; errors are never cached
    pub fn insert(
        &mut self,
        key: CacheKey,
        operation: &str,
        resource: Option<Resource>,
        result: ToolOutcome,
    ) {
        if !result.is_success() {
            return;
        }
        let entry = CacheEntry {
            key: key.clone(),
            operation: operation.to_string(),
            resource,
            result,
            inserted_at: Instant::now(),
        };
        self.entries.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything; returns how many entries went
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Drop entries a change to `target` could have made stale: entries for
    /// the same path, and listings of any directory containing it.
    pub fn invalidate(&mut self, target: &Resource) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry
                .resource
                .as_ref()
                .map_or(true, |cached| !cached.affected_by(target))
        });
        before - self.entries.len()
    }
}
