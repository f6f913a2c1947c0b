// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{GrokitError, Result};

use super::Settings;

impl Settings {
    /// `settings.json` under [`Settings::grokit_home`]
    pub fn default_path() -> PathBuf {
        Self::grokit_home().join("settings.json")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Read settings from `path`. A missing file yields defaults; a file
    /// that does not parse is a configuration error naming the path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content)
            .map_err(|e| GrokitError::Config(format!("{}: {e}", path.display())))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Write settings to `path`.
    ///
    /// Keys this version does not know about are carried over from the
    /// existing file. The file is replaced by rename so a crash never leaves
    /// it half written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut document = std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str::<Value>(&content).ok())
            .unwrap_or(Value::Null);
        overlay(&mut document, serde_json::to_value(self)?);

        let staging = path.with_extension("json.tmp");
        std::fs::write(&staging, serde_json::to_string_pretty(&document)?)?;
        std::fs::rename(&staging, path)?;
        Ok(())
    }

    /// `$GROKIT_HOME`, else `~/.grokit`
    pub fn grokit_home() -> PathBuf {
        std::env::var_os("GROKIT_HOME")
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".grokit")))
            .unwrap_or_else(|| PathBuf::from(".grokit"))
    }
}

/// Write `update` over `target`, descending into objects present in both
fn overlay(target: &mut Value, update: Value) {
    match (target, update) {
        (Value::Object(existing), Value::Object(fields)) => {
            for (key, value) in fields {
                match existing.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
