// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool execution
//!
//! The scheduler hands work to a [`ToolExecutor`]. Ordinary tool failures
//! (missing file, bad parameter) are `Ok(ToolOutcome::Error)` and go back to
//! the model; `Err` is reserved for failures the retry policy classifies,
//! such as a remote executor answering 429.

pub mod definition;
pub mod local;
pub mod search;
mod shell;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::llm::provider::ToolDefinition;
use crate::scheduler::cache::Resource;

pub use definition::SchemaBuilder;
pub use local::LocalToolExecutor;
pub use search::BraveSearch;

/// One request for a tool to run
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub operation: String,
    pub params: Value,
}

impl ToolInvocation {
    pub fn new(operation: impl Into<String>, params: Value) -> Self {
        Self {
            operation: operation.into(),
            params,
        }
    }

    /// String parameter, if present
    pub fn str_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }
}

/// Result of a tool run as the model will see it
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Error(String),
}

impl ToolOutcome {
    pub fn success(payload: Value) -> Self {
        ToolOutcome::Success(payload)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolOutcome::Error(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }

    /// `{"success": true, ...payload}` or `{"error": "..."}`
    pub fn to_json(&self) -> Value {
        match self {
            ToolOutcome::Success(Value::Object(fields)) => {
                let mut object = serde_json::Map::with_capacity(fields.len() + 1);
                object.insert("success".to_string(), Value::Bool(true));
                for (key, value) in fields {
                    if key != "success" {
                        object.insert(key.clone(), value.clone());
                    }
                }
                Value::Object(object)
            }
            ToolOutcome::Success(other) => json!({"success": true, "result": other}),
            ToolOutcome::Error(message) => json!({"error": message}),
        }
    }

    /// Content of the `tool` message
    pub fn render(&self) -> String {
        self.to_json().to_string()
    }
}

/// Runs tool invocations
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools advertised to the model
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// What an invocation reads or changes, spelled the way this executor
    /// resolves it. `None` means it cannot be pinned to one path.
    fn resource_of(&self, operation: &str, params: &Value) -> Option<Resource> {
        Resource::of(operation, params)
    }

    /// Run one invocation
    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutcome>;

    /// Run several invocations as one call, outcomes in input order
    async fn execute_batch(&self, batch: &[ToolInvocation]) -> Result<Vec<ToolOutcome>> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for invocation in batch {
            outcomes.push(self.execute(invocation).await?);
        }
        Ok(outcomes)
    }
}
