// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat transport trait and related types

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::pin::Pin;

use crate::error::Result;
use crate::llm::message::Message;

/// Raw protocol lines from a streaming response, one SSE line per item
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Transport to a chat-completions endpoint
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Get the transport name
    fn name(&self) -> &str;

    /// Send a non-streaming request and decode the full body
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Open a streaming request. Rate-limit and status errors surface here,
    /// before any line is yielded.
    async fn open_stream(&self, request: &ChatRequest) -> Result<LineStream>;
}

/// Request to a chat-completions endpoint
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,

    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Available tools
    pub tools: Vec<ToolDefinition>,

    /// Whether to request a streamed response
    pub stream: bool,
}

impl ChatRequest {
    /// Create a new request
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: vec![],
            stream: false,
        }
    }

    /// Set available tools
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Set streaming
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Build the JSON request body
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "messages": self.messages,
            "model": self.model,
            "stream": self.stream,
        });

        if !self.tools.is_empty() {
            let tools: Vec<Value> = self.tools.iter().map(ToolDefinition::to_wire).collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = Value::String("auto".to_string());
        }

        body
    }
}

/// Uniform result of one model round, regardless of transport path
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Assistant text, concatenated in arrival order
    pub text: String,

    /// Finalized tool calls, including empty placeholders for index gaps
    pub tool_calls: Vec<ToolCall>,

    /// Token usage, when the server reported it
    pub usage: Option<Usage>,

    /// Why the model stopped
    pub finish_reason: Option<String>,

    /// Raw response body (non-streaming path only)
    pub raw: Option<Value>,
}

impl ChatResponse {
    /// Tool calls the engine should act on
    pub fn actionable_tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.tool_calls.iter().filter(|call| !call.is_placeholder())
    }

    pub fn has_tool_calls(&self) -> bool {
        self.actionable_tool_calls().next().is_some()
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Total tokens, derived when the server omitted it
    pub fn total(&self) -> u32 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.prompt_tokens + self.completion_tokens
        }
    }
}

/// A finalized tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Position in the response's tool call list
    pub index: usize,

    /// Call id; may be empty if the server never sent one
    pub id: String,

    /// Tool name
    pub name: String,

    /// Argument text exactly as accumulated from the stream
    pub raw_arguments: String,

    /// Parsed (possibly repaired) arguments
    pub arguments: ToolArguments,
}

impl ToolCall {
    /// A gap filler that never received any data
    pub fn is_placeholder(&self) -> bool {
        self.id.is_empty() && self.name.is_empty() && self.raw_arguments.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.arguments, ToolArguments::Parsed(_))
    }
}

/// Outcome of argument finalization
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArguments {
    Parsed(Value),
    Invalid { error: String },
}

impl ToolArguments {
    pub fn value(&self) -> Option<&Value> {
        match self {
            ToolArguments::Parsed(value) => Some(value),
            ToolArguments::Invalid { .. } => None,
        }
    }
}

/// Tool definition for the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,

    /// Tool description
    pub description: String,

    /// Input schema (JSON Schema)
    pub input_schema: ToolInputSchema,
}

impl ToolDefinition {
    /// OpenAI-compatible `{"type": "function", ...}` form
    pub fn to_wire(&self) -> Value {
        let mut parameters = json!({
            "type": self.input_schema.schema_type,
            "properties": self.input_schema.properties,
        });
        if !self.input_schema.required.is_empty() {
            parameters["required"] = json!(self.input_schema.required);
        }

        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": parameters,
            }
        })
    }
}

/// Input schema for a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchema {
    /// Schema type (always "object")
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Property definitions
    pub properties: Value,

    /// Required properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}
