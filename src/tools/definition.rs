// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool definition helpers

use serde_json::{json, Map, Value};

use crate::llm::provider::{ToolDefinition, ToolInputSchema};

/// Builds the JSON schema of a tool's parameters
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn property(mut self, name: &str, schema: Value, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    /// Add a string property
    pub fn string(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({"type": "string", "description": description}),
            required,
        )
    }

    /// Add a string property with a default value
    pub fn string_with_default(self, name: &str, description: &str, default: &str) -> Self {
        self.property(
            name,
            json!({"type": "string", "description": description, "default": default}),
            false,
        )
    }

    /// Add an array-of-strings property
    pub fn string_array(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({"type": "array", "description": description, "items": {"type": "string"}}),
            required,
        )
    }

    pub fn build(self) -> ToolInputSchema {
        ToolInputSchema {
            schema_type: "object".to_string(),
            properties: Value::Object(self.properties),
            required: self.required,
        }
    }
}

/// Shorthand for a complete definition
pub fn tool(name: &str, description: &str, schema: SchemaBuilder) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: schema.build(),
    }
}
