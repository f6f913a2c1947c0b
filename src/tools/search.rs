// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! `brave_search`: web search through the Brave Search API
//!
//! A 429 or 5xx from Brave is returned as `Err` so the scheduler's dispatch
//! retry backs off. Anything else that goes wrong is a tool error the model
//! can read.

use reqwest::Client;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

use crate::error::{ApiError, Result};
use crate::llm::provider::ToolDefinition;
use crate::llm::retry::parse_retry_after;
use crate::tools::definition::{tool, SchemaBuilder};
use crate::tools::ToolOutcome;

pub const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct BraveSearch {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl fmt::Debug for BraveSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BraveSearch")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl BraveSearch {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(SEARCH_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: BRAVE_SEARCH_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn definition() -> ToolDefinition {
        tool(
            "brave_search",
            "Search the web for current information.",
            SchemaBuilder::new().string("query", "The search query", true),
        )
    }

    pub async fn search(&self, params: &Value) -> Result<ToolOutcome> {
        let Some(query) = params
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
        else {
            return Ok(ToolOutcome::error("Missing required parameter 'query'"));
        };

        tracing::debug!(target: "grokit.tools.search", query, "brave search");

        let response = match self
            .client
            .get(&self.endpoint)
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("q", query)])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Ok(ToolOutcome::error("Search timed out")),
            Err(e) => return Ok(ToolOutcome::error(format!("Search failed: {e}"))),
        };

        let status = response.status().as_u16();
        match status {
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|raw| parse_retry_after(raw, chrono::Utc::now()));
                Err(ApiError::RateLimited { retry_after }.into())
            }
            500..=599 => {
                let message = response.text().await.unwrap_or_default();
                Err(ApiError::ServerError { status, message }.into())
            }
            200..=299 => match response.json::<Value>().await {
                Ok(body) => Ok(ToolOutcome::success(summarize(body))),
                Err(e) => Ok(ToolOutcome::error(format!("Unreadable search response: {e}"))),
            },
            _ => Ok(ToolOutcome::error(format!("Search failed with status {status}"))),
        }
    }
}

/// Keep title, url and description of each web result; other bodies pass
/// through untouched
fn summarize(body: Value) -> Value {
    let Some(results) = body.pointer("/web/results").and_then(Value::as_array) else {
        return body;
    };

    let results: Vec<Value> = results
        .iter()
        .map(|result| {
            json!({
                "title": result.get("title").cloned().unwrap_or(Value::Null),
                "url": result.get("url").cloned().unwrap_or(Value::Null),
                "description": result.get("description").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();
    json!({"results": results})
}
