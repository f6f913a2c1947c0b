// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for grokit
//!
//! Handles loading and saving settings from ~/.grokit/settings.json

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

mod io;
mod validation;

/// Main settings structure, stored in ~/.grokit/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Chat API endpoint and credentials
    #[serde(default)]
    pub api: ApiConfig,

    /// Default settings for new sessions
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Retry budgets and backoff constants
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Tool request queueing, caching and pacing
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Chat API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Chat completions endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout in seconds; also the longest a stream may
    /// go without delivering a chunk
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Brave Search API key (if stored directly)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brave_api_key: Option<String>,

    /// Environment variable name for the Brave Search API key
    #[serde(default = "default_brave_api_key_env")]
    pub brave_api_key_env: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_env: default_api_key_env(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            brave_api_key: None,
            brave_api_key_env: default_brave_api_key_env(),
        }
    }
}

/// Defaults applied to each session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Whether to stream responses
    #[serde(default = "default_true")]
    pub stream: bool,

    /// Upper bound on model rounds per user message
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Optional system prompt prepended to every conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            stream: true,
            max_tool_rounds: default_max_tool_rounds(),
            system_prompt: None,
        }
    }
}

/// Retry and backoff configuration for outbound calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// 429 budget for the primary chat call
    #[serde(default = "default_chat_rate_limit_budget")]
    pub chat_rate_limit_budget: u32,

    /// 429 budget for scheduler dispatch calls
    #[serde(default = "default_dispatch_rate_limit_budget")]
    pub dispatch_rate_limit_budget: u32,

    /// 5xx budget, shared value but separately counted per call
    #[serde(default = "default_server_error_budget")]
    pub server_error_budget: u32,

    /// Backoff base in seconds (doubled per attempt)
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: f64,

    /// Backoff ceiling in seconds
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: f64,

    /// Upper bound (exclusive) of the uniform jitter in seconds
    #[serde(default = "default_jitter_max_secs")]
    pub jitter_max_secs: f64,

    /// Linear step for 5xx waits in seconds
    #[serde(default = "default_server_error_step_secs")]
    pub server_error_step_secs: f64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            chat_rate_limit_budget: default_chat_rate_limit_budget(),
            dispatch_rate_limit_budget: default_dispatch_rate_limit_budget(),
            server_error_budget: default_server_error_budget(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            jitter_max_secs: default_jitter_max_secs(),
            server_error_step_secs: default_server_error_step_secs(),
        }
    }
}

/// Tool request scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minimum spacing between two dispatches, in milliseconds
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Maximum requests taken per drain
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Spacing between individually dispatched requests, in milliseconds
    #[serde(default = "default_inter_request_delay_ms")]
    pub inter_request_delay_ms: u64,

    /// Operations whose successful results may be served from cache
    #[serde(default = "default_cacheable_operations")]
    pub cacheable_operations: BTreeSet<String>,

    /// Operations that may share one batched executor call
    #[serde(default = "default_batchable_operations")]
    pub batchable_operations: BTreeSet<String>,

    /// Operations that mutate the resource they name
    #[serde(default = "default_destructive_operations")]
    pub destructive_operations: BTreeSet<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            batch_size: default_batch_size(),
            inter_request_delay_ms: default_inter_request_delay_ms(),
            cacheable_operations: default_cacheable_operations(),
            batchable_operations: default_batchable_operations(),
            destructive_operations: default_destructive_operations(),
        }
    }
}

impl SchedulerConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_millis(self.inter_request_delay_ms)
    }
}

fn default_base_url() -> String {
    "https://api.x.ai/v1/chat/completions".to_string()
}

fn default_api_key_env() -> String {
    "XAI_API_KEY".to_string()
}

fn default_brave_api_key_env() -> String {
    "BRAVE_API_KEY".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_model() -> String {
    "grok-4".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_tool_rounds() -> u32 {
    10
}

fn default_chat_rate_limit_budget() -> u32 {
    10
}

fn default_dispatch_rate_limit_budget() -> u32 {
    8
}

fn default_server_error_budget() -> u32 {
    3
}

fn default_backoff_base_secs() -> f64 {
    5.0
}

fn default_backoff_max_secs() -> f64 {
    60.0
}

fn default_jitter_max_secs() -> f64 {
    3.0
}

fn default_server_error_step_secs() -> f64 {
    5.0
}

fn default_min_delay_ms() -> u64 {
    500
}

fn default_batch_size() -> usize {
    5
}

fn default_inter_request_delay_ms() -> u64 {
    100
}

fn operation_set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn default_cacheable_operations() -> BTreeSet<String> {
    operation_set(&["read_file", "list_files", "list_files_recursive"])
}

fn default_batchable_operations() -> BTreeSet<String> {
    operation_set(&["read_file", "list_files", "create_file"])
}

fn default_destructive_operations() -> BTreeSet<String> {
    operation_set(&[
        "create_file",
        "append_to_file",
        "delete_file",
        "str_replace",
        "run_shell",
    ])
}
