// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::error::{GrokitError, Result};

use super::Settings;

/// Longest wait any resilience setting may ask for: one day
pub const MAX_DELAY_SECS: f64 = 86_400.0;

impl Settings {
    /// Get the API key, checking the env var first.
    pub fn get_api_key(&self) -> Option<String> {
        // Priority: env var > config file.
        std::env::var(&self.api.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.api.api_key.clone())
    }

    /// Brave Search key, same precedence as [`Settings::get_api_key`].
    /// `None` leaves the `brave_search` tool unadvertised.
    pub fn get_brave_api_key(&self) -> Option<String> {
        std::env::var(&self.api.brave_api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.api.brave_api_key.clone())
            .filter(|key| !key.trim().is_empty())
    }

    /// Reject configurations the scheduler and retry policy cannot honour.
    pub fn validate(&self) -> Result<()> {
        let scheduler = &self.scheduler;

        if scheduler.batch_size == 0 {
            return Err(GrokitError::Config(
                "scheduler.batch_size must be at least 1".to_string(),
            ));
        }

        // A cached write would be replayed instead of executed.
        if let Some(op) = scheduler
            .cacheable_operations
            .intersection(&scheduler.destructive_operations)
            .next()
        {
            return Err(GrokitError::Config(format!(
                "operation '{}' cannot be both cacheable and destructive",
                op
            )));
        }

        let resilience = &self.resilience;
        if resilience.chat_rate_limit_budget == 0 || resilience.dispatch_rate_limit_budget == 0 {
            return Err(GrokitError::Config(
                "rate limit budgets must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("backoff_base_secs", resilience.backoff_base_secs),
            ("backoff_max_secs", resilience.backoff_max_secs),
            ("jitter_max_secs", resilience.jitter_max_secs),
            ("server_error_step_secs", resilience.server_error_step_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(GrokitError::Config(format!(
                    "resilience.{} must be a non-negative number",
                    name
                )));
            }
            if value > MAX_DELAY_SECS {
                return Err(GrokitError::Config(format!(
                    "resilience.{} must not exceed {} seconds",
                    name, MAX_DELAY_SECS
                )));
            }
        }

        if self.defaults.max_tool_rounds == 0 {
            return Err(GrokitError::Config(
                "defaults.max_tool_rounds must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
