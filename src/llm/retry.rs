// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Retry logic for outbound calls
//!
//! Rate limits (429) back off exponentially with jitter unless the server
//! says how long to wait. Server errors (5xx) back off linearly on a
//! separate counter. Everything else fails on the first attempt.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::settings::ResilienceConfig;
use crate::error::{ApiError, GrokitError, Result};

/// How a failed attempt is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// HTTP 429
    RateLimit,
    /// HTTP 5xx
    ServerError,
    /// Timeouts and connection failures, never retried
    Transport,
}

impl RetryClass {
    /// Classify an error. `None` means a terminal, non-transport failure
    /// such as bad credentials or a 4xx.
    pub fn of(error: &GrokitError) -> Option<Self> {
        match error {
            GrokitError::Api(api_error) => match api_error {
                ApiError::RateLimited { .. } => Some(RetryClass::RateLimit),
                ApiError::ServerError { status, .. } if *status >= 500 => {
                    Some(RetryClass::ServerError)
                }
                ApiError::Network(_) | ApiError::Timeout | ApiError::StreamError(_) => {
                    Some(RetryClass::Transport)
                }
                _ => None,
            },
            GrokitError::Http(_) => Some(RetryClass::Transport),
            _ => None,
        }
    }
}

/// Counters for one outbound call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pub rate_limit_attempts: u32,
    pub server_error_attempts: u32,
    pub classification: Option<RetryClass>,
}

/// What to do after a failed attempt
#[derive(Debug)]
pub enum RetryDecision {
    Wait(Duration),
    Fail(GrokitError),
}

/// Emitted before each wait so callers can show progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryNotice {
    pub class: RetryClass,
    pub attempt: u32,
    pub budget: u32,
    pub delay: Duration,
}

/// Budgets and backoff constants for one kind of call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub rate_limit_budget: u32,
    pub server_error_budget: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub jitter_max: Duration,
    pub server_error_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_chat(&ResilienceConfig::default())
    }
}

impl RetryPolicy {
    /// Policy for the primary chat-completion call
    pub fn for_chat(config: &ResilienceConfig) -> Self {
        Self::with_budget(config, config.chat_rate_limit_budget)
    }

    /// Policy for scheduler dispatch calls
    pub fn for_dispatch(config: &ResilienceConfig) -> Self {
        Self::with_budget(config, config.dispatch_rate_limit_budget)
    }

    fn with_budget(config: &ResilienceConfig, rate_limit_budget: u32) -> Self {
        Self {
            rate_limit_budget,
            server_error_budget: config.server_error_budget,
            backoff_base: secs(config.backoff_base_secs),
            backoff_max: secs(config.backoff_max_secs),
            jitter_max: secs(config.jitter_max_secs),
            server_error_step: secs(config.server_error_step_secs),
        }
    }

    /// Exponential backoff for the `attempt`-th rate limit (1-based):
    /// `min(base * 2^(attempt-1) + U[0, jitter), max)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let exponential = self.backoff_base.as_secs_f64() * 2f64.powi(exponent);

        let jitter_max = self.jitter_max.as_secs_f64();
        let jitter = if jitter_max > 0.0 {
            rand::rng().random_range(0.0..jitter_max)
        } else {
            0.0
        };

        let capped = (exponential + jitter).min(self.backoff_max.as_secs_f64());
        Duration::try_from_secs_f64(capped.max(0.0)).unwrap_or(self.backoff_max)
    }

    /// Linear wait for the `attempt`-th server error (1-based)
    pub fn server_error_delay(&self, attempt: u32) -> Duration {
        self.server_error_step.saturating_mul(attempt)
    }

    /// Update `state` for a failed attempt and decide whether to wait or
    /// give up. The counter is incremented first; reaching the budget fails.
    pub fn next_step(&self, state: &mut RetryState, error: GrokitError) -> RetryDecision {
        let class = RetryClass::of(&error);
        state.classification = class;

        match class {
            Some(RetryClass::RateLimit) => {
                state.rate_limit_attempts += 1;
                let attempts = state.rate_limit_attempts;
                if attempts >= self.rate_limit_budget {
                    return RetryDecision::Fail(ApiError::RateLimitExceeded { attempts }.into());
                }
                let delay = match &error {
                    GrokitError::Api(ApiError::RateLimited {
                        retry_after: Some(wait),
                    }) => *wait,
                    _ => self.backoff_delay(attempts),
                };
                RetryDecision::Wait(delay)
            }
            Some(RetryClass::ServerError) => {
                state.server_error_attempts += 1;
                let attempts = state.server_error_attempts;
                if attempts >= self.server_error_budget {
                    let status = match &error {
                        GrokitError::Api(api_error) => api_error.status().unwrap_or(500),
                        _ => 500,
                    };
                    return RetryDecision::Fail(
                        ApiError::TransientServerError { status, attempts }.into(),
                    );
                }
                RetryDecision::Wait(self.server_error_delay(attempts))
            }
            Some(RetryClass::Transport) | None => RetryDecision::Fail(error),
        }
    }
}

/// Seconds to a duration; negative or NaN is zero, too large saturates
fn secs(value: f64) -> Duration {
    if value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Parse a `Retry-After` header value: integer seconds, else an HTTP date
/// measured against `now` (a date in the past yields zero).
pub fn parse_retry_after(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(now).num_milliseconds();
    if delay_ms <= 0 {
        return Some(Duration::ZERO);
    }
    Some(Duration::from_millis(delay_ms as u64))
}

/// Run `operation` under `policy`, sleeping between attempts.
///
/// `on_wait` is called before every sleep.
pub async fn with_retry<F, Fut, T, W>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
    mut on_wait: W,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    W: FnMut(&RetryNotice),
{
    let mut state = RetryState::default();

    loop {
        let error = match operation().await {
            Ok(result) => {
                if state.rate_limit_attempts + state.server_error_attempts > 0 {
                    tracing::debug!(
                        target: "grokit.llm.retry",
                        operation = operation_name,
                        rate_limits = state.rate_limit_attempts,
                        server_errors = state.server_error_attempts,
                        "succeeded after retries"
                    );
                }
                return Ok(result);
            }
            Err(error) => error,
        };

        match policy.next_step(&mut state, error) {
            RetryDecision::Wait(delay) => {
                let (class, attempt, budget) = match state.classification {
                    Some(RetryClass::ServerError) => (
                        RetryClass::ServerError,
                        state.server_error_attempts,
                        policy.server_error_budget,
                    ),
                    _ => (
                        RetryClass::RateLimit,
                        state.rate_limit_attempts,
                        policy.rate_limit_budget,
                    ),
                };
                let notice = RetryNotice {
                    class,
                    attempt,
                    budget,
                    delay,
                };
                tracing::warn!(
                    target: "grokit.llm.retry",
                    operation = operation_name,
                    ?class,
                    attempt,
                    budget,
                    delay_secs = delay.as_secs_f64(),
                    "retrying after wait"
                );
                on_wait(&notice);
                sleep(delay).await;
            }
            RetryDecision::Fail(error) => {
                tracing::debug!(
                    target: "grokit.llm.retry",
                    operation = operation_name,
                    classification = ?state.classification,
                    %error,
                    "giving up"
                );
                return Err(error);
            }
        }
    }
}
