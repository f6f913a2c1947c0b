// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for grokit
//!
//! Decode-level problems never surface here: a malformed stream event is
//! skipped by the decoder and a broken tool-call argument becomes an inline
//! tool error. What remains are failures that end the current turn.

use std::time::Duration;

use thiserror::Error;

/// Main error type for grokit operations
#[derive(Error, Debug)]
pub enum GrokitError {
    /// API-related errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Tool execution errors
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The user abandoned the turn
    #[error("Interrupted")]
    Interrupted,
}

/// API-specific error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// HTTP 429, optionally carrying the server's requested wait
    #[error("Rate limited{}", format_retry_after(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// Rate limiting persisted past the retry budget
    #[error("Too many rate limit retries ({attempts} attempts). Please try again later.")]
    RateLimitExceeded { attempts: u32 },

    /// API returned an error status
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// 5xx responses persisted past the retry budget
    #[error("Server error persists after {attempts} attempts (status {status})")]
    TransientServerError { status: u16, attempts: u32 },

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout waiting for response
    #[error("Request timed out. The server may be slow or unreachable.")]
    Timeout,

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// The stream broke after it was opened
    #[error("Streaming error: {0}")]
    StreamError(String),
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(": retry after {:.1} seconds", wait.as_secs_f64()),
        None => String::new(),
    }
}

impl ApiError {
    /// HTTP status associated with this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RateLimited { .. } | ApiError::RateLimitExceeded { .. } => Some(429),
            ApiError::ServerError { status, .. } | ApiError::TransientServerError { status, .. } => {
                Some(*status)
            }
            ApiError::AuthenticationFailed => Some(401),
            _ => None,
        }
    }
}

/// JSON argument repair failed every strategy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not repair tool arguments: {reason}")]
pub struct RepairError {
    pub reason: String,
}

/// Result type alias for grokit operations
pub type Result<T> = std::result::Result<T, GrokitError>;

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}
