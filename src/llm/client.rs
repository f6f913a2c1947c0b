// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! xAI chat-completions client
//!
//! Speaks the OpenAI-compatible `/v1/chat/completions` protocol. Streaming
//! responses are handed back as raw SSE lines; decoding them is the job of
//! [`crate::chat::streaming::StreamDecoder`].

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::chat::streaming::decode_completion;
use crate::config::settings::ApiConfig;
use crate::error::{ApiError, GrokitError, Result};
use crate::llm::provider::{ChatRequest, ChatResponse, ChatTransport, LineStream};
use crate::llm::retry::parse_retry_after;

const XAI_API_URL: &str = "https://api.x.ai/v1/chat/completions";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTPS transport for the xAI API
pub struct XaiClient {
    client: Client,
    api_key: String,
    base_url: String,
    request_timeout: Duration,
}

impl XaiClient {
    /// Create a client with default endpoint and timeouts
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::build(
            api_key.into(),
            XAI_API_URL.to_string(),
            CONNECT_TIMEOUT,
            REQUEST_TIMEOUT,
        )
    }

    /// Create a client from the `api` settings section
    pub fn from_config(config: &ApiConfig, api_key: impl Into<String>) -> Result<Self> {
        Self::build(
            api_key.into(),
            config.base_url.clone(),
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn build(
        api_key: String,
        base_url: String,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url,
            request_timeout,
        })
    }

    /// Point the client at a different endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `/models` next to the chat-completions endpoint
    pub fn models_url(&self) -> String {
        let root = self
            .base_url
            .trim_end_matches('/')
            .trim_end_matches("/chat/completions");
        format!("{root}/models")
    }

    /// List model ids available to this API key, sorted
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = self.models_url();
        let pending = self.client.get(&url).bearer_auth(&self.api_key).send();

        let response = match tokio::time::timeout(self.request_timeout, pending).await {
            Ok(result) => result.map_err(ApiError::from)?,
            Err(_) => return Err(ApiError::Timeout.into()),
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error(status, &headers, &body));
        }

        let body: ModelList = response.json().await.map_err(ApiError::from)?;
        let mut ids: Vec<String> = body.data.into_iter().map(|m| m.id).collect();
        ids.sort();
        Ok(ids)
    }

    /// POST the request and wait for response headers.
    ///
    /// The request timeout bounds the wait for headers here. A streamed body
    /// is bounded per chunk by [`split_lines`] instead, so a long stream is
    /// not cut off but a stalled one is.
    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        let body = request.to_body();

        tracing::debug!(
            target: "grokit.llm.client",
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            stream = request.stream,
            "sending chat request"
        );

        let pending = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send();

        let response = match tokio::time::timeout(self.request_timeout, pending).await {
            Ok(result) => result.map_err(ApiError::from)?,
            Err(_) => return Err(ApiError::Timeout.into()),
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error(status, &headers, &body));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatTransport for XaiClient {
    fn name(&self) -> &str {
        "xai"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let response = self.send(request).await?;

        let body: serde_json::Value =
            match tokio::time::timeout(self.request_timeout, response.json()).await {
                Ok(result) => result.map_err(ApiError::from)?,
                Err(_) => return Err(ApiError::Timeout.into()),
            };

        decode_completion(body)
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<LineStream> {
        let response = self.send(request).await?;
        Ok(split_lines(response.bytes_stream(), Some(self.request_timeout)))
    }
}

/// Map a non-success status to an error
fn parse_error(status: u16, headers: &HeaderMap, body: &str) -> GrokitError {
    let error = match status {
        429 => {
            let retry_after = headers
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|raw| parse_retry_after(raw, chrono::Utc::now()));
            ApiError::RateLimited { retry_after }
        }
        401 | 403 => ApiError::AuthenticationFailed,
        _ => {
            let message = serde_json::from_str::<XaiError>(body)
                .ok()
                .and_then(|e| e.message())
                .unwrap_or_else(|| body.to_string());
            ApiError::ServerError { status, message }
        }
    };

    tracing::debug!(target: "grokit.llm.client", status, %error, "request failed");
    error.into()
}

/// Split a byte stream into lines.
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// chunks decode intact. A trailing `\r` is stripped. A transport error ends
/// the stream after being yielded, and so does a wait longer than
/// `idle_timeout` for the next chunk.
pub fn split_lines<S, B, E>(chunks: S, idle_timeout: Option<Duration>) -> LineStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut chunks = Box::pin(chunks);
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, chunks.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!(
                            target: "grokit.llm.client",
                            idle_secs = limit.as_secs_f64(),
                            "stream stalled"
                        );
                        let item: Result<String> = Err(ApiError::Timeout.into());
                        yield item;
                        buffer.clear();
                        break;
                    }
                },
                None => chunks.next().await,
            };
            let Some(chunk) = next else {
                break;
            };

            match chunk {
                Ok(bytes) => {
                    buffer.extend_from_slice(bytes.as_ref());
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        let item: Result<String> = Ok(decode_line(&line));
                        yield item;
                    }
                }
                Err(e) => {
                    let item: Result<String> = Err(ApiError::StreamError(e.to_string()).into());
                    yield item;
                    buffer.clear();
                    break;
                }
            }
        }

        if !buffer.is_empty() {
            let item: Result<String> = Ok(decode_line(&buffer));
            yield item;
        }
    })
}

fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct XaiError {
    error: Option<XaiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum XaiErrorBody {
    Detailed { message: String },
    Plain(String),
}

impl XaiError {
    fn message(self) -> Option<String> {
        match self.error? {
            XaiErrorBody::Detailed { message } => Some(message),
            XaiErrorBody::Plain(message) => Some(message),
        }
    }
}
