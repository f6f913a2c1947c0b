// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock chat transport for testing
//!
//! Replays scripted replies in order without making real API calls. Replies
//! are expressed as raw SSE lines so tests exercise the same decoding path
//! as the live client.

use async_trait::async_trait;
use futures::stream;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::chat::streaming::StreamDecoder;
use crate::error::{ApiError, GrokitError, Result};
use crate::llm::provider::{ChatRequest, ChatResponse, ChatTransport, LineStream};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Raw protocol lines
    Lines(Vec<String>),
    /// HTTP 429
    RateLimited { retry_after: Option<Duration> },
    /// HTTP status error
    Status(u16),
    /// Request timed out
    Timeout,
    /// Lines that arrive before the connection drops
    Broken { lines: Vec<String>, error: String },
}

impl MockReply {
    /// A plain text answer, streamed in small chunks
    pub fn text(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let mut lines: Vec<String> = chars
            .chunks(8)
            .map(|chunk| {
                let piece: String = chunk.iter().collect();
                data_line(json!({"choices": [{"delta": {"content": piece}}]}))
            })
            .collect();
        lines.push(data_line(
            json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
        ));
        lines.push("data: [DONE]".to_string());
        MockReply::Lines(lines)
    }

    /// A single tool call whose arguments arrive in one fragment
    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        Self::tool_calls(&[(id, name, arguments)])
    }

    /// Several tool calls, indexed in order
    pub fn tool_calls(calls: &[(&str, &str, &str)]) -> Self {
        let mut lines: Vec<String> = calls
            .iter()
            .enumerate()
            .map(|(index, (id, name, arguments))| {
                data_line(json!({"choices": [{"delta": {"tool_calls": [{
                    "index": index,
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments}
                }]}}]}))
            })
            .collect();
        lines.push(data_line(
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ));
        lines.push("data: [DONE]".to_string());
        MockReply::Lines(lines)
    }

    fn into_error(self) -> Option<GrokitError> {
        match self {
            MockReply::Lines(_) => None,
            MockReply::Broken { error, .. } => Some(ApiError::StreamError(error).into()),
            MockReply::RateLimited { retry_after } => {
                Some(ApiError::RateLimited { retry_after }.into())
            }
            MockReply::Status(401) | MockReply::Status(403) => {
                Some(ApiError::AuthenticationFailed.into())
            }
            MockReply::Status(status) => Some(
                ApiError::ServerError {
                    status,
                    message: "mock error".to_string(),
                }
                .into(),
            ),
            MockReply::Timeout => Some(ApiError::Timeout.into()),
        }
    }
}

fn data_line(value: serde_json::Value) -> String {
    format!("data: {value}")
}

/// A mock transport for testing
#[derive(Clone, Default)]
pub struct MockTransport {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    call_count: Arc<AtomicUsize>,
    recorded_requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockTransport {
    /// Create a mock transport with no scripted replies
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies, returned in order
    pub fn with_replies(self, replies: Vec<MockReply>) -> Self {
        lock(&self.replies).extend(replies);
        self
    }

    /// Queue one more reply
    pub fn push_reply(&self, reply: MockReply) {
        lock(&self.replies).push_back(reply);
    }

    /// Number of requests made
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// All recorded requests
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        lock(&self.recorded_requests).clone()
    }

    /// The last request made
    pub fn last_request(&self) -> Option<ChatRequest> {
        lock(&self.recorded_requests).last().cloned()
    }

    fn next_reply(&self, request: &ChatRequest) -> MockReply {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.recorded_requests).push(request.clone());

        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| MockReply::text("Mock response"))
    }
}

fn reply_error(reply: MockReply) -> GrokitError {
    reply
        .into_error()
        .unwrap_or_else(|| GrokitError::InvalidInput("mock reply".to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Mock transport lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let lines = match self.next_reply(request) {
            MockReply::Lines(lines) => lines,
            other => return Err(reply_error(other)),
        };
        let mut decoder = StreamDecoder::new();
        for line in &lines {
            decoder.push_line(line);
        }
        Ok(decoder.finish())
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<LineStream> {
        let (lines, tail): (Vec<String>, Option<GrokitError>) = match self.next_reply(request) {
            MockReply::Lines(lines) => (lines, None),
            MockReply::Broken { lines, error } => {
                (lines, Some(ApiError::StreamError(error).into()))
            }
            other => return Err(reply_error(other)),
        };
        let items: Vec<Result<String>> = lines
            .into_iter()
            .map(Ok)
            .chain(tail.map(Err::<String, GrokitError>))
            .collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::Message;
    use futures::StreamExt;

    fn request() -> ChatRequest {
        ChatRequest::new("mock-model", vec![Message::user("hi")])
    }

    #[tokio::test]
    async fn test_mock_text_reply() {
        let transport = MockTransport::new().with_replies(vec![MockReply::text("Hello, world!")]);

        let response = transport.complete(&request()).await.unwrap();
        assert_eq!(response.text, "Hello, world!");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_tool_call_reply_streams() {
        let transport = MockTransport::new().with_replies(vec![MockReply::tool_call(
            "call_1",
            "read_file",
            r#"{"filename":"a.txt"}"#,
        )]);

        let lines: Vec<String> = transport
            .open_stream(&request())
            .await
            .unwrap()
            .map(|l| l.unwrap())
            .collect()
            .await;

        assert!(lines[0].contains("read_file"));
        assert_eq!(lines.last().map(String::as_str), Some("data: [DONE]"));
    }

    #[tokio::test]
    async fn test_mock_error_replies() {
        let transport = MockTransport::new().with_replies(vec![
            MockReply::RateLimited { retry_after: None },
            MockReply::Status(503),
            MockReply::Timeout,
        ]);

        assert!(matches!(
            transport.complete(&request()).await,
            Err(GrokitError::Api(ApiError::RateLimited { .. }))
        ));
        assert!(matches!(
            transport.complete(&request()).await,
            Err(GrokitError::Api(ApiError::ServerError { status: 503, .. }))
        ));
        assert!(matches!(
            transport.open_stream(&request()).await,
            Err(GrokitError::Api(ApiError::Timeout))
        ));
        assert_eq!(transport.recorded_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_broken_stream_ends_with_error() {
        let transport = MockTransport::new().with_replies(vec![MockReply::Broken {
            lines: vec!["data: {}".to_string()],
            error: "connection reset".to_string(),
        }]);

        let items: Vec<Result<String>> = transport.open_stream(&request()).await.unwrap().collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().ok(), Some("data: {}"));
        assert!(matches!(
            items[1],
            Err(GrokitError::Api(ApiError::StreamError(_)))
        ));
    }

    #[tokio::test]
    async fn test_mock_default_reply_when_exhausted() {
        let transport = MockTransport::new();
        let response = transport.complete(&request()).await.unwrap();
        assert_eq!(response.text, "Mock response");
        assert_eq!(
            transport.last_request().map(|r| r.model),
            Some("mock-model".to_string())
        );
    }
}
