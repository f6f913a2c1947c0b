// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::time::Duration;

use futures::StreamExt;
use grokit::chat::streaming::StreamDecoder;
use grokit::error::{ApiError, GrokitError};
use grokit::llm::client::XaiClient;
use grokit::llm::provider::{ChatRequest, ChatTransport, ToolArguments};
use grokit::llm::Message;
use grokit::tools::{LocalToolExecutor, ToolExecutor};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SSE_TOOL_CALL: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"read_file\",\"arguments\":\"\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"filename\\\":\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"a.txt\\\"}\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
    "data: [DONE]\n\n",
);

fn client_for(server: &MockServer) -> XaiClient {
    XaiClient::new("test-key")
        .unwrap()
        .with_base_url(format!("{}/v1/chat/completions", server.uri()))
}

fn request(stream: bool) -> ChatRequest {
    ChatRequest::new("grok-4", vec![Message::user("hi")]).with_stream(stream)
}

#[tokio::test]
async fn test_streaming_tool_call_is_reconstructed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"stream": true, "model": "grok-4"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_TOOL_CALL, "text/event-stream"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut lines = client.open_stream(&request(true)).await.unwrap();
    let mut decoder = StreamDecoder::new();
    while let Some(line) = lines.next().await {
        decoder.push_line(&line.unwrap());
    }
    let response = decoder.finish();

    assert_eq!(response.tool_calls.len(), 1);
    let call = &response.tool_calls[0];
    assert_eq!(call.id, "call_1");
    assert_eq!(call.name, "read_file");
    assert_eq!(call.raw_arguments, r#"{"filename":"a.txt"}"#);
    assert_eq!(
        call.arguments,
        ToolArguments::Parsed(json!({"filename": "a.txt"}))
    );
    assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
}

#[tokio::test]
async fn test_complete_decodes_message_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Hello!",
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "list_files", "arguments": "{}{\"x\":1}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
        })))
        .mount(&server)
        .await;

    let response = client_for(&server).complete(&request(false)).await.unwrap();

    assert_eq!(response.text, "Hello!");
    assert_eq!(response.usage.unwrap().total(), 17);
    assert!(response.raw.is_some());
    // Same repair path as streaming
    assert_eq!(response.tool_calls[0].arguments, ToolArguments::Parsed(json!({})));
}

#[tokio::test]
async fn test_tools_are_advertised_with_auto_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "tool_choice": "auto",
            "tools": [{"type": "function", "function": {"name": "read_file"}}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "ok"}}]
        })))
        .mount(&server)
        .await;

    let tools: Vec<_> = LocalToolExecutor::new(".")
        .definitions()
        .into_iter()
        .filter(|tool| tool.name == "read_file")
        .collect();
    let request = request(false).with_tools(tools);

    let response = client_for(&server).complete(&request).await.unwrap();
    assert_eq!(response.text, "ok");
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "120")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let result = client_for(&server).open_stream(&request(true)).await;

    match result {
        Err(GrokitError::Api(ApiError::RateLimited { retry_after })) => {
            assert_eq!(retry_after, Some(Duration::from_secs(120)));
        }
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("expected a rate limit"),
    }
}

#[tokio::test]
async fn test_unauthorized_is_authentication_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided"}
        })))
        .mount(&server)
        .await;

    let result = client_for(&server).complete(&request(false)).await;
    assert!(matches!(
        result,
        Err(GrokitError::Api(ApiError::AuthenticationFailed))
    ));
}

#[tokio::test]
async fn test_server_error_message_is_extracted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": {"message": "model overloaded"}
        })))
        .mount(&server)
        .await;

    match client_for(&server).complete(&request(false)).await {
        Err(GrokitError::Api(ApiError::ServerError { status, message })) => {
            assert_eq!(status, 503);
            assert_eq!(message, "model overloaded");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_list_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "grok-4"}, {"id": "grok-3-mini"}]
        })))
        .mount(&server)
        .await;

    let models = client_for(&server).list_models().await.unwrap();
    assert_eq!(models, vec!["grok-3-mini", "grok-4"]);
}
