// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming response handling
//!
//! Tool calls arrive as many small fragments, each addressed by `index`.
//! The decoder folds protocol lines into an index-addressed list of
//! fragments and freezes them into [`ToolCall`]s when the stream ends.
//! Nothing here performs I/O, and nothing here fails: a malformed line is
//! counted and skipped, a malformed argument string becomes
//! [`ToolArguments::Invalid`].

use serde::Deserialize;
use serde_json::Value;

use crate::chat::repair;
use crate::error::{ApiError, Result};
use crate::llm::provider::{ChatResponse, ToolArguments, ToolCall, Usage};

/// Highest tool-call index accepted from the wire
pub const MAX_TOOL_CALL_INDEX: usize = 255;

/// A partially received tool call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallFragment {
    fn placeholder(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    /// Freeze into a finished call, repairing arguments if needed
    pub fn finalize(self) -> ToolCall {
        let arguments = finalize_arguments(&self.name, &self.arguments);
        ToolCall {
            index: self.index,
            id: self.id,
            name: self.name,
            raw_arguments: self.arguments,
            arguments,
        }
    }
}

fn finalize_arguments(name: &str, raw: &str) -> ToolArguments {
    if raw.trim().is_empty() {
        return ToolArguments::Parsed(Value::Object(Default::default()));
    }

    if let Ok(value) = serde_json::from_str(raw) {
        return ToolArguments::Parsed(value);
    }

    match repair::repair(raw) {
        Ok(value) => {
            tracing::warn!(
                target: "grokit.stream",
                tool = name,
                "tool call arguments were malformed and have been repaired"
            );
            ToolArguments::Parsed(value)
        }
        Err(err) => {
            tracing::warn!(target: "grokit.stream", tool = name, %err, "tool call arguments invalid");
            ToolArguments::Invalid {
                error: format!("Invalid JSON arguments: {}", err.reason),
            }
        }
    }
}

/// Something a line produced that a caller may want to show right away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// Assistant text, in arrival order
    Text(String),
    /// A tool call received its name
    ToolCallNamed { index: usize, name: String },
    /// `data: [DONE]`
    Done,
}

/// Fold of protocol lines for one model round
#[derive(Debug, Default)]
pub struct StreamDecoder {
    text: String,
    fragments: Vec<ToolCallFragment>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    last_index: Option<usize>,
    skipped: usize,
    done: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text accumulated so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Fragments accumulated so far, gaps included
    pub fn fragments(&self) -> &[ToolCallFragment] {
        &self.fragments
    }

    /// Number of malformed lines skipped
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one raw protocol line
    pub fn push_line(&mut self, line: &str) -> Vec<DecodeEvent> {
        if self.done {
            return vec![];
        }

        let line = line.trim_end_matches(['\r', '\n']);
        let Some(payload) = line.strip_prefix("data:") else {
            // Blank separators, `:` comments and other SSE fields
            return vec![];
        };
        let payload = payload.strip_prefix(' ').unwrap_or(payload).trim();

        if payload == "[DONE]" {
            self.done = true;
            return vec![DecodeEvent::Done];
        }
        if payload.is_empty() {
            return vec![];
        }

        match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => self.apply(chunk),
            Err(err) => {
                self.skip(&err.to_string(), payload);
                vec![]
            }
        }
    }

    fn skip(&mut self, reason: &str, payload: &str) {
        self.skipped += 1;
        tracing::debug!(
            target: "grokit.stream",
            reason,
            payload,
            skipped = self.skipped,
            "skipping malformed stream event"
        );
    }

    fn apply(&mut self, chunk: StreamChunk) -> Vec<DecodeEvent> {
        let oversized = chunk
            .choices
            .iter()
            .filter_map(|choice| choice.delta.as_ref())
            .flat_map(|delta| delta.tool_calls.iter().flatten())
            .filter_map(|call| call.index)
            .find(|index| *index > MAX_TOOL_CALL_INDEX);
        if let Some(index) = oversized {
            self.skip(&format!("tool call index {index} out of range"), "");
            return vec![];
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        let mut events = Vec::new();
        // Only the first choice is followed, as with n = 1 requests
        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        let Some(delta) = choice.delta else {
            return events;
        };

        if let Some(content) = delta.content {
            if !content.is_empty() {
                self.text.push_str(&content);
                events.push(DecodeEvent::Text(content));
            }
        }

        for call in delta.tool_calls.into_iter().flatten() {
            if let Some(event) = self.apply_tool_call(call) {
                events.push(event);
            }
        }

        events
    }

    fn apply_tool_call(&mut self, call: StreamToolCall) -> Option<DecodeEvent> {
        let index = call.index.or(self.last_index).unwrap_or(0);
        self.last_index = Some(index);

        while self.fragments.len() <= index {
            let next = self.fragments.len();
            self.fragments.push(ToolCallFragment::placeholder(next));
        }
        let fragment = &mut self.fragments[index];

        if let Some(id) = call.id.filter(|id| !id.is_empty()) {
            fragment.id = id;
        }

        let mut event = None;
        if let Some(function) = call.function {
            if let Some(name) = function.name.filter(|name| !name.is_empty()) {
                if fragment.name != name {
                    event = Some(DecodeEvent::ToolCallNamed {
                        index,
                        name: name.clone(),
                    });
                }
                fragment.name = name;
            }
            if let Some(arguments) = function.arguments {
                fragment.arguments.push_str(&arguments);
            }
        }

        event
    }

    /// End of stream: freeze every fragment, placeholders included
    pub fn finish(self) -> ChatResponse {
        if self.skipped > 0 {
            tracing::debug!(
                target: "grokit.stream",
                skipped = self.skipped,
                "stream finished with skipped events"
            );
        }

        ChatResponse {
            text: self.text,
            tool_calls: self
                .fragments
                .into_iter()
                .map(ToolCallFragment::finalize)
                .collect(),
            usage: self.usage,
            finish_reason: self.finish_reason,
            raw: None,
        }
    }
}

/// Decode a non-streaming response body through the same finalization path
pub fn decode_completion(body: Value) -> Result<ChatResponse> {
    let completion: CompletionBody = serde_json::from_value(body.clone())
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::InvalidResponse("No choices in response".to_string()))?;

    let message = choice.message.unwrap_or_default();
    let tool_calls = message
        .tool_calls
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(index, call)| {
            let function = call.function.unwrap_or_default();
            let arguments = match function.arguments {
                Some(Value::String(text)) => text,
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            ToolCallFragment {
                index,
                id: call.id.unwrap_or_default(),
                name: function.name.unwrap_or_default(),
                arguments,
            }
            .finalize()
        })
        .collect();

    Ok(ChatResponse {
        text: message.content.unwrap_or_default(),
        tool_calls,
        usage: completion.usage,
        finish_reason: choice.finish_reason,
        raw: Some(body),
    })
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<CompletionMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Debug, Deserialize)]
struct CompletionToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<CompletionFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn tool_delta(
        index: Option<usize>,
        id: Option<&str>,
        name: Option<&str>,
        args: Option<&str>,
    ) -> String {
        let mut call = json!({});
        if let Some(index) = index {
            call["index"] = json!(index);
        }
        if let Some(id) = id {
            call["id"] = json!(id);
        }
        let mut function = json!({});
        if let Some(name) = name {
            function["name"] = json!(name);
        }
        if let Some(args) = args {
            function["arguments"] = json!(args);
        }
        call["function"] = function;
        format!(
            "data: {}",
            json!({"choices": [{"delta": {"tool_calls": [call]}}]})
        )
    }

    fn text_delta(text: &str) -> String {
        format!("data: {}", json!({"choices": [{"delta": {"content": text}}]}))
    }

    #[test]
    fn test_three_event_reconstruction() {
        let mut decoder = StreamDecoder::new();
        decoder.push_line(&tool_delta(Some(0), Some("c1"), Some("read_file"), Some("")));
        decoder.push_line(&tool_delta(Some(0), None, None, Some("{\"filename\":")));
        decoder.push_line(&tool_delta(Some(0), None, None, Some("\"a.txt\"}")));
        decoder.push_line("data: [DONE]");

        let response = decoder.finish();
        assert_eq!(response.tool_calls.len(), 1);
        let call = &response.tool_calls[0];
        assert_eq!(call.id, "c1");
        assert_eq!(call.name, "read_file");
        assert_eq!(
            call.arguments,
            ToolArguments::Parsed(json!({"filename": "a.txt"}))
        );
    }

    #[test]
    fn test_text_surfaces_in_order() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(
            decoder.push_line(&text_delta("Hel")),
            vec![DecodeEvent::Text("Hel".to_string())]
        );
        assert_eq!(
            decoder.push_line(&text_delta("lo")),
            vec![DecodeEvent::Text("lo".to_string())]
        );
        assert_eq!(decoder.text(), "Hello");
        assert_eq!(decoder.finish().text, "Hello");
    }

    #[test]
    fn test_gap_filled_with_placeholders() {
        let mut decoder = StreamDecoder::new();
        decoder.push_line(&tool_delta(Some(2), Some("c3"), Some("list_files"), Some("{}")));

        assert_eq!(decoder.fragments().len(), 3);
        assert_eq!(decoder.fragments()[0], ToolCallFragment::placeholder(0));
        assert_eq!(decoder.fragments()[1], ToolCallFragment::placeholder(1));

        let response = decoder.finish();
        assert!(response.tool_calls[0].is_placeholder());
        assert!(response.tool_calls[1].is_placeholder());
        assert_eq!(response.tool_calls[2].name, "list_files");
        assert_eq!(response.actionable_tool_calls().count(), 1);
    }

    #[test]
    fn test_id_and_name_last_non_empty_wins() {
        let mut decoder = StreamDecoder::new();
        decoder.push_line(&tool_delta(Some(0), Some("first"), Some("read_file"), None));
        decoder.push_line(&tool_delta(Some(0), Some(""), Some(""), Some("{}")));
        decoder.push_line(&tool_delta(Some(0), Some("second"), None, None));

        let fragment = &decoder.fragments()[0];
        assert_eq!(fragment.id, "second");
        assert_eq!(fragment.name, "read_file");
        assert_eq!(fragment.arguments, "{}");
    }

    #[test]
    fn test_missing_index_reuses_last() {
        let mut decoder = StreamDecoder::new();
        decoder.push_line(&tool_delta(None, Some("c1"), Some("read_file"), Some("{\"filename\"")));
        decoder.push_line(&tool_delta(Some(1), Some("c2"), Some("list_files"), Some("{")));
        decoder.push_line(&tool_delta(None, None, None, Some("}")));

        assert_eq!(decoder.fragments()[0].arguments, "{\"filename\"");
        assert_eq!(decoder.fragments()[1].arguments, "{}");
    }

    #[test]
    fn test_smaller_index_appends_to_existing() {
        let mut decoder = StreamDecoder::new();
        decoder.push_line(&tool_delta(Some(0), Some("c1"), Some("read_file"), Some("{\"filename\":")));
        decoder.push_line(&tool_delta(Some(1), Some("c2"), Some("read_file"), Some("{}")));
        decoder.push_line(&tool_delta(Some(0), None, None, Some("\"b.txt\"}")));

        let response = decoder.finish();
        assert_eq!(
            response.tool_calls[0].arguments,
            ToolArguments::Parsed(json!({"filename": "b.txt"}))
        );
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let mut decoder = StreamDecoder::new();
        decoder.push_line(&text_delta("a"));
        assert!(decoder.push_line("data: {not json").is_empty());
        assert!(decoder.push_line("data: {\"choices\": 5}").is_empty());
        decoder.push_line(&text_delta("b"));

        assert_eq!(decoder.skipped(), 2);
        assert_eq!(decoder.finish().text, "ab");
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push_line("").is_empty());
        assert!(decoder.push_line(": keep-alive").is_empty());
        assert!(decoder.push_line("event: message").is_empty());
        assert_eq!(decoder.skipped(), 0);
    }

    #[test]
    fn test_lines_after_done_ignored() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.push_line("data: [DONE]"), vec![DecodeEvent::Done]);
        assert!(decoder.is_done());
        assert!(decoder.push_line(&text_delta("late")).is_empty());
        assert_eq!(decoder.finish().text, "");
    }

    #[test]
    fn test_data_without_space() {
        let mut decoder = StreamDecoder::new();
        decoder.push_line(&text_delta("x").replacen("data: ", "data:", 1));
        assert_eq!(decoder.text(), "x");
    }

    #[test]
    fn test_oversized_index_skipped() {
        let mut decoder = StreamDecoder::new();
        decoder.push_line(&tool_delta(Some(100_000), Some("c"), Some("read_file"), Some("{}")));
        assert!(decoder.fragments().is_empty());
        assert_eq!(decoder.skipped(), 1);
    }

    #[test]
    fn test_finish_reason_and_usage_recorded() {
        let mut decoder = StreamDecoder::new();
        decoder.push_line(r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        decoder.push_line(
            r#"data: {"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#,
        );

        let response = decoder.finish();
        assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(response.usage.map(|u| u.total()), Some(15));
    }

    #[test]
    fn test_tool_call_named_event_once() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push_line(&tool_delta(Some(0), Some("c1"), Some("read_file"), None));
        assert_eq!(
            events,
            vec![DecodeEvent::ToolCallNamed {
                index: 0,
                name: "read_file".to_string()
            }]
        );
        let events = decoder.push_line(&tool_delta(Some(0), None, Some("read_file"), Some("{}")));
        assert!(events.is_empty());
    }

    #[test]
    fn test_empty_arguments_finalize_to_empty_object() {
        let call = ToolCallFragment {
            index: 0,
            id: "c1".to_string(),
            name: "list_files".to_string(),
            arguments: "  ".to_string(),
        }
        .finalize();
        assert_eq!(call.arguments, ToolArguments::Parsed(json!({})));
    }

    #[test]
    fn test_concatenated_arguments_repaired_at_finish() {
        let mut decoder = StreamDecoder::new();
        decoder.push_line(&tool_delta(
            Some(0),
            Some("c1"),
            Some("read_file"),
            Some(r#"{"filename":"a"}{"filename":"b"}"#),
        ));

        let call = &decoder.finish().tool_calls[0];
        assert_eq!(call.arguments, ToolArguments::Parsed(json!({"filename": "a"})));
        assert_eq!(call.raw_arguments, r#"{"filename":"a"}{"filename":"b"}"#);
    }

    #[test]
    fn test_unrepairable_arguments_marked_invalid() {
        let mut decoder = StreamDecoder::new();
        decoder.push_line(&tool_delta(Some(0), Some("c1"), Some("create_file"), Some("{\"filename\": ")));

        let call = &decoder.finish().tool_calls[0];
        assert!(!call.is_valid());
        match &call.arguments {
            ToolArguments::Invalid { error } => assert!(error.contains("Invalid JSON")),
            other => panic!("expected invalid arguments, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_completion() {
        let body = json!({
            "id": "resp_1",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Reading it now.",
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": "{\"filename\":\"a.txt\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        });

        let response = decode_completion(body).unwrap();
        assert_eq!(response.text, "Reading it now.");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(
            response.tool_calls[0].arguments,
            ToolArguments::Parsed(json!({"filename": "a.txt"}))
        );
        assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
        assert!(response.raw.is_some());
    }

    #[test]
    fn test_decode_completion_matches_streamed() {
        let body = json!({
            "choices": [{
                "message": {"content": null, "tool_calls": [{
                    "id": "c1",
                    "function": {"name": "read_file", "arguments": "{\"filename\":\"a\"}{\"filename\":\"b\"}"}
                }]}
            }]
        });
        let completed = decode_completion(body).unwrap();

        let mut decoder = StreamDecoder::new();
        decoder.push_line(&tool_delta(
            Some(0),
            Some("c1"),
            Some("read_file"),
            Some("{\"filename\":\"a\"}{\"filename\":\"b\"}"),
        ));
        let streamed = decoder.finish();

        assert_eq!(completed.tool_calls, streamed.tool_calls);
        assert_eq!(completed.text, streamed.text);
    }

    #[test]
    fn test_decode_completion_without_choices() {
        assert!(decode_completion(json!({"choices": []})).is_err());
    }

    proptest! {
        #[test]
        fn arguments_are_concatenation_of_fragments(
            pieces in prop::collection::vec("[a-z{}\":, ]{0,6}", 0..12),
        ) {
            let mut decoder = StreamDecoder::new();
            decoder.push_line(&tool_delta(Some(0), Some("c1"), Some("read_file"), None));
            for piece in &pieces {
                decoder.push_line(&tool_delta(Some(0), None, None, Some(piece.as_str())));
            }
            prop_assert_eq!(decoder.fragments()[0].arguments.clone(), pieces.concat());
            prop_assert_eq!(decoder.fragments()[0].name.as_str(), "read_file");
        }

        #[test]
        fn names_keep_last_non_empty(
            names in prop::collection::vec(prop_oneof![Just(""), Just("read_file"), Just("list_files")], 1..8),
        ) {
            let mut decoder = StreamDecoder::new();
            for name in &names {
                decoder.push_line(&tool_delta(Some(0), None, Some(*name), None));
            }
            let expected = names.iter().rev().find(|n| !n.is_empty()).copied().unwrap_or("");
            prop_assert_eq!(decoder.fragments()[0].name.as_str(), expected);
        }
    }
}
