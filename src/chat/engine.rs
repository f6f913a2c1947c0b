// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Per-turn chat loop.
//!
//! One user message becomes up to `max_tool_rounds` model rounds. Each round
//! streams (or fetches) a response, decodes it into text and tool calls,
//! queues the calls on the scheduler and drains it, then feeds the results
//! back as `tool` messages. Frontends observe progress through
//! [`TurnObserver`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};

use crate::chat::repair::repair_all;
use crate::chat::streaming::{DecodeEvent, StreamDecoder};
use crate::config::Settings;
use crate::error::{GrokitError, Result};
use crate::llm::message::{Conversation, Message};
use crate::llm::provider::{ChatRequest, ChatResponse, ChatTransport, ToolArguments, ToolCall, Usage};
use crate::llm::retry::{with_retry, RetryNotice, RetryPolicy};
use crate::scheduler::{Enqueued, Priority, RequestKey, RequestScheduler};
use crate::tools::{ToolExecutor, ToolOutcome};

const DEFAULT_MAX_TOOL_ROUNDS: u32 = 10;

const RETRY_NUDGE: &str = "The previous tool calls failed due to invalid arguments. \
Please try again with properly formatted JSON arguments.";

/// Output hooks for a turn.
///
/// Every method has a no-op default so frontends implement only what they
/// render.
pub trait TurnObserver {
    fn on_text_delta(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    /// A streamed tool call received its name
    fn on_tool_call_named(&mut self, _index: usize, _name: &str) -> Result<()> {
        Ok(())
    }

    /// The chat request is about to wait out a rate limit or server error
    fn on_rate_limited(&mut self, _notice: &RetryNotice) {}

    fn on_tool_invocation(&mut self, _tool_name: &str, _input: &Value) -> Result<()> {
        Ok(())
    }

    fn on_tool_result(&mut self, _tool_name: &str, _outcome: &ToolOutcome) -> Result<()> {
        Ok(())
    }
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct NoopTurnObserver;

impl TurnObserver for NoopTurnObserver {}

/// What a completed turn did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnSummary {
    /// Text of the final round
    pub text: String,
    pub rounds: u32,
    pub tool_calls: usize,
    pub failed_tool_calls: usize,
    /// Usage summed over every round that reported it
    pub usage: Option<Usage>,
    /// The round limit stopped the turn while the model still wanted tools
    pub round_limit_reached: bool,
}

impl TurnSummary {
    fn add_usage(&mut self, usage: Option<Usage>) {
        let Some(usage) = usage else {
            return;
        };
        let total = self.usage.get_or_insert_with(Usage::default);
        total.prompt_tokens += usage.prompt_tokens;
        total.completion_tokens += usage.completion_tokens;
        total.total_tokens += usage.total();
    }
}

/// How one tool call will be answered once the scheduler has run
enum CallPlan {
    /// Already known (cache hit or argument error)
    Ready(ToolOutcome),
    Waiting(RequestKey),
    /// Several `read_file` objects squeezed into one call
    Files(Vec<(String, Enqueued)>),
}

pub struct ChatEngine<E: ToolExecutor> {
    transport: Arc<dyn ChatTransport>,
    scheduler: RequestScheduler<E>,
    conversation: Conversation,
    model: String,
    stream: bool,
    max_tool_rounds: u32,
    policy: RetryPolicy,
    interrupted: Arc<AtomicBool>,
}

impl<E: ToolExecutor> ChatEngine<E> {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        scheduler: RequestScheduler<E>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            scheduler,
            conversation: Conversation::new(),
            model: model.into(),
            stream: true,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            policy: RetryPolicy::default(),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_settings(
        transport: Arc<dyn ChatTransport>,
        scheduler: RequestScheduler<E>,
        settings: &Settings,
    ) -> Self {
        let mut engine = Self::new(transport, scheduler, settings.defaults.model.clone())
            .with_stream(settings.defaults.stream)
            .with_max_tool_rounds(settings.defaults.max_tool_rounds)
            .with_policy(RetryPolicy::for_chat(&settings.resilience));
        if let Some(prompt) = &settings.defaults.system_prompt {
            engine.conversation = Conversation::with_system(prompt.clone());
        }
        engine
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Flag checked between scheduler drains and stream lines
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn scheduler(&self) -> &RequestScheduler<E> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut RequestScheduler<E> {
        &mut self.scheduler
    }

    /// Forget the conversation, keeping any system prompt
    pub fn reset(&mut self) {
        self.conversation.clear();
    }

    /// Run one user message to completion.
    ///
    /// On error the conversation is rolled back to where it was before the
    /// message, and any tool requests it left queued are dropped.
    pub async fn run_turn(
        &mut self,
        user_text: &str,
        observer: &mut dyn TurnObserver,
    ) -> Result<TurnSummary> {
        self.interrupted.store(false, Ordering::SeqCst);
        let checkpoint = self.conversation.len();
        self.conversation.push(Message::user(user_text));

        match self.run_rounds(observer).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                self.conversation.truncate(checkpoint);
                let dropped = self.scheduler.discard_pending();
                tracing::debug!(
                    target: "grokit.chat.engine",
                    error = %e,
                    dropped = dropped.len(),
                    "turn abandoned"
                );
                Err(e)
            }
        }
    }

    async fn run_rounds(&mut self, observer: &mut dyn TurnObserver) -> Result<TurnSummary> {
        let mut summary = TurnSummary::default();

        for round in 1..=self.max_tool_rounds {
            summary.rounds = round;
            let response = self.request_round(observer).await?;
            summary.add_usage(response.usage);

            let calls: Vec<ToolCall> = response
                .actionable_tool_calls()
                .cloned()
                .map(with_call_id)
                .collect();

            if calls.is_empty() {
                self.conversation.push(Message::assistant(response.text.clone()));
                summary.text = response.text;
                return Ok(summary);
            }

            tracing::debug!(
                target: "grokit.chat.engine",
                round,
                calls = calls.len(),
                "model requested tools"
            );
            self.conversation
                .push(Message::assistant_with_tool_calls(&response.text, &calls));
            summary.text = response.text;

            let outcomes = self.run_tools(&calls, observer).await?;
            let failures = outcomes.iter().filter(|o| !o.is_success()).count();
            summary.tool_calls += outcomes.len();
            summary.failed_tool_calls += failures;

            for (call, outcome) in calls.iter().zip(&outcomes) {
                self.conversation.push(Message::tool(&call.id, outcome.render()));
            }

            if failures == calls.len() {
                tracing::debug!(target: "grokit.chat.engine", round, "every tool call failed");
                self.conversation.push(Message::user(RETRY_NUDGE));
            }
        }

        tracing::warn!(
            target: "grokit.chat.engine",
            rounds = self.max_tool_rounds,
            "maximum tool rounds reached"
        );
        summary.round_limit_reached = true;
        Ok(summary)
    }

    fn build_request(&self) -> ChatRequest {
        ChatRequest::new(self.model.clone(), self.conversation.messages.clone())
            .with_tools(self.scheduler.executor().definitions())
            .with_stream(self.stream)
    }

    async fn request_round(&self, observer: &mut dyn TurnObserver) -> Result<ChatResponse> {
        let request = self.build_request();
        let transport = self.transport.as_ref();

        if !self.stream {
            let response = with_retry(
                &self.policy,
                "chat_completion",
                || transport.complete(&request),
                |notice| observer.on_rate_limited(notice),
            )
            .await?;
            if !response.text.is_empty() {
                observer.on_text_delta(&response.text)?;
            }
            return Ok(response);
        }

        let mut lines = with_retry(
            &self.policy,
            "chat_stream",
            || transport.open_stream(&request),
            |notice| observer.on_rate_limited(notice),
        )
        .await?;

        let mut decoder = StreamDecoder::new();
        while let Some(line) = lines.next().await {
            if self.interrupted.load(Ordering::SeqCst) {
                return Err(GrokitError::Interrupted);
            }
            for event in decoder.push_line(&line?) {
                match event {
                    DecodeEvent::Text(text) => observer.on_text_delta(&text)?,
                    DecodeEvent::ToolCallNamed { index, name } => {
                        observer.on_tool_call_named(index, &name)?
                    }
                    DecodeEvent::Done => {}
                }
            }
            if decoder.is_done() {
                break;
            }
        }

        if decoder.skipped() > 0 {
            tracing::debug!(
                target: "grokit.chat.engine",
                skipped = decoder.skipped(),
                "stream had malformed events"
            );
        }
        Ok(decoder.finish())
    }

    /// Queue every call, drain the scheduler, and collect one outcome per
    /// call in call order.
    async fn run_tools(
        &mut self,
        calls: &[ToolCall],
        observer: &mut dyn TurnObserver,
    ) -> Result<Vec<ToolOutcome>> {
        let mut plans = Vec::with_capacity(calls.len());
        for call in calls {
            plans.push(self.plan_call(call, observer)?);
        }

        let mut results: BTreeMap<RequestKey, ToolOutcome> = BTreeMap::new();
        while self.scheduler.pending_len() > 0 {
            if self.interrupted.load(Ordering::SeqCst) {
                return Err(GrokitError::Interrupted);
            }
            results.extend(self.scheduler.drain().await?);
        }

        let mut outcomes = Vec::with_capacity(calls.len());
        for (call, plan) in calls.iter().zip(plans) {
            let outcome = resolve(plan, &results);
            observer.on_tool_result(&call.name, &outcome)?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn plan_call(&mut self, call: &ToolCall, observer: &mut dyn TurnObserver) -> Result<CallPlan> {
        if call.name == "read_file" && call.raw_arguments.contains("}{") {
            if let Ok(pieces) = repair_all(&call.raw_arguments) {
                if pieces.len() > 1 {
                    return self.plan_file_batch(pieces, observer);
                }
            }
        }

        let params = match &call.arguments {
            ToolArguments::Parsed(value @ Value::Object(_)) => value.clone(),
            ToolArguments::Parsed(_) => {
                return Ok(CallPlan::Ready(ToolOutcome::error(
                    "Tool arguments must be a JSON object",
                )))
            }
            ToolArguments::Invalid { error } => {
                tracing::debug!(
                    target: "grokit.chat.engine",
                    tool = %call.name,
                    raw = %call.raw_arguments,
                    "unrepairable arguments"
                );
                return Ok(CallPlan::Ready(ToolOutcome::error(error.clone())));
            }
        };

        observer.on_tool_invocation(&call.name, &params)?;
        Ok(match self.scheduler.enqueue(&call.name, params, Priority::Medium) {
            Enqueued::Cached(outcome) => CallPlan::Ready(outcome),
            Enqueued::Pending(key) => CallPlan::Waiting(key),
        })
    }

    fn plan_file_batch(
        &mut self,
        pieces: Vec<Value>,
        observer: &mut dyn TurnObserver,
    ) -> Result<CallPlan> {
        let mut files = Vec::new();
        for piece in pieces {
            let Some(filename) = piece.get("filename").and_then(Value::as_str) else {
                continue;
            };
            let filename = filename.to_string();
            observer.on_tool_invocation("read_file", &piece)?;
            let enqueued = self.scheduler.enqueue("read_file", piece, Priority::Medium);
            files.push((filename, enqueued));
        }

        if files.is_empty() {
            return Ok(CallPlan::Ready(ToolOutcome::error(
                "Could not extract filenames from batched request",
            )));
        }
        tracing::debug!(
            target: "grokit.chat.engine",
            files = files.len(),
            "split concatenated read_file call"
        );
        Ok(CallPlan::Files(files))
    }
}

/// Give a call without an id a locally generated one
fn with_call_id(mut call: ToolCall) -> ToolCall {
    if call.id.is_empty() {
        call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
    }
    call
}

fn lookup(key: &RequestKey, results: &BTreeMap<RequestKey, ToolOutcome>) -> ToolOutcome {
    results
        .get(key)
        .cloned()
        .unwrap_or_else(|| ToolOutcome::error("No result was produced for this request"))
}

fn resolve(plan: CallPlan, results: &BTreeMap<RequestKey, ToolOutcome>) -> ToolOutcome {
    match plan {
        CallPlan::Ready(outcome) => outcome,
        CallPlan::Waiting(key) => lookup(&key, results),
        CallPlan::Files(files) => {
            let files_read = files.len();
            let batch: serde_json::Map<String, Value> = files
                .into_iter()
                .map(|(filename, enqueued)| {
                    let outcome = match enqueued {
                        Enqueued::Cached(outcome) => outcome,
                        Enqueued::Pending(key) => lookup(&key, results),
                    };
                    (filename, outcome.to_json())
                })
                .collect();
            ToolOutcome::success(json!({
                "batch_results": batch,
                "files_read": files_read,
            }))
        }
    }
}
