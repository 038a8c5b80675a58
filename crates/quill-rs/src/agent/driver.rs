//! The tool-calling driver: the engine that talks to the model and runs tools.
//!
//! A [`Driver`] is stateless per call. The session hands it the fully
//! assembled message list (system prompt, flattened history, new query) and
//! gets back the final text plus a record of every tool invocation. Drivers
//! that keep any conversational buffer of their own expose it through the
//! [`HistoryReset`] capability so the session can clear it.
//!
//! [`ToolLoopDriver`] is the production implementation: a round loop over a
//! [`ChatBackend`] (the OpenRouter client) and a [`ToolSet`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use super::config::{DriverConfig, MAX_EMPTY_RESPONSE_RETRIES};
use super::events::{DriverEvent, EventHandler, NoopHandler};
use crate::api::retry::retry_transient;
use crate::tools::core::ToolSet;
use crate::{ChatCompletion, ChatRequest, Message, OpenRouterClient, ToolCall};

/// Boxed future returned by [`Driver::run`].
pub type DriverFuture<'a> = Pin<Box<dyn Future<Output = Result<DriverOutput, String>> + Send + 'a>>;

/// Boxed future returned by [`ChatBackend::chat`].
pub type ChatFuture<'a> = Pin<Box<dyn Future<Output = Result<ChatCompletion, String>> + Send + 'a>>;

/// One tool invocation made during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallRecord {
    pub round: u32,
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    pub result: String,
}

/// Result of one driver run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverOutput {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub rounds_used: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl DriverOutput {
    /// Output with only a final text, as produced by simple drivers.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            rounds_used: 1,
            ..Default::default()
        }
    }
}

/// Capability for drivers that keep a conversation buffer of their own.
pub trait HistoryReset: Send + Sync {
    fn reset_history(&self);
}

/// Executes one assistant turn for a fully assembled message list.
pub trait Driver: Send + Sync {
    /// Model identifier this driver is bound to.
    fn model(&self) -> &str;

    /// Run the turn. Any `Err` is treated by the session as a retryable
    /// transport-level failure.
    fn run(&self, messages: Vec<Message>) -> DriverFuture<'_>;

    /// The driver's history-reset capability, if it has one.
    fn history_reset(&self) -> Option<&dyn HistoryReset> {
        None
    }
}

/// Builds a driver bound to a given model. Used for model switches.
pub trait DriverFactory: Send + Sync {
    fn build(&self, model: &str) -> Result<Box<dyn Driver>, String>;
}

/// Sends a chat completion request.
pub trait ChatBackend: Send + Sync {
    fn chat<'a>(&'a self, request: &'a ChatRequest) -> ChatFuture<'a>;
}

impl ChatBackend for OpenRouterClient {
    fn chat<'a>(&'a self, request: &'a ChatRequest) -> ChatFuture<'a> {
        Box::pin(OpenRouterClient::chat(self, request))
    }
}

// ── ToolLoopDriver ─────────────────────────────────────────────────

/// Round loop: request, run requested tools, append results, repeat until
/// the model answers without tool calls or `max_rounds` is reached.
pub struct ToolLoopDriver {
    backend: Arc<dyn ChatBackend>,
    tools: Arc<ToolSet>,
    config: DriverConfig,
    handler: Arc<dyn EventHandler>,
    transcript: Mutex<Vec<Message>>,
}

impl std::fmt::Debug for ToolLoopDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolLoopDriver")
            .field("config", &self.config)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl ToolLoopDriver {
    pub fn new(backend: Arc<dyn ChatBackend>, tools: Arc<ToolSet>, config: DriverConfig) -> Self {
        Self {
            backend,
            tools,
            config,
            handler: Arc::new(NoopHandler),
            transcript: Mutex::new(Vec::new()),
        }
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Full message list of the most recent run, tool traffic included.
    pub fn last_transcript(&self) -> Vec<Message> {
        self.transcript
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn store_transcript(&self, messages: Vec<Message>) {
        *self.transcript.lock().unwrap_or_else(|e| e.into_inner()) = messages;
    }

    async fn run_loop(&self, mut messages: Vec<Message>) -> Result<DriverOutput, String> {
        let tool_defs = self.tools.definitions();
        let max_rounds = self.config.max_rounds.max(1);
        let mut output = DriverOutput::default();
        let mut texts: Vec<String> = Vec::new();
        let mut empty_retries = 0;
        let mut attempt = 0;
        let mut finished = false;
        let mut round = 0;

        while round < max_rounds {
            round += 1;
            self.handler.on_event(&DriverEvent::RoundStart {
                round,
                max_rounds,
                message_count: messages.len(),
            });

            let request = ChatRequest {
                model: Some(self.config.model.clone()),
                messages: std::mem::take(&mut messages),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                tools: (!tool_defs.is_empty()).then(|| tool_defs.clone()),
                ..Default::default()
            };
            self.handler.on_event(&DriverEvent::RequestSent {
                round,
                attempt,
                request: &request,
            });

            let result = retry_transient(&self.config.retry, || self.backend.chat(&request)).await;
            messages = request.messages;
            let completion = match result {
                Ok(c) => c,
                Err(e) => {
                    self.store_transcript(messages);
                    return Err(e);
                }
            };
            self.handler.on_event(&DriverEvent::ResponseReceived {
                round,
                attempt,
                completion: &completion,
            });

            if let Some(usage) = &completion.usage {
                let prompt_tokens = usage.prompt_tokens.unwrap_or(0);
                let completion_tokens = usage.completion_tokens.unwrap_or(0);
                output.prompt_tokens += prompt_tokens;
                output.completion_tokens += completion_tokens;
                self.handler.on_event(&DriverEvent::TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                });
            }

            let text = completion
                .content
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty());

            if text.is_none() && completion.tool_calls.is_empty() {
                if empty_retries < MAX_EMPTY_RESPONSE_RETRIES {
                    empty_retries += 1;
                    self.handler.on_event(&DriverEvent::EmptyResponse {
                        round,
                        attempt: empty_retries,
                        max_retries: MAX_EMPTY_RESPONSE_RETRIES,
                    });
                    attempt += 1;
                    round -= 1;
                    continue;
                }
                finished = true;
                break;
            }
            attempt = 0;

            if let Some(t) = text {
                self.handler.on_event(&DriverEvent::Text(t));
                texts.push(t.to_string());
            }

            if completion.tool_calls.is_empty() {
                messages.push(Message::assistant_text(text.unwrap_or_default()));
                finished = true;
                break;
            }

            messages.push(Message::assistant_tool_calls(
                completion.content.clone(),
                completion.tool_calls.clone(),
            ));
            for record in self.execute_tool_calls(round, &completion.tool_calls).await {
                messages.push(Message::tool_result(&record.call_id, &record.result));
                output.tool_calls.push(record);
            }
        }

        output.rounds_used = round;
        if finished {
            self.handler.on_event(&DriverEvent::Finished { rounds_used: round });
        } else {
            self.handler
                .on_event(&DriverEvent::RoundLimitReached { max_rounds });
            texts.push(format!(
                "(Stopped after {max_rounds} rounds without a final answer.)"
            ));
        }

        output.text = if texts.is_empty() {
            "(The model returned an empty response.)".to_string()
        } else {
            texts.join("\n\n")
        };
        debug!(
            "Driver run complete: {} round(s), {} tool call(s)",
            output.rounds_used,
            output.tool_calls.len()
        );
        self.store_transcript(messages);
        Ok(output)
    }

    async fn execute_tool_calls(&self, round: u32, calls: &[ToolCall]) -> Vec<ToolCallRecord> {
        let results: Vec<String> = if self.config.parallel_tools && calls.len() > 1 {
            for call in calls {
                self.emit_executing(call);
            }
            futures::future::join_all(
                calls
                    .iter()
                    .map(|c| self.tools.execute(&c.function.name, &c.function.arguments)),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                self.emit_executing(call);
                results.push(
                    self.tools
                        .execute(&call.function.name, &call.function.arguments)
                        .await,
                );
            }
            results
        };

        calls
            .iter()
            .zip(results)
            .map(|(call, result)| {
                self.handler.on_event(&DriverEvent::ToolResult {
                    name: &call.function.name,
                    call_id: &call.id,
                    result: &result,
                });
                ToolCallRecord {
                    round,
                    call_id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                    result,
                }
            })
            .collect()
    }

    fn emit_executing(&self, call: &ToolCall) {
        self.handler.on_event(&DriverEvent::ToolExecuting {
            name: &call.function.name,
            arguments: &call.function.arguments,
        });
    }
}

impl Driver for ToolLoopDriver {
    fn model(&self) -> &str {
        &self.config.model
    }

    fn run(&self, messages: Vec<Message>) -> DriverFuture<'_> {
        Box::pin(self.run_loop(messages))
    }

    fn history_reset(&self) -> Option<&dyn HistoryReset> {
        Some(self)
    }
}

impl HistoryReset for ToolLoopDriver {
    fn reset_history(&self) {
        self.store_transcript(Vec::new());
    }
}

/// Builds [`ToolLoopDriver`]s that share one backend, tool set, and event
/// handler, differing only in model.
pub struct ToolLoopDriverFactory {
    backend: Arc<dyn ChatBackend>,
    tools: Arc<ToolSet>,
    config: DriverConfig,
    handler: Arc<dyn EventHandler>,
}

impl ToolLoopDriverFactory {
    pub fn new(backend: Arc<dyn ChatBackend>, tools: Arc<ToolSet>, config: DriverConfig) -> Self {
        Self {
            backend,
            tools,
            config,
            handler: Arc::new(NoopHandler),
        }
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }
}

impl DriverFactory for ToolLoopDriverFactory {
    fn build(&self, model: &str) -> Result<Box<dyn Driver>, String> {
        if model.trim().is_empty() {
            return Err("model identifier must not be empty".to_string());
        }
        let driver = ToolLoopDriver::new(
            self.backend.clone(),
            self.tools.clone(),
            self.config.clone().with_model(model),
        )
        .with_event_handler(self.handler.clone());
        Ok(Box::new(driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UsageInfo;
    use crate::agent::events::FnEventHandler;
    use crate::api::retry::RetryPolicy;
    use crate::tools::core::{Tool, ToolFuture};
    use crate::{MessageRole, ToolDef};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that replays canned responses and records requests.
    struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<ChatCompletion, String>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<Result<ChatCompletion, String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ChatBackend for ScriptedBackend {
        fn chat<'a>(&'a self, request: &'a ChatRequest) -> ChatFuture<'a> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(tool_call_reply("loop")));
            Box::pin(async move { next })
        }
    }

    struct EchoTool;

    impl Tool for EchoTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("echo", "Echo arguments", serde_json::json!({"type": "object"}))
        }

        fn execute(&self, arguments: &str) -> ToolFuture<'_> {
            let arguments = arguments.to_string();
            Box::pin(async move { format!("echo: {arguments}") })
        }
    }

    fn text_reply(text: &str) -> ChatCompletion {
        ChatCompletion {
            content: Some(text.to_string()),
            usage: Some(UsageInfo {
                prompt_tokens: Some(10),
                completion_tokens: Some(2),
                total_tokens: Some(12),
            }),
            ..Default::default()
        }
    }

    fn tool_call_reply(id: &str) -> ChatCompletion {
        ChatCompletion {
            tool_calls: vec![ToolCall::new(id, "echo", r#"{"x":1}"#)],
            ..Default::default()
        }
    }

    fn driver(backend: Arc<ScriptedBackend>, max_rounds: u32) -> ToolLoopDriver {
        let tools = Arc::new(ToolSet::new().with(EchoTool));
        let config = DriverConfig::new("test-model")
            .with_max_rounds(max_rounds)
            .with_retry_policy(RetryPolicy::none());
        ToolLoopDriver::new(backend, tools, config)
    }

    fn base_messages() -> Vec<Message> {
        vec![Message::system("sys"), Message::user("hello")]
    }

    #[tokio::test]
    async fn text_answer_finishes_in_one_round() {
        let backend = ScriptedBackend::new(vec![Ok(text_reply("done"))]);
        let d = driver(backend.clone(), 5);

        let output = d.run(base_messages()).await.unwrap();
        assert_eq!(output.text, "done");
        assert_eq!(output.rounds_used, 1);
        assert_eq!(output.prompt_tokens, 10);
        assert!(output.tool_calls.is_empty());

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model.as_deref(), Some("test-model"));
        assert_eq!(requests[0].messages, base_messages());
        assert_eq!(requests[0].tools.as_ref().map(Vec::len), Some(1));
        assert_eq!(d.last_transcript().len(), 3);
    }

    #[tokio::test]
    async fn tool_results_are_fed_back_and_recorded() {
        let backend = ScriptedBackend::new(vec![Ok(tool_call_reply("c1")), Ok(text_reply("all set"))]);
        let d = driver(backend.clone(), 5);

        let output = d.run(base_messages()).await.unwrap();
        assert_eq!(output.text, "all set");
        assert_eq!(output.rounds_used, 2);
        assert_eq!(
            output.tool_calls,
            vec![ToolCallRecord {
                round: 1,
                call_id: "c1".into(),
                name: "echo".into(),
                arguments: r#"{"x":1}"#.into(),
                result: r#"echo: {"x":1}"#.into(),
            }]
        );

        let second = &backend.requests()[1].messages;
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].role, MessageRole::Assistant);
        assert_eq!(second[3].role, MessageRole::Tool);
        assert_eq!(second[3].tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn parallel_tools_keep_call_order() {
        let reply = ChatCompletion {
            tool_calls: vec![
                ToolCall::new("a", "echo", "1"),
                ToolCall::new("b", "echo", "2"),
            ],
            ..Default::default()
        };
        let backend = ScriptedBackend::new(vec![Ok(reply), Ok(text_reply("ok"))]);
        let tools = Arc::new(ToolSet::new().with(EchoTool));
        let d = ToolLoopDriver::new(
            backend,
            tools,
            DriverConfig::new("m")
                .with_parallel_tools(true)
                .with_retry_policy(RetryPolicy::none()),
        );

        let output = d.run(base_messages()).await.unwrap();
        let ids: Vec<&str> = output.tool_calls.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(output.tool_calls[1].result, "echo: 2");
    }

    #[tokio::test]
    async fn empty_responses_are_retried() {
        let backend = ScriptedBackend::new(vec![
            Ok(ChatCompletion::default()),
            Ok(text_reply("finally")),
        ]);
        let d = driver(backend.clone(), 5);
        let output = d.run(base_messages()).await.unwrap();
        assert_eq!(output.text, "finally");
        assert_eq!(output.rounds_used, 1);
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn empty_retries_are_reported_as_separate_attempts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let handler = FnEventHandler::new(move |event| {
            if let DriverEvent::ResponseReceived { round, attempt, .. } = event {
                s.lock().unwrap().push((*round, *attempt));
            }
        });
        let backend = ScriptedBackend::new(vec![
            Ok(ChatCompletion::default()),
            Ok(tool_call_reply("c1")),
            Ok(text_reply("done")),
        ]);
        let d = driver(backend, 5).with_event_handler(Arc::new(handler));
        d.run(base_messages()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(1, 0), (1, 1), (2, 0)]);
    }

    #[tokio::test]
    async fn round_limit_produces_notice() {
        let backend = ScriptedBackend::new(vec![]);
        let d = driver(backend.clone(), 2);
        let output = d.run(base_messages()).await.unwrap();
        assert!(output.text.contains("Stopped after 2 rounds"));
        assert_eq!(output.tool_calls.len(), 2);
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn transport_error_propagates() {
        let backend = ScriptedBackend::new(vec![Err("OpenRouter API HTTP 401: nope".into())]);
        let d = driver(backend, 5);
        let err = d.run(base_messages()).await.unwrap_err();
        assert!(err.contains("401"));
    }

    #[tokio::test]
    async fn history_reset_clears_transcript() {
        let backend = ScriptedBackend::new(vec![Ok(text_reply("done"))]);
        let d = driver(backend, 5);
        d.run(base_messages()).await.unwrap();
        assert!(!d.last_transcript().is_empty());

        d.history_reset().unwrap().reset_history();
        assert!(d.last_transcript().is_empty());
    }

    #[tokio::test]
    async fn events_report_requests_and_tools() {
        let requests = Arc::new(AtomicUsize::new(0));
        let tool_runs = Arc::new(AtomicUsize::new(0));
        let (r, t) = (requests.clone(), tool_runs.clone());
        let handler = FnEventHandler::new(move |event| match event {
            DriverEvent::RequestSent { .. } => {
                r.fetch_add(1, Ordering::SeqCst);
            }
            DriverEvent::ToolExecuting { .. } => {
                t.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        });
        let backend = ScriptedBackend::new(vec![Ok(tool_call_reply("c1")), Ok(text_reply("ok"))]);
        let d = driver(backend, 5).with_event_handler(Arc::new(handler));
        d.run(base_messages()).await.unwrap();
        assert_eq!(requests.load(Ordering::SeqCst), 2);
        assert_eq!(tool_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn factory_binds_model() {
        let backend = ScriptedBackend::new(vec![]);
        let factory = ToolLoopDriverFactory::new(
            backend,
            Arc::new(ToolSet::new()),
            DriverConfig::new("base"),
        );
        assert_eq!(factory.build("other").unwrap().model(), "other");
        assert!(factory.build("  ").is_err());
    }
}
