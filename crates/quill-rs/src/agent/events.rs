//! Events emitted by the [`ToolLoopDriver`](super::driver::ToolLoopDriver).
//!
//! The driver reports its lifecycle through [`DriverEvent`] variants, from
//! the first request of a run to the final answer. Callers implement
//! [`EventHandler`] to observe them for logging, debug persistence, or
//! tests.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or quiet runs |
//! | [`LoggingHandler`] | Progress via `tracing` |
//! | [`FnEventHandler`] | Quick closures |
//! | [`CompositeEventHandler`] | Several handlers in order |

use crate::{ChatCompletion, ChatRequest};
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum DriverEvent<'a> {
    /// A new round is starting.
    RoundStart {
        round: u32,
        max_rounds: u32,
        message_count: usize,
    },
    /// The request about to be sent to the API. `attempt` is 0 for the
    /// first request of a round and counts up on empty-response retries.
    RequestSent {
        round: u32,
        attempt: u32,
        request: &'a ChatRequest,
    },
    /// The parsed API response for a round.
    ResponseReceived {
        round: u32,
        attempt: u32,
        completion: &'a ChatCompletion,
    },
    /// The model returned text (possibly alongside tool calls).
    Text(&'a str),
    /// A single tool is about to be executed.
    ToolExecuting { name: &'a str, arguments: &'a str },
    /// A single tool finished executing.
    ToolResult {
        name: &'a str,
        call_id: &'a str,
        result: &'a str,
    },
    /// Token usage reported by the API for this round.
    TokenUsage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    /// No content, no tool calls. The driver retries up to `max_retries`.
    EmptyResponse {
        round: u32,
        attempt: u32,
        max_retries: u32,
    },
    /// The model answered without requesting tools.
    Finished { rounds_used: u32 },
    /// The run stopped at the round limit.
    RoundLimitReached { max_rounds: u32 },
}

/// Observer for driver events. The default implementation ignores them.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &DriverEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;

impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&DriverEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&DriverEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&DriverEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &DriverEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_opt(debug_enabled.then(|| DebugEventHandler::new(sink.clone())));
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &DriverEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs driver progress through `tracing`.
///
/// Tool calls are INFO so the REPL shows what the assistant is doing;
/// everything else is DEBUG.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &DriverEvent<'_>) {
        match event {
            DriverEvent::RoundStart {
                round,
                max_rounds,
                message_count,
            } => {
                debug!("[round {round}/{max_rounds}] {message_count} messages");
            }
            DriverEvent::RequestSent { .. } | DriverEvent::ResponseReceived { .. } => {}
            DriverEvent::Text(text) => {
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "LLM text: {preview}{}",
                    if text.chars().count() > 200 { "..." } else { "" }
                );
            }
            DriverEvent::ToolExecuting { name, arguments } => {
                let preview: String = arguments.chars().take(100).collect();
                info!(
                    "[tool] {name}({preview}{})",
                    if arguments.chars().count() > 100 { "..." } else { "" }
                );
            }
            DriverEvent::ToolResult { name, result, .. } => {
                debug!("Tool {name} result: {} bytes", result.len());
            }
            DriverEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
            } => {
                debug!("Tokens: prompt={prompt_tokens}, completion={completion_tokens}");
            }
            DriverEvent::EmptyResponse {
                round,
                attempt,
                max_retries,
            } => {
                warn!("Empty API response at round {round}. Retrying ({attempt}/{max_retries})");
            }
            DriverEvent::Finished { rounds_used } => {
                debug!("Driver finished after {rounds_used} round(s)");
            }
            DriverEvent::RoundLimitReached { max_rounds } => {
                warn!("Driver hit round limit ({max_rounds})");
            }
        }
    }
}
