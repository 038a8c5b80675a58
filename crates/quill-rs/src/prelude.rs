//! Convenience re-exports for common `quill-rs` types.
//!
//! ```ignore
//! use quill_rs::prelude::*;
//! ```
//!
//! Retry helpers, tokenizer internals and the individual tool structs are
//! left out; import those from their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatRequest, Message, OpenRouterClient, ToolDef, json_schema_for};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    CompositeEventHandler, Driver, DriverConfig, DriverEvent, DriverFactory, DriverOutput,
    EventHandler, FnEventHandler, LoggingHandler, ModelPair, NoopHandler, Session,
    SystemPromptSource, ToolLoopDriver, ToolLoopDriverFactory,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{ContextInfo, ContextManager, ConversationHistory, TokenCounter};

// ── Telemetry ───────────────────────────────────────────────────────
pub use crate::telemetry::{DebugEventHandler, DebugSink};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{Tool, ToolFuture, ToolSet, ToolSpec, WorkingDir, parse_tool_args};
