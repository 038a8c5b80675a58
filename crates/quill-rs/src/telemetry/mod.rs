//! Debug sink: persists prompts, API traffic and tool calls for inspection.
//!
//! A [`DebugSink`] is constructed explicitly (usually once per process, from
//! the `--debug` flag) and shared through an `Arc`. Every file carries the
//! sink's session id, and per-call files carry the zero-padded call number
//! the [`Session`](crate::agent::session::Session) assigns, so one turn's
//! request, response and tool traffic can be lined up afterwards.
//!
//! The sink is purely observational: write failures are logged with
//! `warn!` and never reach the caller.

pub mod handler;

pub use handler::DebugEventHandler;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Local;
use serde_json::json;
use tracing::{debug, warn};

use crate::agent::driver::ToolCallRecord;
use crate::context::ContextInfo;
use crate::{ChatCompletion, ChatRequest, Message};

/// Default directory for debug output, relative to the launch directory.
pub const DEFAULT_DEBUG_DIR: &str = "debug-logs";

const BANNER_WIDTH: usize = 80;
const SECTION_WIDTH: usize = 40;
const MESSAGE_RULE_WIDTH: usize = 50;

#[derive(Debug)]
pub struct DebugSink {
    enabled: bool,
    dir: PathBuf,
    session_id: String,
    current_call: AtomicU32,
}

impl Default for DebugSink {
    fn default() -> Self {
        Self::disabled()
    }
}

impl DebugSink {
    /// Create a sink writing into `dir`. When `enabled` is true the directory
    /// is created; if that fails the sink disables itself.
    pub fn new(enabled: bool, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let session_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut enabled = enabled;
        if enabled {
            match fs::create_dir_all(&dir) {
                Ok(()) => debug!(
                    "Debug logging enabled: {} (session {session_id})",
                    dir.display()
                ),
                Err(e) => {
                    warn!(
                        "Could not create debug directory {}: {e}. Debug logging disabled",
                        dir.display()
                    );
                    enabled = false;
                }
            }
        }
        Self {
            enabled,
            dir,
            session_id,
            current_call: AtomicU32::new(0),
        }
    }

    /// A sink that records nothing.
    pub fn disabled() -> Self {
        Self::new(false, DEFAULT_DEBUG_DIR)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Mark the start of call `call_number`; driver-level records use it.
    pub fn begin_call(&self, call_number: u32) {
        self.current_call.store(call_number, Ordering::SeqCst);
    }

    pub fn current_call(&self) -> u32 {
        self.current_call.load(Ordering::SeqCst)
    }

    // ── Records ───────────────────────────────────────────────────

    pub fn log_system_prompt(&self, prompt: &str) {
        if !self.enabled {
            return;
        }
        let banner = "=".repeat(BANNER_WIDTH);
        let body = format!(
            "{banner}\nSYSTEM PROMPT - {}\n{banner}\n\n{prompt}\n\n{banner}\nEND OF SYSTEM PROMPT\n{banner}\n",
            timestamp()
        );
        self.write(&format!("system_prompt_{}.txt", self.session_id), &body);
    }

    /// The user query and final response of one call.
    pub fn log_api_call(&self, query: &str, response: &str, call_number: u32) {
        if !self.enabled {
            return;
        }
        let banner = "=".repeat(BANNER_WIDTH);
        let rule = "-".repeat(SECTION_WIDTH);
        let body = format!(
            "{banner}\nAPI CALL #{call_number} - {}\n{banner}\n\n\
             USER QUERY:\n{rule}\n{query}\n\n\
             ASSISTANT RESPONSE:\n{rule}\n{response}\n\n\
             {banner}\nEND OF API CALL #{call_number}\n{banner}\n",
            timestamp()
        );
        self.write(&self.call_file("api_call", call_number, "txt"), &body);
    }

    /// The complete message list handed to the driver for one call.
    pub fn log_full_context(&self, messages: &[Message], call_number: u32) {
        if !self.enabled {
            return;
        }
        let payload = json!({
            "timestamp": timestamp(),
            "call_number": call_number,
            "complete_conversation_context": messages,
        });
        self.write_json(&self.call_file("full_context", call_number, "json"), &payload);

        let banner = "=".repeat(BANNER_WIDTH);
        let rule = "-".repeat(MESSAGE_RULE_WIDTH);
        let mut text = format!(
            "{banner}\nCOMPLETE CONVERSATION CONTEXT - CALL #{call_number}\n{banner}\n\n"
        );
        for (i, message) in messages.iter().enumerate() {
            text.push_str(&format!(
                "MESSAGE {} ({}):\n{rule}\n{}\n\n",
                i + 1,
                message.role,
                message.text()
            ));
        }
        self.write(&self.call_file("full_context", call_number, "txt"), &text);
    }

    /// One raw API request as sent by the driver. Retries of a round
    /// (`attempt > 0`) get their own files.
    pub fn log_raw_request(
        &self,
        request: &ChatRequest,
        call_number: u32,
        round: u32,
        attempt: u32,
    ) {
        if !self.enabled {
            return;
        }
        let params = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "tools": request.tools.as_ref().map_or(0, Vec::len),
        });
        let payload = json!({
            "timestamp": timestamp(),
            "call_number": call_number,
            "round": round,
            "attempt": attempt,
            "messages": request.messages,
            "kwargs": params,
        });
        self.write_json(
            &self.round_file("raw_api_request", call_number, round, attempt, "json"),
            &payload,
        );

        let banner = "=".repeat(BANNER_WIDTH);
        let rule = "-".repeat(SECTION_WIDTH);
        let mut text = format!(
            "{banner}\nRAW API REQUEST - CALL #{call_number} ROUND {round}\n{banner}\n\n\
             ADDITIONAL PARAMETERS:\n{rule}\n{}\n\nMESSAGES SENT TO API:\n{rule}\n",
            serde_json::to_string_pretty(&params).unwrap_or_default()
        );
        for (i, message) in request.messages.iter().enumerate() {
            text.push_str(&format!(
                "\n[MESSAGE {}] ROLE: {}\n{}\n",
                i + 1,
                message.role.to_string().to_uppercase(),
                message.text()
            ));
            if let Some(calls) = &message.tool_calls {
                for call in calls {
                    text.push_str(&format!(
                        "  -> tool call {}: {}({})\n",
                        call.id, call.function.name, call.function.arguments
                    ));
                }
            }
        }
        self.write(
            &self.round_file("raw_api_request", call_number, round, attempt, "txt"),
            &text,
        );
    }

    /// One parsed API response.
    pub fn log_raw_response(
        &self,
        completion: &ChatCompletion,
        call_number: u32,
        round: u32,
        attempt: u32,
    ) {
        if !self.enabled {
            return;
        }
        let payload = json!({
            "timestamp": timestamp(),
            "call_number": call_number,
            "round": round,
            "attempt": attempt,
            "response": completion,
        });
        self.write_json(
            &self.round_file("raw_api_response", call_number, round, attempt, "json"),
            &payload,
        );
    }

    /// Tool invocations of one call. Nothing is written when there were none.
    pub fn log_tool_calls(&self, calls: &[ToolCallRecord], call_number: u32) {
        if !self.enabled || calls.is_empty() {
            return;
        }
        let payload = json!({
            "timestamp": timestamp(),
            "call_number": call_number,
            "tool_calls": calls,
        });
        self.write_json(&self.call_file("tool_calls", call_number, "json"), &payload);
    }

    pub fn log_context_info(&self, info: &ContextInfo) {
        if !self.enabled {
            return;
        }
        let payload = json!({
            "timestamp": timestamp(),
            "context_info": info,
        });
        self.write_json(&format!("context_info_{}.json", self.session_id), &payload);
    }

    // ── Helpers ───────────────────────────────────────────────────

    fn call_file(&self, kind: &str, call_number: u32, ext: &str) -> String {
        format!("{kind}_{}_{call_number:03}.{ext}", self.session_id)
    }

    fn round_file(
        &self,
        kind: &str,
        call_number: u32,
        round: u32,
        attempt: u32,
        ext: &str,
    ) -> String {
        let retry = if attempt > 0 {
            format!("_a{attempt}")
        } else {
            String::new()
        };
        format!(
            "{kind}_{}_{call_number:03}_r{round:02}{retry}.{ext}",
            self.session_id
        )
    }

    fn write_json(&self, name: &str, payload: &serde_json::Value) {
        match serde_json::to_string_pretty(payload) {
            Ok(body) => self.write(name, &body),
            Err(e) => warn!("Failed to serialize debug record {name}: {e}"),
        }
    }

    fn write(&self, name: &str, body: &str) {
        let path = self.dir.join(name);
        match fs::write(&path, body) {
            Ok(()) => debug!("Debug record saved: {}", path.display()),
            Err(e) => warn!("Failed to write debug record {}: {e}", path.display()),
        }
    }
}

fn timestamp() -> String {
    Local::now().to_rfc3339()
}
