//! Tool abstraction for the assistant's function calling.
//!
//! Every capability the model can invoke implements [`Tool`]: a static
//! definition (name, description, JSON schema) and an async `execute` that
//! takes the raw JSON arguments and returns a string. Tools are collected
//! into a [`ToolSet`] which handles dispatch, optional schema validation,
//! timeouts, and result truncation.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::ToolDef;
use crate::tools::workdir::WorkingDir;

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = String> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool the model can invoke.
///
/// ```ignore
/// struct Pwd { workdir: WorkingDir }
///
/// impl Tool for Pwd {
///     fn definition(&self) -> ToolDef { /* ... */ }
///
///     fn execute(&self, _arguments: &str) -> ToolFuture<'_> {
///         let dir = self.workdir.get();
///         Box::pin(async move { dir.display().to_string() })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The tool definition sent to the API.
    fn definition(&self) -> ToolDef;

    /// Execute with the raw JSON arguments string.
    ///
    /// Failures are returned as `"Error: ..."` strings; the driver feeds the
    /// string back to the model either way.
    fn execute(&self, arguments: &str) -> ToolFuture<'_>;

    fn name(&self) -> String {
        self.definition().function.name
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// Tools keyed by name.
///
/// ```ignore
/// let workdir = WorkingDir::new(std::env::current_dir()?);
/// let tools = ToolSet::new()
///     .with_arg_validation(true)
///     .with_file_tools(&workdir)
///     .with_if(council_enabled, CouncilTool::new(client));
/// ```
pub struct ToolSet {
    tools: BTreeMap<String, Box<dyn Tool>>,
    max_result_bytes: usize,
    validate_args: bool,
    /// `None` disables the outer timeout; tools may still enforce their own.
    default_timeout: Option<Duration>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("max_result_bytes", &self.max_result_bytes)
            .field("validate_args", &self.validate_args)
            .finish()
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: false,
            default_timeout: None,
        }
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Validate arguments against each tool's JSON Schema before execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Register `tool` only when `condition` holds.
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// Register the built-in file, search, directory and shell tools, all
    /// resolving paths against `workdir`.
    pub fn with_file_tools(self, workdir: &WorkingDir) -> Self {
        use crate::tools::files::{EditFile, ViewFile, WriteFile};
        use crate::tools::search::{GlobFiles, GrepFiles, ListDir};
        use crate::tools::shell::{Bash, ChangeDirectory};

        self.with(ViewFile::new(workdir.clone()))
            .with(EditFile::new(workdir.clone()))
            .with(WriteFile::new(workdir.clone()))
            .with(ListDir::new(workdir.clone()))
            .with(GlobFiles::new(workdir.clone()))
            .with(GrepFiles::new(workdir.clone()))
            .with(ChangeDirectory::new(workdir.clone()))
            .with(Bash::new(workdir.clone()))
    }

    /// Definitions for the API, ordered by name.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call by name. Unknown tools, invalid arguments and
    /// timeouts all come back as `"Error: ..."` strings.
    pub async fn execute(&self, name: &str, arguments: &str) -> String {
        let Some(tool) = self.tools.get(name) else {
            return format!("Error: unknown tool '{name}'");
        };

        if self.validate_args
            && let Some(error) = validate_tool_arguments(tool.as_ref(), arguments)
        {
            return error;
        }

        log_tool_call(name, arguments);
        let start = std::time::Instant::now();

        let result = match self.default_timeout {
            Some(limit) => match tokio::time::timeout(limit, tool.execute(arguments)).await {
                Ok(r) => r,
                Err(_) => {
                    info!(
                        "Tool {name} timed out after {:.1}s",
                        start.elapsed().as_secs_f64()
                    );
                    format!(
                        "Error: tool '{name}' timed out after {:.0} seconds",
                        limit.as_secs_f64()
                    )
                }
            },
            None => tool.execute(arguments).await,
        };

        debug!(
            "Tool {name} completed in {:.0}ms ({} bytes)",
            start.elapsed().as_secs_f64() * 1000.0,
            result.len()
        );
        trace!(
            "Tool {name} result preview: {}",
            result.chars().take(300).collect::<String>()
        );

        truncate_result(result, self.max_result_bytes)
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate arguments against the tool's declared JSON Schema.
///
/// Returns `None` if valid, otherwise an error string the model can act on.
pub fn validate_tool_arguments(tool: &dyn Tool, arguments: &str) -> Option<String> {
    let value: serde_json::Value = match serde_json::from_str(arguments) {
        Ok(v) => v,
        Err(e) => {
            return Some(format!(
                "Error: invalid JSON arguments for tool '{}': {e}",
                tool.name()
            ));
        }
    };

    let schema = tool.definition().function.parameters;
    // An invalid schema is the tool's problem, not the caller's.
    let Ok(validator) = jsonschema::validator_for(&schema) else {
        return None;
    };

    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Error: argument validation failed for tool '{}':\n{}\nPlease fix the arguments and try again.",
            tool.name(),
            errors.join("\n")
        ))
    }
}

/// Log a tool call at DEBUG with a truncated preview of its arguments.
/// The INFO-level `[tool]` line comes from the driver's logging handler.
pub fn log_tool_call(name: &str, arguments: &str) {
    let preview: String = arguments.chars().take(120).collect();
    debug!(
        "[tool] {name}({preview}{}) {} bytes",
        if arguments.chars().count() > 120 { "..." } else { "" },
        arguments.len()
    );
    trace!("[tool] {name} arguments: {arguments}");
}

/// Truncate to at most `max` bytes on a char boundary, appending a notice.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let head = s.get(..end).unwrap_or_default();
    format!("{head}...\n[truncated: {} bytes total]", s.len())
}

/// Parse raw JSON arguments into a typed struct, or an `"Error: ..."` string
/// ready to return from [`Tool::execute`].
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(arguments: &str) -> Result<T, String> {
    serde_json::from_str(arguments).map_err(|e| format!("Error: invalid tool arguments: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    impl Tool for EchoTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new(
                "echo",
                "Echo the input",
                serde_json::json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            )
        }

        fn execute(&self, arguments: &str) -> ToolFuture<'_> {
            let result = serde_json::from_str::<serde_json::Value>(arguments)
                .ok()
                .and_then(|v| v["text"].as_str().map(String::from))
                .unwrap_or_else(|| "Error: no text".into());
            Box::pin(async move { result })
        }
    }

    struct SlowTool;

    impl Tool for SlowTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("slow", "Sleeps", serde_json::json!({"type": "object"}))
        }

        fn execute(&self, _arguments: &str) -> ToolFuture<'_> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "done".to_string()
            })
        }
    }

    #[test]
    fn definitions_are_sorted_by_name() {
        let set = ToolSet::new().with(SlowTool).with(EchoTool);
        assert_eq!(set.len(), 2);
        assert_eq!(set.names(), ["echo", "slow"]);
        let defs = set.definitions();
        assert_eq!(defs[0].function.name, "echo");
    }

    #[test]
    fn with_if_respects_condition() {
        assert_eq!(ToolSet::new().with_if(false, EchoTool).len(), 0);
        assert_eq!(ToolSet::new().with_if(true, EchoTool).len(), 1);
    }

    #[test]
    fn file_tools_are_registered() {
        let workdir = WorkingDir::new("/tmp");
        let set = ToolSet::new().with_file_tools(&workdir);
        assert_eq!(
            set.names(),
            ["bash", "cd", "edit", "glob", "grep", "ls", "view", "write"]
        );
    }

    #[tokio::test]
    async fn execute_known_and_unknown() {
        let set = ToolSet::new().with(EchoTool);
        assert_eq!(set.execute("echo", r#"{"text": "hello"}"#).await, "hello");
        assert!(set.execute("missing", "{}").await.contains("unknown tool"));
    }

    #[tokio::test]
    async fn validation_rejects_bad_arguments() {
        let set = ToolSet::new().with_arg_validation(true).with(EchoTool);
        let result = set.execute("echo", r#"{"text": 5}"#).await;
        assert!(result.starts_with("Error: argument validation failed"));
        let result = set.execute("echo", "not json").await;
        assert!(result.contains("invalid JSON"));
    }

    #[tokio::test]
    async fn timeout_produces_error() {
        let set = ToolSet::new()
            .with_default_timeout(Some(Duration::from_millis(20)))
            .with(SlowTool);
        let result = set.execute("slow", "{}").await;
        assert!(result.contains("timed out"));
    }

    #[tokio::test]
    async fn long_results_are_truncated() {
        let set = ToolSet::new().with_max_result_bytes(3).with(EchoTool);
        let result = set.execute("echo", r#"{"text": "abcdef"}"#).await;
        assert!(result.starts_with("abc..."));
        assert!(result.contains("[truncated: 6 bytes total]"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "ééé".to_string(); // 6 bytes
        let out = truncate_result(s, 3);
        assert!(out.starts_with("é..."));
        assert_eq!(truncate_result("short".into(), 10), "short");
    }

    #[test]
    fn parse_tool_args_reports_errors() {
        #[derive(serde::Deserialize)]
        struct Args {
            path: String,
        }
        let ok: Args = parse_tool_args(r#"{"path": "a"}"#).unwrap();
        assert_eq!(ok.path, "a");
        let err = parse_tool_args::<Args>("{}").err().unwrap();
        assert!(err.starts_with("Error: invalid tool arguments"));
    }
}
