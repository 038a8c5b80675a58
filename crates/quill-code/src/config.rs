//! Assistant configuration with sensible defaults.
//!
//! [`CodeConfig`] captures the settings the `quill` binary exposes on the
//! command line and converts them into quill-rs types: a [`DriverConfig`],
//! a [`ToolSet`], a [`ContextManager`] and a [`DebugSink`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quill_rs::agent::{ChatBackend, DriverConfig, ModelPair};
use quill_rs::context::ContextManager;
use quill_rs::telemetry::{DEFAULT_DEBUG_DIR, DebugSink};
use quill_rs::tools::{ToolSet, WorkingDir};
use quill_rs::{DEFAULT_MODEL, DEFAULT_PRO_MODEL};

use crate::tools::CouncilTool;

/// Configuration for one assistant process.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeConfig {
    /// Everyday model. Default: `"google/gemini-2.5-flash"`.
    pub model: String,
    /// Model used after `pro` or with `--pro`. Default: `"google/gemini-2.5-pro"`.
    pub pro_model: String,
    /// Start on the pro model. Default: `false`.
    pub use_pro: bool,
    /// Maximum tool-use round-trips per query. Default: `50`.
    pub max_rounds: u32,
    /// Maximum tokens per LLM response. Default: `16384`.
    pub max_tokens: u32,
    /// Sampling temperature. Default: `0.3`.
    pub temperature: f32,
    /// Interactions kept in history. Default: `10`.
    pub max_interactions: usize,
    /// Token ceiling for system prompt plus history. Default: `600000`.
    pub max_context_tokens: usize,
    /// Write debug records. Default: `false`.
    pub debug: bool,
    /// Where debug records go. Default: `"debug-logs"`.
    pub debug_dir: PathBuf,
    /// Register the `council` tool. Default: `false`.
    pub council: bool,
    /// Per-tool timeout applied by the tool set. Default: none; `bash`
    /// enforces its own.
    pub tool_timeout: Option<Duration>,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            pro_model: DEFAULT_PRO_MODEL.to_string(),
            use_pro: false,
            max_rounds: 50,
            max_tokens: 16384,
            temperature: 0.3,
            max_interactions: 10,
            max_context_tokens: 600_000,
            debug: false,
            debug_dir: PathBuf::from(DEFAULT_DEBUG_DIR),
            council: false,
            tool_timeout: None,
        }
    }
}

impl CodeConfig {
    pub fn models(&self) -> ModelPair {
        ModelPair::new(self.model.clone(), self.pro_model.clone())
    }

    /// The model the session starts on.
    pub fn initial_model(&self) -> &str {
        if self.use_pro { &self.pro_model } else { &self.model }
    }

    /// Driver settings shared by every model the session switches to.
    pub fn build_driver_config(&self) -> DriverConfig {
        DriverConfig::new(self.initial_model())
            .with_max_rounds(self.max_rounds)
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
    }

    /// Built-in file, search and shell tools on `workdir`, plus `council`
    /// when enabled.
    pub fn build_tool_set(&self, workdir: &WorkingDir, backend: Arc<dyn ChatBackend>) -> ToolSet {
        ToolSet::new()
            .with_arg_validation(true)
            .with_default_timeout(self.tool_timeout)
            .with_file_tools(workdir)
            .with_if(self.council, CouncilTool::new(backend, workdir.clone()))
    }

    pub fn build_context_manager(&self) -> ContextManager {
        ContextManager::new(self.max_interactions, self.max_context_tokens)
    }

    pub fn build_debug_sink(&self) -> Arc<DebugSink> {
        Arc::new(DebugSink::new(self.debug, self.debug_dir.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_rs::agent::driver::ChatFuture;
    use quill_rs::{ChatCompletion, ChatRequest};

    struct NullBackend;

    impl ChatBackend for NullBackend {
        fn chat<'a>(&'a self, _request: &'a ChatRequest) -> ChatFuture<'a> {
            Box::pin(async { Ok(ChatCompletion::default()) })
        }
    }

    #[test]
    fn defaults() {
        let config = CodeConfig::default();
        assert_eq!(config.model, "google/gemini-2.5-flash");
        assert_eq!(config.pro_model, "google/gemini-2.5-pro");
        assert_eq!(config.max_rounds, 50);
        assert_eq!(config.max_tokens, 16384);
        assert!((config.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.max_interactions, 10);
        assert_eq!(config.max_context_tokens, 600_000);
        assert_eq!(config.debug_dir, PathBuf::from("debug-logs"));
        assert!(!config.debug && !config.council);
    }

    #[test]
    fn driver_config_follows_pro_flag() {
        let mut config = CodeConfig {
            max_rounds: 7,
            ..Default::default()
        };
        assert_eq!(config.build_driver_config().model, config.model);
        config.use_pro = true;
        let driver = config.build_driver_config();
        assert_eq!(driver.model, "google/gemini-2.5-pro");
        assert_eq!(driver.max_rounds, 7);
        assert_eq!(driver.max_tokens, 16384);
    }

    #[test]
    fn council_is_opt_in() {
        let workdir = WorkingDir::new("/tmp");
        let config = CodeConfig::default();
        let tools = config.build_tool_set(&workdir, Arc::new(NullBackend));
        assert_eq!(
            tools.names(),
            vec!["bash", "cd", "edit", "glob", "grep", "ls", "view", "write"]
        );

        let config = CodeConfig {
            council: true,
            ..Default::default()
        };
        let tools = config.build_tool_set(&workdir, Arc::new(NullBackend));
        assert!(tools.names().contains(&"council"));
    }

    #[test]
    fn context_manager_uses_limits() {
        let config = CodeConfig {
            max_interactions: 3,
            max_context_tokens: 1234,
            ..Default::default()
        };
        let context = config.build_context_manager();
        assert_eq!(context.max_context_tokens(), 1234);
        assert_eq!(context.conversation().max_interactions(), 3);
    }

    #[test]
    fn debug_sink_disabled_by_default() {
        assert!(!CodeConfig::default().build_debug_sink().is_enabled());

        let dir = tempfile::tempdir().unwrap();
        let config = CodeConfig {
            debug: true,
            debug_dir: dir.path().join("logs"),
            ..Default::default()
        };
        let sink = config.build_debug_sink();
        assert!(sink.is_enabled());
        assert!(dir.path().join("logs").is_dir());
    }
}
