//! Terminal coding assistant powered by quill-rs.
//!
//! `quill-code` wires the quill-rs runtime into a command line assistant:
//! configuration, the workspace-aware system prompt, a console logging
//! layer, the optional `council` tool and the interactive loop.
//!
//! # Library usage
//!
//! ```ignore
//! use quill_code::{CodeConfig, WorkspacePrompt};
//! use quill_rs::prelude::*;
//!
//! let config = CodeConfig::default();
//! let workdir = WorkingDir::new(std::env::current_dir()?);
//! let tools = config.build_tool_set(&workdir, client.clone());
//! let mut context = config.build_context_manager();
//! context.set_system_prompt(WorkspacePrompt.build(&workdir.get()));
//! ```
//!
//! # Binary
//!
//! ```sh
//! # One-shot
//! quill "Add error handling to src/main.rs"
//!
//! # Interactive, starting on the pro model with debug records
//! quill -i --pro -d
//! ```

pub mod config;
pub mod logging;
pub mod prompt;
pub mod repl;
pub mod tools;

pub use config::CodeConfig;
pub use logging::ConsoleLayer;
pub use prompt::{WorkspacePrompt, coding_system_prompt};
pub use repl::{Repl, ReplCommand, parse_command};
pub use tools::CouncilTool;
