//! Tools the model can call while answering a query.
//!
//! Every capability is a [`Tool`] implementor collected into a [`ToolSet`],
//! which handles dispatch, validation, truncation, and timeouts. All file
//! and shell tools share one [`WorkingDir`].
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`] trait and [`ToolSet`].
//! - [`files`]: `view`, `edit`, `write`.
//! - [`search`]: `ls`, `glob`, `grep`.
//! - [`shell`]: `bash`, `cd`, and the process helpers.
//! - [`spec`]: [`ToolSpec`] builder for structured tool descriptions.
//! - [`workdir`]: the shared [`WorkingDir`].

pub mod core;
pub mod files;
pub mod search;
pub mod shell;
pub mod spec;
pub mod workdir;

pub use core::{
    DEFAULT_MAX_RESULT_BYTES, Tool, ToolFuture, ToolSet, parse_tool_args, truncate_result,
    validate_tool_arguments,
};
pub use spec::ToolSpec;
pub use workdir::WorkingDir;
