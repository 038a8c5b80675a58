//! Tools that only the `quill` assistant registers on top of the built-in
//! set from [`quill_rs::tools`].

pub mod council;

pub use council::{CouncilTool, Specialist, default_specialists};

pub const COUNCIL: &str = "council";
