//! Transport helpers between the tool-calling driver and the chat API.
//!
//! - [`retry`]: error classification (429, 5xx, network failures versus
//!   400/401-style rejections) and exponential backoff for transient errors.

pub mod retry;

pub use retry::{ErrorClass, RetryPolicy, classify_error, retry_transient};
