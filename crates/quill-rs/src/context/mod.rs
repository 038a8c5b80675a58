//! Conversation context: token accounting, bounded history, and the context
//! manager that keeps system prompt plus history inside a token ceiling.
//!
//! - [`tokenizer`]: the [`TokenCounter`] seam and chat-style message-list
//!   accounting (per-message, per-name and reply-preamble overhead).
//! - [`history`]: [`ConversationHistory`], a FIFO of interactions with
//!   parallel per-interaction token counts.
//! - [`manager`]: [`ContextManager`], which owns the system prompt and the
//!   history and assembles the message list sent to the model.

pub mod history;
pub mod manager;
pub mod tokenizer;

pub use history::{ConversationHistory, Interaction};
pub use manager::{ContextInfo, ContextManager};
pub use tokenizer::{CharEstimateCounter, TiktokenCounter, TokenCounter};

/// Format an integer with `,` thousands separators (`1234567` -> `1,234,567`).
pub fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
