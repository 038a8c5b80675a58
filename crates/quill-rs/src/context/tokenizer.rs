//! Token counting for budget decisions.
//!
//! [`TokenCounter`] is the seam: production code uses [`TiktokenCounter`]
//! (the `o200k_base` BPE vocabulary), tests plug in deterministic counters.
//! [`count_message_list_tokens`] applies the chat-completion accounting
//! convention on top of any counter:
//!
//! ```text
//! total = Σ(3 + tokens(string fields) + tokens(content[*].text) + [1 if name]) + 3
//! ```

use std::sync::OnceLock;

use serde_json::Value;
use tiktoken_rs::CoreBPE;
use tracing::warn;

use crate::Message;

/// Fixed overhead charged for every message in a list.
pub const TOKENS_PER_MESSAGE: usize = 3;

/// Extra overhead for a message that carries a `name` field.
pub const TOKENS_PER_NAME: usize = 1;

/// Charged once per list for the primed assistant reply.
pub const REPLY_PRIMING_TOKENS: usize = 3;

/// Counts tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Approximate count used when no tokenizer is available: one token per
/// four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

// ── TiktokenCounter ────────────────────────────────────────────────

fn bpe() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| match tiktoken_rs::o200k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            warn!("Failed to load o200k_base tokenizer, using chars/4 estimate: {e}");
            None
        }
    })
    .as_ref()
}

/// BPE token counter backed by the `o200k_base` vocabulary.
///
/// The vocabulary is loaded once per process on first use. If it cannot be
/// loaded, counts degrade to [`estimate_tokens`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TiktokenCounter;

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match bpe() {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => estimate_tokens(text),
        }
    }
}

/// Counter that always uses the `chars / 4` estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimateCounter;

impl TokenCounter for CharEstimateCounter {
    fn count_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

// ── Message lists ──────────────────────────────────────────────────

/// Count tokens for a list of JSON chat messages.
///
/// Every string-valued field is charged (role included), list-valued fields
/// contribute the `text` of each part, and a `name` key adds
/// [`TOKENS_PER_NAME`]. Non-object entries only pay the per-message
/// overhead.
pub fn count_message_list_tokens(counter: &dyn TokenCounter, messages: &[Value]) -> usize {
    let per_message: usize = messages
        .iter()
        .map(|message| {
            let mut total = TOKENS_PER_MESSAGE;
            let Some(fields) = message.as_object() else {
                return total;
            };
            for (key, value) in fields {
                match value {
                    Value::String(s) => total += counter.count_tokens(s),
                    Value::Array(parts) => {
                        total += parts
                            .iter()
                            .filter_map(|part| part.get("text").and_then(Value::as_str))
                            .map(|text| counter.count_tokens(text))
                            .sum::<usize>();
                    }
                    _ => {}
                }
                if key == "name" {
                    total += TOKENS_PER_NAME;
                }
            }
            total
        })
        .sum();
    per_message + REPLY_PRIMING_TOKENS
}

/// Count tokens for typed messages, using their wire representation.
pub fn count_messages(counter: &dyn TokenCounter, messages: &[Message]) -> usize {
    let values: Vec<Value> = messages
        .iter()
        .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
        .collect();
    count_message_list_tokens(counter, &values)
}
