//! Bounded conversation history with token-budget trimming.
//!
//! [`ConversationHistory`] keeps user/assistant interaction pairs in a FIFO
//! queue capped at `max_interactions`. Each interaction's token cost is
//! computed once at insertion and stored in a parallel queue, so evicting
//! the oldest entry never re-tokenizes anything and `total_tokens` always
//! equals the sum of the retained costs.
//!
//! Trimming is oldest-first and stops at one interaction: a single turn that
//! alone exceeds the budget is kept whole rather than truncated.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::group_thousands;
use super::tokenizer::{TOKENS_PER_MESSAGE, TiktokenCounter, TokenCounter};
use crate::Message;

/// Default number of interactions kept.
pub const DEFAULT_MAX_INTERACTIONS: usize = 8;

/// Default token ceiling for the history.
pub const DEFAULT_MAX_TOKENS: usize = 100_000;

/// One user query paired with the assistant's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub user: String,
    pub assistant: String,
}

impl Interaction {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

/// FIFO of interactions bounded by count and by tokens.
pub struct ConversationHistory {
    interactions: VecDeque<Interaction>,
    token_counts: VecDeque<usize>,
    total_tokens: usize,
    max_interactions: usize,
    max_tokens: usize,
    counter: Arc<dyn TokenCounter>,
}

impl fmt::Debug for ConversationHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationHistory")
            .field("interactions", &self.interactions.len())
            .field("total_tokens", &self.total_tokens)
            .field("max_interactions", &self.max_interactions)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INTERACTIONS, DEFAULT_MAX_TOKENS)
    }
}

impl ConversationHistory {
    /// Create a history using the BPE token counter.
    ///
    /// `max_interactions` is clamped to at least 1.
    pub fn new(max_interactions: usize, max_tokens: usize) -> Self {
        Self::with_counter(max_interactions, max_tokens, Arc::new(TiktokenCounter))
    }

    /// Create a history with a custom token counter.
    pub fn with_counter(
        max_interactions: usize,
        max_tokens: usize,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        let max_interactions = max_interactions.max(1);
        Self {
            interactions: VecDeque::with_capacity(max_interactions),
            token_counts: VecDeque::with_capacity(max_interactions),
            total_tokens: 0,
            max_interactions,
            max_tokens,
            counter,
        }
    }

    /// Token cost of one interaction: both messages plus their overhead.
    pub fn interaction_cost(&self, user: &str, assistant: &str) -> usize {
        self.counter.count_tokens(user)
            + TOKENS_PER_MESSAGE
            + self.counter.count_tokens(assistant)
            + TOKENS_PER_MESSAGE
    }

    /// Append an interaction, evicting the oldest one when the queue is full,
    /// then trim to the token budget.
    ///
    /// `external_overhead` is the token cost of context that lives outside
    /// the queue (typically the system prompt) and counts against the same
    /// budget.
    pub fn add_interaction(
        &mut self,
        user: impl Into<String>,
        assistant: impl Into<String>,
        external_overhead: usize,
    ) {
        let interaction = Interaction::new(user, assistant);
        let cost = self.interaction_cost(&interaction.user, &interaction.assistant);

        if self.interactions.len() >= self.max_interactions {
            self.evict_oldest();
        }

        self.interactions.push_back(interaction);
        self.token_counts.push_back(cost);
        self.total_tokens += cost;
        debug!(
            "History: +{cost} tokens ({} interactions, {} tokens total)",
            self.interactions.len(),
            self.total_tokens
        );

        self.trim_to_token_limit(external_overhead);
    }

    /// Evict oldest interactions until `total_tokens + external_overhead`
    /// fits `max_tokens`, never evicting the last remaining interaction.
    pub fn trim_to_token_limit(&mut self, external_overhead: usize) {
        let mut evicted = 0;
        while self.interactions.len() > 1 && self.total_tokens + external_overhead > self.max_tokens
        {
            self.evict_oldest();
            evicted += 1;
        }
        if evicted > 0 {
            debug!(
                "History: trimmed {evicted} interaction(s) to fit {} tokens (overhead {external_overhead})",
                self.max_tokens
            );
        }
    }

    fn evict_oldest(&mut self) {
        if self.interactions.pop_front().is_some() {
            let cost = self.token_counts.pop_front().unwrap_or(0);
            self.total_tokens -= cost;
        }
    }

    /// Flatten retained interactions into alternating user/assistant
    /// messages, oldest first.
    pub fn get_messages_for_llm(&self) -> Vec<Message> {
        self.interactions
            .iter()
            .flat_map(|i| {
                [
                    Message::user(i.user.clone()),
                    Message::assistant_text(i.assistant.clone()),
                ]
            })
            .collect()
    }

    /// Drop every interaction. There is no undo.
    pub fn clear(&mut self) {
        self.interactions.clear();
        self.token_counts.clear();
        self.total_tokens = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Running sum of the retained interactions' token costs.
    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn max_interactions(&self) -> usize {
        self.max_interactions
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Retained interactions, oldest first.
    pub fn interactions(&self) -> impl Iterator<Item = &Interaction> {
        self.interactions.iter()
    }

    /// Per-interaction token costs, parallel to [`interactions`](Self::interactions).
    pub fn token_counts(&self) -> impl Iterator<Item = usize> + '_ {
        self.token_counts.iter().copied()
    }

    /// One-line description for logs and the REPL.
    pub fn context_summary(&self) -> String {
        if self.is_empty() {
            "No conversation history".to_string()
        } else {
            format!(
                "Conversation history: {} interactions, ~{} tokens",
                self.len(),
                group_thousands(self.total_tokens)
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One token per whitespace-separated word.
    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count_tokens(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn words(n: usize) -> String {
        vec!["w"; n].join(" ")
    }

    fn history(max_interactions: usize, max_tokens: usize) -> ConversationHistory {
        ConversationHistory::with_counter(max_interactions, max_tokens, Arc::new(WordCounter))
    }

    fn recomputed_total(h: &ConversationHistory) -> usize {
        h.interactions()
            .map(|i| h.interaction_cost(&i.user, &i.assistant))
            .sum()
    }

    #[test]
    fn interaction_cost_includes_message_overhead() {
        let h = history(4, 1000);
        assert_eq!(h.interaction_cost("a b", "c d e"), 2 + 3 + 3 + 3);
    }

    #[test]
    fn overflow_evicts_oldest_and_its_tokens() {
        let mut h = history(2, 1000);
        h.add_interaction(format!("A {}", words(6)), words(7), 0);
        h.add_interaction(format!("B {}", words(6)), words(7), 0);
        assert_eq!(h.get_messages_for_llm().len(), 4);
        assert_eq!(h.total_tokens(), 40);

        h.add_interaction(format!("C {}", words(6)), words(7), 0);
        let messages = h.get_messages_for_llm();
        assert_eq!(messages.len(), 4);
        assert!(messages[0].text().starts_with('B'));
        assert!(messages[2].text().starts_with('C'));
        assert_eq!(h.total_tokens(), 40);
        assert!(h.interactions().all(|i| !i.user.starts_with('A')));
    }

    #[test]
    fn messages_alternate_user_and_assistant() {
        let mut h = history(4, 1000);
        h.add_interaction("q1", "a1", 0);
        h.add_interaction("q2", "a2", 0);
        let roles: Vec<String> = h
            .get_messages_for_llm()
            .iter()
            .map(|m| m.role.to_string())
            .collect();
        assert_eq!(roles, ["user", "assistant", "user", "assistant"]);
    }

    #[test]
    fn token_trim_counts_external_overhead() {
        let mut h = history(10, 100);
        for _ in 0..3 {
            h.add_interaction(words(12), words(12), 0); // 30 each
        }
        assert_eq!(h.len(), 3);

        h.add_interaction(words(12), words(12), 20);
        assert!(h.total_tokens() + 20 <= 100);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn oversized_single_interaction_is_retained() {
        let mut h = history(5, 10);
        h.add_interaction(words(4), words(4), 0);
        h.add_interaction(words(50), words(50), 0);
        assert_eq!(h.len(), 1);
        assert_eq!(h.total_tokens(), 106);
        assert!(h.total_tokens() > h.max_tokens());
    }

    #[test]
    fn retained_set_is_contiguous_suffix_and_total_never_drifts() {
        let mut h = history(4, 120);
        let sizes = [3, 20, 1, 9, 30, 2, 14, 5, 40, 7, 11, 6];
        for (n, size) in sizes.iter().enumerate() {
            h.add_interaction(format!("{n} {}", words(*size)), words(*size), n % 3 * 10);

            assert!(h.len() <= 4);
            assert_eq!(h.total_tokens(), recomputed_total(&h));
            assert_eq!(h.total_tokens(), h.token_counts().sum::<usize>());

            let ids: Vec<usize> = h
                .interactions()
                .map(|i| i.user.split(' ').next().unwrap().parse().unwrap())
                .collect();
            let first = ids[0];
            assert_eq!(ids, (first..=n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn clear_is_idempotent() {
        let mut h = history(3, 1000);
        h.add_interaction("hello", "world", 0);
        h.clear();
        h.clear();
        assert!(h.is_empty());
        assert_eq!(h.total_tokens(), 0);
        assert!(h.get_messages_for_llm().is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut h = history(0, 1000);
        h.add_interaction("a", "b", 0);
        h.add_interaction("c", "d", 0);
        assert_eq!(h.max_interactions(), 1);
        assert_eq!(h.len(), 1);
        assert_eq!(h.get_messages_for_llm()[0].text(), "c");
    }

    #[test]
    fn summary_reports_count_and_tokens() {
        let mut h = history(3, 10_000);
        assert_eq!(h.context_summary(), "No conversation history");
        h.add_interaction(words(600), words(600), 0);
        assert_eq!(
            h.context_summary(),
            "Conversation history: 1 interactions, ~1,206 tokens"
        );
    }
}
