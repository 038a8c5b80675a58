//! System prompt + conversation history under one token ceiling.
//!
//! The [`ContextManager`] is the ground truth for what the model sees: the
//! session asks it for the full message list on every turn and records the
//! finished interaction back into it. After [`add_interaction`] and
//! [`refresh_with_system_prompt`], `tokens(system prompt) + history tokens`
//! fits `max_context_tokens` unless a single oversized interaction remains.
//!
//! [`add_interaction`]: ContextManager::add_interaction
//! [`refresh_with_system_prompt`]: ContextManager::refresh_with_system_prompt

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::history::{ConversationHistory, DEFAULT_MAX_INTERACTIONS, DEFAULT_MAX_TOKENS};
use super::tokenizer::{TiktokenCounter, TokenCounter, count_messages};
use crate::Message;

/// Snapshot of context usage, recomputed from the assembled message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextInfo {
    pub total_messages: usize,
    pub conversation_interactions: usize,
    pub total_tokens: usize,
    pub system_prompt_tokens: usize,
    pub conversation_tokens: usize,
    pub under_limit: bool,
}

pub struct ContextManager {
    conversation: ConversationHistory,
    system_prompt: String,
    max_context_tokens: usize,
    counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("conversation", &self.conversation)
            .field("system_prompt_len", &self.system_prompt.len())
            .field("max_context_tokens", &self.max_context_tokens)
            .finish()
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INTERACTIONS, DEFAULT_MAX_TOKENS)
    }
}

impl ContextManager {
    /// Create a manager using the BPE token counter.
    pub fn new(max_interactions: usize, max_context_tokens: usize) -> Self {
        Self::with_counter(max_interactions, max_context_tokens, Arc::new(TiktokenCounter))
    }

    /// Create a manager with a custom token counter, shared with its history.
    pub fn with_counter(
        max_interactions: usize,
        max_context_tokens: usize,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            conversation: ConversationHistory::with_counter(
                max_interactions,
                max_context_tokens,
                counter.clone(),
            ),
            system_prompt: String::new(),
            max_context_tokens,
            counter,
        }
    }

    /// Replace the system prompt without re-trimming.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn max_context_tokens(&self) -> usize {
        self.max_context_tokens
    }

    pub fn conversation(&self) -> &ConversationHistory {
        &self.conversation
    }

    /// Tokens of the current system prompt; an empty prompt costs nothing.
    pub fn system_prompt_tokens(&self) -> usize {
        if self.system_prompt.is_empty() {
            0
        } else {
            self.counter.count_tokens(&self.system_prompt)
        }
    }

    /// Record an interaction, trimming history against the system prompt's
    /// token cost.
    pub fn add_interaction(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        let overhead = self.system_prompt_tokens();
        self.conversation.add_interaction(user, assistant, overhead);
    }

    /// The message list for the model: an optional system message followed
    /// by the flattened history.
    pub fn get_full_context_for_llm(&self, include_system: bool) -> Vec<Message> {
        let history = self.conversation.get_messages_for_llm();
        let mut messages = Vec::with_capacity(history.len() + 1);
        if include_system && !self.system_prompt.is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.extend(history);
        messages
    }

    /// Usage figures computed by re-tokenizing the full context.
    pub fn get_context_info(&self) -> ContextInfo {
        let messages = self.get_full_context_for_llm(true);
        let total_tokens = count_messages(self.counter.as_ref(), &messages);
        let system_prompt_tokens = self.system_prompt_tokens();
        ContextInfo {
            total_messages: messages.len(),
            conversation_interactions: self.conversation.len(),
            total_tokens,
            system_prompt_tokens,
            conversation_tokens: total_tokens.saturating_sub(system_prompt_tokens),
            under_limit: total_tokens <= self.max_context_tokens,
        }
    }

    /// Drop the history and keep the system prompt.
    pub fn clear_conversation(&mut self) {
        self.conversation.clear();
    }

    /// Swap in a new system prompt, evicting old interactions if the larger
    /// prompt pushes the context over its ceiling.
    pub fn refresh_with_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
        let system_tokens = self.system_prompt_tokens();
        if self.conversation.total_tokens() + system_tokens > self.max_context_tokens {
            debug!(
                "System prompt refresh ({system_tokens} tokens) exceeds budget, trimming history"
            );
            self.conversation.trim_to_token_limit(system_tokens);
        }
    }
}
