//! Configuration for the tool-calling driver and model selection.
//!
//! ```ignore
//! let config = DriverConfig::new("google/gemini-2.5-flash")
//!     .with_max_rounds(30)
//!     .with_max_tokens(8192)
//!     .with_temperature(0.2)
//!     .with_retries(3);
//! ```

use crate::api::retry::RetryPolicy;
use crate::{DEFAULT_MODEL, DEFAULT_PRO_MODEL};

/// Default cap on tool-calling round-trips per run.
pub const DEFAULT_MAX_ROUNDS: u32 = 50;

/// Default completion token limit per request.
pub const DEFAULT_MAX_TOKENS: u32 = 16_384;

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Retries for responses with no content and no tool calls.
pub const MAX_EMPTY_RESPONSE_RETRIES: u32 = 2;

/// Settings for one [`ToolLoopDriver`](super::driver::ToolLoopDriver).
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    pub model: String,
    pub max_rounds: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Run the tool calls of one round concurrently instead of in order.
    pub parallel_tools: bool,
    /// Transport retry policy for each API request.
    pub retry: RetryPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl DriverConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            parallel_tools: false,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_parallel_tools(mut self, parallel: bool) -> Self {
        self.parallel_tools = parallel;
        self
    }

    /// Set the number of transport retries, keeping the other backoff settings.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// The two models a session can switch between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPair {
    pub standard: String,
    pub pro: String,
}

impl Default for ModelPair {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL, DEFAULT_PRO_MODEL)
    }
}

impl ModelPair {
    pub fn new(standard: impl Into<String>, pro: impl Into<String>) -> Self {
        Self {
            standard: standard.into(),
            pro: pro.into(),
        }
    }

    pub fn select(&self, use_pro: bool) -> &str {
        if use_pro { &self.pro } else { &self.standard }
    }

    pub fn is_pro(&self, model: &str) -> bool {
        model == self.pro
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_rounds, 50);
        assert_eq!(config.max_tokens, 16_384);
        assert!(!config.parallel_tools);
    }

    #[test]
    fn builders_override_fields() {
        let config = DriverConfig::new("m")
            .with_max_rounds(3)
            .with_max_tokens(10)
            .with_temperature(0.0)
            .with_parallel_tools(true)
            .with_retries(7);
        assert_eq!(config.max_rounds, 3);
        assert_eq!(config.max_tokens, 10);
        assert!(config.parallel_tools);
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.with_model("n").model, "n");
    }

    #[test]
    fn model_pair_selects() {
        let pair = ModelPair::new("fast", "smart");
        assert_eq!(pair.select(false), "fast");
        assert_eq!(pair.select(true), "smart");
        assert!(pair.is_pro("smart"));
        assert!(!pair.is_pro("fast"));
    }
}
