//! Heuristic token counting with a pluggable tokenizer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::memory::Message;
use crate::utils::text_utils::TextUtils;

/// Per-message wrapping overhead applied on top of the content estimate.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// A custom tokenizer takes a string and returns a token count.
pub type Tokenizer = Arc<dyn Fn(&str) -> usize + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TokenEstimatorConfig {
    pub tokens_per_word: f64,
    pub special_char_token_weight: f64,
    pub default_max_tokens: usize,
}

impl Default for TokenEstimatorConfig {
    fn default() -> Self {
        Self {
            tokens_per_word: 1.3,
            special_char_token_weight: 0.5,
            default_max_tokens: 8192,
        }
    }
}

#[derive(Clone)]
pub struct TokenEstimator {
    tokens_per_word: f64,
    special_char_token_weight: f64,
    max_tokens: usize,
    tokenizer: Option<Tokenizer>,
}

impl TokenEstimator {
    pub fn new(config: &TokenEstimatorConfig) -> Self {
        Self {
            tokens_per_word: config.tokens_per_word,
            special_char_token_weight: config.special_char_token_weight,
            max_tokens: config.default_max_tokens,
            tokenizer: None,
        }
    }

    /// Install a custom tokenizer. It is probed once; a tokenizer that panics
    /// or returns nonsense is rejected without touching the current state.
    pub fn set_tokenizer(&mut self, tokenizer: Tokenizer) -> Result<()> {
        let probe = catch_unwind(AssertUnwindSafe(|| tokenizer("token estimator probe")));
        match probe {
            Ok(_) => {
                self.tokenizer = Some(tokenizer);
                Ok(())
            }
            Err(_) => Err(anyhow!("custom tokenizer panicked on probe input")),
        }
    }

    pub fn set_max_tokens(&mut self, max_tokens: usize) -> Result<()> {
        if max_tokens == 0 {
            return Err(anyhow!("max_tokens must be positive"));
        }
        self.max_tokens = max_tokens;
        Ok(())
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn estimate(&self, text: &str) -> usize {
        if let Some(tokenizer) = &self.tokenizer {
            match catch_unwind(AssertUnwindSafe(|| tokenizer(text))) {
                Ok(count) => return count,
                Err(_) => {
                    warn!("custom tokenizer failed, falling back to heuristic");
                }
            }
        }
        self.heuristic(text)
    }

    fn heuristic(&self, text: &str) -> usize {
        let words = TextUtils::count_words(text) as f64;
        let special = TextUtils::count_special_chars(text) as f64;
        (words * self.tokens_per_word + special * self.special_char_token_weight).ceil() as usize
    }

    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| self.estimate(&m.text()) + MESSAGE_OVERHEAD_TOKENS)
            .sum()
    }

    pub fn is_over_budget(&self, messages: &[Message], ratio: f64) -> bool {
        self.estimate_messages(messages) as f64 > self.max_tokens as f64 * ratio
    }

    pub fn remaining(&self, used: usize) -> usize {
        self.max_tokens.saturating_sub(used)
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(&TokenEstimatorConfig::default())
    }
}
