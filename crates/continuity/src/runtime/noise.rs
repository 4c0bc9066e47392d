//! Data-driven noise filter for retrieval results. An exchange whose agent
//! side denies having memory, or whose user side is itself a memory
//! meta-question, only teaches the model to say "I don't remember".

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory_db::SearchResultItem;
use crate::utils::text_utils::TextUtils;

const TRIVIAL_EXCHANGE_CHARS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NoisePatterns {
    /// Agent-side phrases that mark a denial or reconstruction offer.
    pub agent_denials: Vec<String>,
    /// User-side phrases that mark a memory meta-question.
    pub user_meta_questions: Vec<String>,
    /// Session-reset boilerplate injected by hosts.
    pub session_reset_markers: Vec<String>,
    /// Formulaic agent replies that make a short exchange worthless.
    pub formulaic_replies: Vec<String>,
}

impl Default for NoisePatterns {
    fn default() -> Self {
        Self {
            agent_denials: vec![
                "i don't have".into(),
                "i do not have".into(),
                "no memory of".into(),
                "no recollection".into(),
                "it looks like i don't".into(),
                "i don't see any".into(),
                "let me help you reconstruct".into(),
                "nice to meet you".into(),
            ],
            user_meta_questions: vec![
                "do you remember".into(),
                "do you recall".into(),
                "did i tell you".into(),
                "what do you know about me".into(),
                "sorry to keep asking".into(),
                "can you remember".into(),
            ],
            session_reset_markers: vec![
                "new session started".into(),
                "session resumed".into(),
                "conversation restarted".into(),
            ],
            formulaic_replies: vec![
                "hello".into(),
                "hi there".into(),
                "how can i help".into(),
                "sure".into(),
                "okay".into(),
            ],
        }
    }
}

/// Why an exchange was rejected. Every rejection maps to a documented
/// pattern class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseReason {
    AgentDenial,
    UserMetaQuestion,
    SessionReset,
    TrivialExchange,
}

impl NoisePatterns {
    /// Check one exchange. `None` means it is signal.
    pub fn classify(&self, user_text: &str, agent_text: &str) -> Option<NoiseReason> {
        if self
            .agent_denials
            .iter()
            .any(|p| TextUtils::contains_ignore_case(agent_text, p))
        {
            return Some(NoiseReason::AgentDenial);
        }
        if self
            .user_meta_questions
            .iter()
            .any(|p| TextUtils::contains_ignore_case(user_text, p))
        {
            return Some(NoiseReason::UserMetaQuestion);
        }
        if self
            .session_reset_markers
            .iter()
            .any(|p| TextUtils::contains_ignore_case(user_text, p))
        {
            return Some(NoiseReason::SessionReset);
        }
        if user_text.chars().count() < TRIVIAL_EXCHANGE_CHARS
            && agent_text.chars().count() < TRIVIAL_EXCHANGE_CHARS
            && self
                .formulaic_replies
                .iter()
                .any(|p| TextUtils::contains_ignore_case(agent_text, p))
        {
            return Some(NoiseReason::TrivialExchange);
        }
        None
    }

    /// Drop noisy exchanges from a retrieval batch.
    pub fn filter(&self, results: Vec<SearchResultItem>) -> Vec<SearchResultItem> {
        let before = results.len();
        let kept: Vec<SearchResultItem> = results
            .into_iter()
            .filter(|r| self.classify(&r.user_text, &r.agent_text).is_none())
            .collect();
        if kept.len() < before {
            debug!(dropped = before - kept.len(), "noise filter rejected exchanges");
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> NoisePatterns {
        NoisePatterns::default()
    }

    #[test]
    fn test_agent_denial_rejected() {
        let reason = patterns().classify(
            "do I have a recipe saved?",
            "I don't have any information about that",
        );
        assert_eq!(reason, Some(NoiseReason::AgentDenial));
    }

    #[test]
    fn test_user_meta_question_rejected() {
        let reason = patterns().classify("do you remember my recipe?", "Of course, sourdough!");
        assert_eq!(reason, Some(NoiseReason::UserMetaQuestion));
    }

    #[test]
    fn test_session_reset_rejected() {
        let reason = patterns().classify("New session started at 9am", "welcome back");
        assert_eq!(reason, Some(NoiseReason::SessionReset));
    }

    #[test]
    fn test_trivial_exchange_rejected() {
        let reason = patterns().classify("hey", "hi there!");
        assert_eq!(reason, Some(NoiseReason::TrivialExchange));
    }

    #[test]
    fn test_substantive_exchange_kept() {
        let reason = patterns().classify(
            "I planted tomatoes in the raised bed last weekend",
            "Tomatoes love that spot, keep the soil moist",
        );
        assert_eq!(reason, None);
    }

    #[test]
    fn test_long_greeting_not_trivial() {
        // A long exchange is kept even when the agent opens with a greeting
        // word, as long as it is not a denial.
        let reason = patterns().classify(
            "walk me through the proofing schedule we came up with",
            "Sure thing, the schedule was: mix at 8am, fold hourly until noon",
        );
        assert_eq!(reason, None);
    }
}
