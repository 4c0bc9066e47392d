//! Threshold-triggered context compression, task-aware when tool traffic is
//! present.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context_engine::budget::{BudgetAllocator, BudgetConfig, BudgetEntry};
use crate::memory::{Content, Message};
use crate::session::anchors::{AnchorConfig, ContinuityAnchors};
use crate::utils::text_utils::TextUtils;
use crate::utils::TokenEstimator;

const KEEP_TOOL_MESSAGES: usize = 15;
const KEEP_ASSISTANT_MESSAGES: usize = 5;
const KEEP_USER_MESSAGES: usize = 5;
const ASSISTANT_CHAR_LIMIT: usize = 1500;
const TOOL_BUDGET_RATIO: f64 = 0.7;
const ASSISTANT_BUDGET_RATIO: f64 = 0.9;
const OVERFLOW_CHECK_RATIO: f64 = 0.95;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompactionConfig {
    pub threshold: f64,
    pub fallback_messages: usize,
    pub task_aware_compaction: bool,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.80,
            fallback_messages: 20,
            task_aware_compaction: true,
        }
    }
}

pub struct Compactor {
    config: CompactionConfig,
    // The task-aware budget is derived from the same ratio the allocator
    // uses, keeping the two passes consistent.
    budget_config: BudgetConfig,
    anchor_config: AnchorConfig,
}

impl Compactor {
    pub fn new(
        config: CompactionConfig,
        budget_config: BudgetConfig,
        anchor_config: AnchorConfig,
    ) -> Self {
        Self {
            config,
            budget_config,
            anchor_config,
        }
    }

    pub fn needs_compaction(&self, estimator: &TokenEstimator, messages: &[Message]) -> bool {
        estimator.estimate_messages(messages) as f64
            > self.config.threshold * estimator.max_tokens() as f64
    }

    pub fn compact(&self, estimator: &TokenEstimator, messages: &[Message]) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }

        let task_shaped =
            self.config.task_aware_compaction && messages.iter().any(Message::is_tool_related);

        let mut result = if task_shaped {
            debug!("compacting with task-aware strategy");
            self.compact_task_aware(estimator, messages)
        } else {
            debug!("compacting with conversational strategy");
            self.compact_conversational(estimator, messages)
        };

        if estimator.is_over_budget(&result, OVERFLOW_CHECK_RATIO) {
            info!(
                kept = result.len(),
                "compaction still over budget, falling back to recent tail"
            );
            result = self.fallback(messages);
        }
        result
    }

    /// Keep, in priority order: system messages, the first user message, the
    /// most recent tool results, truncated recent assistant replies, recent
    /// user turns. Each band admits while the running total is under its
    /// share of the budget.
    fn compact_task_aware(&self, estimator: &TokenEstimator, messages: &[Message]) -> Vec<Message> {
        let budget =
            (estimator.max_tokens() as f64 * self.budget_config.budget_ratio).floor() as usize;
        let mut kept: BTreeSet<usize> = BTreeSet::new();
        let mut replacements: Vec<(usize, Message)> = Vec::new();
        let mut used = 0usize;

        let mut admit = |index: usize, tokens: usize, used: &mut usize| {
            if kept.insert(index) {
                *used += tokens;
            }
        };

        for (index, message) in messages.iter().enumerate() {
            if message.role == "system" {
                admit(index, estimator.estimate(&message.text()), &mut used);
            }
        }
        if let Some((index, message)) = messages.iter().enumerate().find(|(_, m)| m.role == "user")
        {
            admit(index, estimator.estimate(&message.text()), &mut used);
        }

        let tool_cap = (budget as f64 * TOOL_BUDGET_RATIO) as usize;
        let tool_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == "tool" || m.role == "function")
            .map(|(i, _)| i)
            .collect();
        for &index in tool_indices.iter().rev().take(KEEP_TOOL_MESSAGES) {
            if used >= tool_cap {
                break;
            }
            admit(index, estimator.estimate(&messages[index].text()), &mut used);
        }

        let assistant_cap = (budget as f64 * ASSISTANT_BUDGET_RATIO) as usize;
        let assistant_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == "assistant")
            .map(|(i, _)| i)
            .collect();
        for &index in assistant_indices.iter().rev().take(KEEP_ASSISTANT_MESSAGES) {
            if used >= assistant_cap {
                break;
            }
            let text = messages[index].text();
            let truncated = TextUtils::truncate_chars(&text, ASSISTANT_CHAR_LIMIT);
            let tokens = estimator.estimate(&truncated);
            if truncated.len() < text.len() {
                let mut replacement = messages[index].clone();
                replacement.content = Content::Text(truncated.into_owned());
                replacements.push((index, replacement));
            }
            admit(index, tokens, &mut used);
        }

        let user_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == "user")
            .map(|(i, _)| i)
            .collect();
        for &index in user_indices.iter().rev().take(KEEP_USER_MESSAGES) {
            if used >= budget {
                break;
            }
            admit(index, estimator.estimate(&messages[index].text()), &mut used);
        }

        kept.into_iter()
            .map(|index| {
                replacements
                    .iter()
                    .find(|(i, _)| *i == index)
                    .map(|(_, m)| m.clone())
                    .unwrap_or_else(|| messages[index].clone())
            })
            .collect()
    }

    /// Run the pool allocator over the conversation and fold the detected
    /// continuity anchors into the system message.
    fn compact_conversational(
        &self,
        estimator: &TokenEstimator,
        messages: &[Message],
    ) -> Vec<Message> {
        let allocator = BudgetAllocator::new(self.budget_config.clone());
        let entries = BudgetEntry::from_messages(messages);
        let (selected, _report) = allocator.optimize(&entries, estimator);

        let mut result: Vec<Message> = selected
            .into_iter()
            .map(|s| {
                let mut message = messages[s.index].clone();
                message.content = Content::Text(s.text);
                message
            })
            .collect();

        let mut anchors = ContinuityAnchors::new(self.anchor_config.clone());
        anchors.detect(messages);
        if let Some(block) = anchors.format() {
            match result.iter_mut().find(|m| m.role == "system") {
                Some(system) => {
                    let mut text = system.text();
                    text.push_str("\n\n");
                    text.push_str(&block);
                    system.content = Content::Text(text);
                }
                None => result.insert(0, Message::system(block)),
            }
        }
        result
    }

    /// Last resort: the system messages plus the most recent tail.
    fn fallback(&self, messages: &[Message]) -> Vec<Message> {
        let tail_start = messages.len().saturating_sub(self.config.fallback_messages);
        let mut kept: BTreeSet<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == "system")
            .map(|(i, _)| i)
            .collect();
        kept.extend(tail_start..messages.len());
        kept.into_iter().map(|i| messages[i].clone()).collect()
    }
}
