//! Tier classification and pool-constrained message selection under a token
//! ceiling.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory::Message;
use crate::utils::text_utils::TextUtils;
use crate::utils::TokenEstimator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Essential,
    High,
    Medium,
    Low,
    Minimal,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Essential,
        Tier::High,
        Tier::Medium,
        Tier::Low,
        Tier::Minimal,
    ];

    pub fn weight(&self) -> f64 {
        match self {
            Tier::Essential => 1.0,
            Tier::High => 0.8,
            Tier::Medium => 0.6,
            Tier::Low => 0.4,
            Tier::Minimal => 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolRatios {
    pub essential: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
    pub minimal: f64,
}

impl PoolRatios {
    pub fn get(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Essential => self.essential,
            Tier::High => self.high,
            Tier::Medium => self.medium,
            Tier::Low => self.low,
            Tier::Minimal => self.minimal,
        }
    }

    pub fn is_valid(&self) -> bool {
        let sum = self.essential + self.high + self.medium + self.low + self.minimal;
        (sum - 1.0).abs() < 1e-6
    }
}

impl Default for PoolRatios {
    fn default() -> Self {
        Self {
            essential: 0.30,
            high: 0.25,
            medium: 0.25,
            low: 0.15,
            minimal: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BudgetConfig {
    pub budget_ratio: f64,
    pub recent_turns_always_full: usize,
    pub recent_turn_char_limit: usize,
    pub mid_turn_char_limit: usize,
    pub older_turn_char_limit: usize,
    pub pool_ratios: PoolRatios,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            budget_ratio: 0.65,
            recent_turns_always_full: 3,
            recent_turn_char_limit: 3000,
            mid_turn_char_limit: 1500,
            older_turn_char_limit: 500,
            pool_ratios: PoolRatios::default(),
        }
    }
}

/// One candidate message for selection. `tier_override` is for externally
/// tagged entries such as anchor blocks; everything else is classified by
/// position.
#[derive(Debug, Clone)]
pub struct BudgetEntry {
    pub index: usize,
    pub role: String,
    pub text: String,
    pub tier_override: Option<Tier>,
}

impl BudgetEntry {
    pub fn from_messages(messages: &[Message]) -> Vec<BudgetEntry> {
        messages
            .iter()
            .enumerate()
            .map(|(index, m)| BudgetEntry {
                index,
                role: m.role.clone(),
                text: m.text(),
                tier_override: None,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SelectedMessage {
    pub index: usize,
    pub role: String,
    pub text: String,
    pub tier: Tier,
    pub tokens: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolReport {
    pub allocated: usize,
    pub used: usize,
    pub messages: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetReport {
    pub ceiling: usize,
    pub total_budget: usize,
    pub total_used: usize,
    pub remaining: usize,
    pub pools: Vec<(Tier, PoolReport)>,
}

pub struct BudgetAllocator {
    config: BudgetConfig,
}

impl BudgetAllocator {
    pub fn new(config: BudgetConfig) -> Self {
        if !config.pool_ratios.is_valid() {
            debug!("pool ratios do not sum to 1, proceeding with given values");
        }
        Self { config }
    }

    /// Position-based tier: system and the freshest turns are essential,
    /// then medium / low / minimal bands further back. HIGH is reserved for
    /// explicitly tagged entries.
    pub fn classify(&self, index: usize, total: usize, role: &str) -> Tier {
        if role == "system" {
            return Tier::Essential;
        }
        let distance = total.saturating_sub(1).saturating_sub(index);
        let recent = self.config.recent_turns_always_full;
        if distance < 2 * recent {
            Tier::Essential
        } else if distance < 4 * recent {
            Tier::Medium
        } else if distance < 8 * recent {
            Tier::Low
        } else {
            Tier::Minimal
        }
    }

    pub fn char_limit(&self, tier: Tier) -> usize {
        match tier {
            Tier::Essential | Tier::High => self.config.recent_turn_char_limit,
            Tier::Medium => self.config.mid_turn_char_limit,
            Tier::Low => self.config.older_turn_char_limit,
            Tier::Minimal => self.config.older_turn_char_limit / 2,
        }
    }

    /// Select entries under the budget, pool by pool in priority order, then
    /// restore original ordering.
    pub fn optimize(
        &self,
        entries: &[BudgetEntry],
        estimator: &TokenEstimator,
    ) -> (Vec<SelectedMessage>, BudgetReport) {
        let ceiling = estimator.max_tokens();
        let total_budget = (ceiling as f64 * self.config.budget_ratio).floor() as usize;
        let total = entries.len();

        let mut classified: Vec<(Tier, &BudgetEntry)> = entries
            .iter()
            .map(|e| {
                let tier = e
                    .tier_override
                    .unwrap_or_else(|| self.classify(e.index, total, &e.role));
                (tier, e)
            })
            .collect();
        classified.sort_by_key(|(_, e)| e.index);

        let mut selected: Vec<SelectedMessage> = Vec::new();
        let mut pools: Vec<(Tier, PoolReport)> = Vec::new();

        for tier in Tier::ALL {
            let pool = (total_budget as f64 * self.config.pool_ratios.get(tier)).floor() as usize;
            let mut report = PoolReport {
                allocated: pool,
                ..Default::default()
            };
            let limit = self.char_limit(tier);

            for (entry_tier, entry) in classified.iter().filter(|(t, _)| *t == tier) {
                let text = TextUtils::truncate_at_boundary(&entry.text, limit);
                let tokens = estimator.estimate(&text);
                if report.used + tokens > pool {
                    continue;
                }
                report.used += tokens;
                report.messages += 1;
                selected.push(SelectedMessage {
                    index: entry.index,
                    role: entry.role.clone(),
                    text: text.into_owned(),
                    tier: *entry_tier,
                    tokens,
                });
            }
            pools.push((tier, report));
        }

        selected.sort_by_key(|s| s.index);
        let total_used: usize = pools.iter().map(|(_, p)| p.used).sum();
        let report = BudgetReport {
            ceiling,
            total_budget,
            total_used,
            remaining: total_budget.saturating_sub(total_used),
            pools,
        };
        debug!(
            total_budget,
            total_used,
            selected = selected.len(),
            "context budget pass complete"
        );
        (selected, report)
    }
}
