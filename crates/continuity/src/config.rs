//! Configuration tree. Every key is optional; hosts can hand over their
//! JSON config verbatim and anything missing falls back to the defaults.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveConfig;
use crate::context_engine::budget::BudgetConfig;
use crate::context_engine::compactor::CompactionConfig;
use crate::embeddings::EmbeddingConfig;
use crate::memory_db::searcher::SearchConfig;
use crate::runtime::noise::NoisePatterns;
use crate::session::anchors::AnchorConfig;
use crate::session::topics::TopicConfig;
use crate::utils::token_estimator::TokenEstimatorConfig;

pub const DEFAULT_AGENT_ID: &str = "main";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Root data directory. The default agent lives here directly, every
    /// other agent under `agents/{agent_id}`.
    pub data_dir: PathBuf,
    pub context_budget: BudgetConfig,
    pub anchors: AnchorConfig,
    pub topic_tracking: TopicConfig,
    pub compaction: CompactionConfig,
    pub token_estimation: TokenEstimatorConfig,
    pub archive: ArchiveConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    /// Substrings that signal the user is explicitly asking for recall.
    pub continuity_indicators: Vec<String>,
    pub noise_patterns: NoisePatterns,
    /// Background sweep interval, seconds.
    pub maintenance_interval: u64,
    /// Tracing filter used by `telemetry::init_tracing` when `RUST_LOG` is
    /// unset.
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("continuity-data"),
            context_budget: BudgetConfig::default(),
            anchors: AnchorConfig::default(),
            topic_tracking: TopicConfig::default(),
            compaction: CompactionConfig::default(),
            token_estimation: TokenEstimatorConfig::default(),
            archive: ArchiveConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            continuity_indicators: vec![
                "remember".into(),
                "recall".into(),
                "you told".into(),
                "you said".into(),
                "you mentioned".into(),
                "last time".into(),
                "we talked".into(),
                "we discussed".into(),
                "earlier".into(),
                "before".into(),
                "previously".into(),
            ],
            noise_patterns: NoisePatterns::default(),
            maintenance_interval: 300,
            log_filter: None,
        }
    }
}

impl Config {
    /// Deserialize from a host-provided JSON value, falling back to the
    /// defaults for anything missing.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn agent_dir(&self, agent_id: &str) -> PathBuf {
        if agent_id == DEFAULT_AGENT_ID {
            self.data_dir.clone()
        } else {
            self.data_dir.join("agents").join(agent_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.context_budget.budget_ratio, 0.65);
        assert_eq!(config.search.rrf_k, 60.0);
        assert_eq!(config.archive.retention_days, 30);
        assert_eq!(config.embedding.db_file, "continuity.db");
        assert!(config.continuity_indicators.contains(&"remember".to_string()));
    }

    #[test]
    fn test_from_partial_json() {
        let config = Config::from_value(serde_json::json!({
            "contextBudget": {"budgetRatio": 0.5},
            "search": {"rrfK": 30.0},
            "topicTracking": {"windowSize": 4}
        }))
        .unwrap();
        assert_eq!(config.context_budget.budget_ratio, 0.5);
        assert_eq!(config.search.rrf_k, 30.0);
        assert_eq!(config.topic_tracking.window_size, 4);
        // untouched sections keep their defaults
        assert_eq!(config.compaction.threshold, 0.80);
    }

    #[test]
    fn test_agent_dir_isolation() {
        let config = Config::default();
        assert_eq!(config.agent_dir("main"), PathBuf::from("continuity-data"));
        assert_eq!(
            config.agent_dir("research"),
            PathBuf::from("continuity-data/agents/research")
        );
    }
}
