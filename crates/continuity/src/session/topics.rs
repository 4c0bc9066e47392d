//! Windowed topic mention tracking and fixation flagging.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

lazy_static! {
    static ref DEFAULT_STOP_WORDS: Vec<&'static str> = vec![
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "is", "am", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
        "does", "did", "will", "would", "shall", "should", "may", "might", "must", "can", "could",
        "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them", "my",
        "your", "his", "its", "our", "their", "this", "that", "these", "those", "what", "when",
        "where", "which", "about", "from", "just", "like", "some", "then", "than", "there",
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopicConfig {
    /// Sliding window measured in exchanges.
    pub window_size: u64,
    pub fixation_threshold: u32,
    pub decay_factor: f64,
    pub min_word_length: usize,
    /// Regexes whose full matches become topics verbatim.
    pub custom_patterns: Vec<String>,
    pub stop_words: Vec<String>,
    /// Window distance after which an untouched topic is dropped.
    /// Defaults to `window_size` when absent.
    pub prune_age: Option<u64>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            fixation_threshold: 5,
            decay_factor: 0.5,
            min_word_length: 4,
            custom_patterns: Vec::new(),
            stop_words: DEFAULT_STOP_WORDS.iter().map(|s| s.to_string()).collect(),
            prune_age: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRecord {
    pub mentions: u32,
    pub first_seen: u64,
    pub last_seen: u64,
    pub last_timestamp: DateTime<Utc>,
}

pub struct TopicTracker {
    config: TopicConfig,
    patterns: Vec<Regex>,
    topics: HashMap<String, TopicRecord>,
    exchange_index: u64,
}

impl TopicTracker {
    pub fn new(config: TopicConfig) -> Self {
        let patterns = config
            .custom_patterns
            .iter()
            .filter_map(|p| match Regex::new(&format!("(?i){}", p)) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "invalid custom topic pattern, skipping");
                    None
                }
            })
            .collect();
        Self {
            config,
            patterns,
            topics: HashMap::new(),
            exchange_index: 0,
        }
    }

    pub fn topics(&self) -> &HashMap<String, TopicRecord> {
        &self.topics
    }

    pub fn exchange_index(&self) -> u64 {
        self.exchange_index
    }

    /// Absorb one exchange worth of text. The exchange counter advances
    /// automatically when no explicit index is supplied.
    pub fn track(&mut self, text: &str, exchange_index: Option<u64>) {
        self.exchange_index = match exchange_index {
            Some(index) => index,
            None => self.exchange_index + 1,
        };
        let current = self.exchange_index;

        // Strict comparison: a topic touched exactly once per window survives.
        let window = self.config.prune_age.unwrap_or(self.config.window_size);
        self.topics
            .retain(|_, record| record.last_seen >= current.saturating_sub(window));

        let now = Utc::now();
        for topic in self.extract_topics(text) {
            let record = self.topics.entry(topic).or_insert(TopicRecord {
                mentions: 0,
                first_seen: current,
                last_seen: current,
                last_timestamp: now,
            });
            record.mentions += 1;
            record.last_seen = current;
            record.last_timestamp = now;
        }
    }

    fn extract_topics(&self, text: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();

        for pattern in &self.patterns {
            for m in pattern.find_iter(text) {
                let topic = m.as_str().to_lowercase();
                if !found.contains(&topic) {
                    found.push(topic);
                }
            }
        }

        let mut counts: HashMap<String, u32> = HashMap::new();
        for raw in text.split_whitespace() {
            let token: String = raw
                .to_lowercase()
                .chars()
                .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
                .collect();
            if token.chars().count() < self.config.min_word_length {
                continue;
            }
            if !token.chars().next().is_some_and(|c| c.is_ascii_lowercase()) {
                continue;
            }
            if self.config.stop_words.iter().any(|s| s == &token) {
                continue;
            }
            *counts.entry(token).or_insert(0) += 1;
        }

        for (token, count) in counts {
            let revisit = self.topics.contains_key(&token);
            if (count >= 2 || revisit) && !found.contains(&token) {
                found.push(token);
            }
        }

        found
    }

    /// Freshness decays as a topic keeps coming up: 1.0 is brand new,
    /// 0.0 means the conversation is circling it.
    pub fn freshness(&self, topic: &str) -> f64 {
        match self.topics.get(topic) {
            Some(record) => {
                let pressure = record.mentions as f64 / self.config.fixation_threshold as f64;
                (1.0 - pressure * self.config.decay_factor).max(0.0)
            }
            None => 1.0,
        }
    }

    pub fn fixated_topics(&self) -> Vec<(String, u32)> {
        let mut fixated: Vec<(String, u32)> = self
            .topics
            .iter()
            .filter(|(_, r)| r.mentions >= self.config.fixation_threshold)
            .map(|(t, r)| (t.clone(), r.mentions))
            .collect();
        fixated.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        fixated
    }

    pub fn format_notes(&self) -> Option<String> {
        let fixated = self.fixated_topics();
        if fixated.is_empty() {
            return None;
        }
        let lines: Vec<String> = fixated
            .iter()
            .map(|(topic, mentions)| {
                format!(
                    "[TOPIC NOTE] The topic '{}' has come up {} times recently.",
                    topic, mentions
                )
            })
            .collect();
        Some(lines.join("\n"))
    }
}
