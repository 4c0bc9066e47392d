//! Continuity anchors: identity, contradiction, and tension moments detected
//! from user messages and surfaced across turns.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory::Message;
use crate::utils::text_utils::TextUtils;

const ANCHOR_TEXT_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorType {
    Identity,
    Contradiction,
    Tension,
}

impl AnchorType {
    pub fn priority(&self) -> f32 {
        match self {
            AnchorType::Identity | AnchorType::Contradiction => 1.0,
            AnchorType::Tension => 0.7,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AnchorType::Identity => "IDENTITY",
            AnchorType::Contradiction => "CONTRADICTION",
            AnchorType::Tension => "TENSION",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnchorKeywords {
    pub identity: Vec<String>,
    pub contradiction: Vec<String>,
    pub tension: Vec<String>,
}

impl Default for AnchorKeywords {
    fn default() -> Self {
        Self {
            identity: vec![
                "i am".into(),
                "i'm".into(),
                "my name".into(),
                "i work".into(),
                "i live".into(),
                "call me".into(),
            ],
            contradiction: vec![
                "actually".into(),
                "no longer".into(),
                "changed my mind".into(),
                "not anymore".into(),
                "correction".into(),
            ],
            tension: vec![
                "frustrated".into(),
                "annoyed".into(),
                "upset".into(),
                "angry".into(),
                "disappointed".into(),
                "stressed".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnchorConfig {
    pub enabled: bool,
    /// Seconds before an anchor ages out.
    pub max_age: u64,
    pub max_count: usize,
    pub keywords: AnchorKeywords,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age: 24 * 3600,
            max_count: 5,
            keywords: AnchorKeywords::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Anchor {
    #[serde(rename = "type")]
    pub kind: AnchorType,
    pub priority: f32,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub message_index: usize,
    pub keyword: String,
}

pub struct ContinuityAnchors {
    config: AnchorConfig,
    anchors: Vec<Anchor>,
}

impl ContinuityAnchors {
    pub fn new(config: AnchorConfig) -> Self {
        Self {
            config,
            anchors: Vec::new(),
        }
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    /// Scan user messages for anchor keywords. One anchor per
    /// (type, message index); existing duplicates are suppressed.
    pub fn detect(&mut self, messages: &[Message]) {
        if !self.config.enabled {
            return;
        }

        for (index, message) in messages.iter().enumerate() {
            if message.role != "user" {
                continue;
            }
            let text = message.text();
            if text.is_empty() {
                continue;
            }

            for kind in [
                AnchorType::Identity,
                AnchorType::Contradiction,
                AnchorType::Tension,
            ] {
                if self
                    .anchors
                    .iter()
                    .any(|a| a.kind == kind && a.message_index == index)
                {
                    continue;
                }
                let keywords = match kind {
                    AnchorType::Identity => &self.config.keywords.identity,
                    AnchorType::Contradiction => &self.config.keywords.contradiction,
                    AnchorType::Tension => &self.config.keywords.tension,
                };
                if let Some(keyword) = keywords
                    .iter()
                    .find(|k| TextUtils::contains_ignore_case(&text, k))
                {
                    debug!(kind = kind.label(), keyword = %keyword, "anchor detected");
                    self.anchors.push(Anchor {
                        kind,
                        priority: kind.priority(),
                        text: TextUtils::truncate_chars(&text, ANCHOR_TEXT_LIMIT).into_owned(),
                        timestamp: message.timestamp.unwrap_or_else(Utc::now),
                        message_index: index,
                        keyword: keyword.clone(),
                    });
                }
            }
        }

        self.prune();
    }

    /// Drop aged-out anchors, keep the highest-priority most-recent ones.
    fn prune(&mut self) {
        let cutoff = Utc::now() - Duration::seconds(self.config.max_age as i64);
        self.anchors.retain(|a| a.timestamp >= cutoff);
        self.anchors.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        self.anchors.truncate(self.config.max_count);
    }

    pub fn format(&self) -> Option<String> {
        if self.anchors.is_empty() {
            return None;
        }
        let mut out = String::from("[CONTINUITY ANCHORS]");
        for anchor in &self.anchors {
            out.push_str(&format!(
                "\n{}: \"{}\" ({})",
                anchor.kind.label(),
                anchor.text,
                format_age(anchor.timestamp)
            ));
        }
        Some(out)
    }
}

fn format_age(timestamp: DateTime<Utc>) -> String {
    let elapsed = Utc::now() - timestamp;
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}min ago", minutes)
    } else {
        format!("{}h ago", elapsed.num_hours())
    }
}
