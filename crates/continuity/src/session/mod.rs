//! Session-scoped trackers: continuity anchors and topic state.

pub mod anchors;
pub mod topics;

pub use anchors::{Anchor, AnchorConfig, AnchorType, ContinuityAnchors};
pub use topics::{TopicConfig, TopicRecord, TopicTracker};

use chrono::{DateTime, Utc};

/// Per-agent session counters, reset on every `session_start`.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub session_start: DateTime<Utc>,
    pub exchange_count: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            session_id: None,
            session_start: Utc::now(),
            exchange_count: 0,
        }
    }

    pub fn reset(&mut self, session_id: Option<String>) {
        self.session_id = session_id;
        self.session_start = Utc::now();
        self.exchange_count = 0;
    }

    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.session_start).num_seconds()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
