//! Host-facing contract: lifecycle events consumed by the runtime and the
//! response shapes of the administrative methods.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::archive::ArchiveStats;
use crate::memory::Message;
use crate::memory_db::SearchResultItem;
use crate::session::anchors::Anchor;
use crate::session::topics::TopicRecord;

/// Lifecycle events delivered by the host, in delivery order per agent.
/// `tool_result_persist` is not an event variant: it is synchronous and has
/// its own method on the runtime.
#[derive(Debug, Clone)]
pub enum HostEvent {
    BeforeAgentStart {
        agent_id: String,
        messages: Vec<Message>,
    },
    BeforeToolCall {
        agent_id: String,
        tool_name: String,
        params: serde_json::Value,
    },
    AfterToolCall {
        agent_id: String,
        result_text: String,
    },
    AgentEnd {
        agent_id: String,
        messages: Vec<Message>,
    },
    BeforeCompaction {
        agent_id: String,
    },
    SessionStart {
        agent_id: String,
        session_id: String,
    },
    SessionEnd {
        agent_id: String,
        message_count: usize,
    },
}

/// What a hook hands back to the host.
#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    /// Context to prepend to the user message, empty when nothing applies.
    pub prepend_context: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStateReport {
    pub agent_id: String,
    pub archive_stats: ArchiveStats,
    pub topics: HashMap<String, TopicRecord>,
    pub fixated: Vec<(String, u32)>,
    pub anchors: Vec<Anchor>,
    pub exchange_count: u64,
    pub session_age_seconds: i64,
    pub index_ready: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicsReport {
    pub topics: HashMap<String, TopicRecord>,
    pub fixated: Vec<(String, u32)>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub agent_id: String,
    pub exchange_count: u64,
    pub storage_ready: bool,
    pub data_dir: PathBuf,
}

/// Response of the administrative search method.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub exchanges: Vec<SearchResultItem>,
    pub distances: Vec<f64>,
}
