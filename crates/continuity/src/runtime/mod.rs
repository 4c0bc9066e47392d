//! Per-agent memory runtime: hook handlers, the retrieval gate, injection,
//! and the background maintenance loop.

pub mod agent;
pub mod enrichment;
pub mod maintenance;
pub mod noise;

pub use agent::{AgentMemory, CachedRetrieval};
pub use maintenance::MaintenanceReport;
pub use noise::NoisePatterns;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, DEFAULT_AGENT_ID};
use crate::context_engine::compactor::Compactor;
use crate::context_engine::injection::{strip_injected_blocks, InjectionBuilder, RecallEntry};
use crate::events::{
    AgentStateReport, AgentSummary, HookOutcome, HostEvent, SearchOutcome, TopicsReport,
};
use crate::memory::{Content, Message};
use crate::memory_db::SearchResultItem;
use crate::utils::text_utils::TextUtils;
use crate::utils::TokenEstimator;

/// Retrieval fan-out on each turn; the injection itself uses only the top 3.
const TURN_SEARCH_LIMIT: usize = 30;
const INJECT_TOP_N: usize = 3;
/// User texts shorter than this skip retrieval entirely.
const MIN_QUERY_CHARS: usize = 10;
/// Name of the host tool whose results get enriched from the cache.
const MEMORY_TOOL_NAME: &str = "memory_search";

pub struct MemoryRuntime {
    config: Arc<Config>,
    agents: DashMap<String, Arc<AgentMemory>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryRuntime {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            agents: DashMap::new(),
            maintenance: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch or create the isolated state for an agent.
    pub fn agent(&self, agent_id: Option<&str>) -> Arc<AgentMemory> {
        let id = agent_id.unwrap_or(DEFAULT_AGENT_ID);
        self.agents
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AgentMemory::new(id, self.config.clone())))
            .clone()
    }

    /// A token estimator and compactor wired to this runtime's config, for
    /// hosts that delegate their compaction step.
    pub fn token_estimator(&self) -> TokenEstimator {
        TokenEstimator::new(&self.config.token_estimation)
    }

    pub fn compactor(&self) -> Compactor {
        Compactor::new(
            self.config.compaction.clone(),
            self.config.context_budget.clone(),
            self.config.anchors.clone(),
        )
    }

    /// Dispatch a host lifecycle event. All failures are absorbed; the host
    /// never sees an error from the memory layer.
    pub async fn handle_event(&self, event: HostEvent) -> HookOutcome {
        match event {
            HostEvent::BeforeAgentStart { agent_id, messages } => {
                let context = self.before_agent_start(&agent_id, &messages).await;
                HookOutcome {
                    prepend_context: if context.is_empty() {
                        None
                    } else {
                        Some(context)
                    },
                }
            }
            HostEvent::BeforeToolCall {
                agent_id,
                tool_name,
                params,
            } => {
                self.before_tool_call(&agent_id, &tool_name, &params).await;
                HookOutcome::default()
            }
            HostEvent::AfterToolCall {
                agent_id,
                result_text,
            } => {
                self.after_tool_call(&agent_id, &result_text);
                HookOutcome::default()
            }
            HostEvent::AgentEnd { agent_id, messages } => {
                self.agent_end(&agent_id, &messages).await;
                HookOutcome::default()
            }
            HostEvent::BeforeCompaction { agent_id } => {
                self.before_compaction(&agent_id);
                HookOutcome::default()
            }
            HostEvent::SessionStart {
                agent_id,
                session_id,
            } => {
                self.session_start(&agent_id, &session_id);
                HookOutcome::default()
            }
            HostEvent::SessionEnd {
                agent_id,
                message_count,
            } => {
                self.session_end(&agent_id, message_count).await;
                HookOutcome::default()
            }
        }
    }

    /// Turn start: strip previously injected blocks from the user text, run
    /// the gated retrieval, and assemble the context block to prepend.
    /// Returns an empty string when there is nothing worth injecting.
    pub async fn before_agent_start(&self, agent_id: &str, messages: &[Message]) -> String {
        match self.prepare_turn_context(agent_id, messages).await {
            Ok(context) => context,
            Err(e) => {
                warn!(agent = agent_id, error = %e, "turn context preparation failed");
                String::new()
            }
        }
    }

    async fn prepare_turn_context(&self, agent_id: &str, messages: &[Message]) -> Result<String> {
        let agent = self.agent(Some(agent_id));

        let user_text = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.text())
            .unwrap_or_default();
        let cleaned = strip_injected_blocks(&user_text);

        let mut recall_entries: Vec<RecallEntry> = Vec::new();
        if cleaned.chars().count() >= MIN_QUERY_CHARS {
            if let Some(searcher) = agent.searcher().await {
                let response = searcher.search(&cleaned, TURN_SEARCH_LIMIT).await;
                if let Some(error) = &response.error {
                    debug!(agent = agent_id, error = %error, "turn retrieval degraded");
                }
                let filtered = self.config.noise_patterns.filter(response.results);
                agent.cache_retrieval(&cleaned, filtered.clone());

                let has_intent = self.has_continuity_intent(&cleaned);
                let top_score = filtered.first().map(|r| r.composite).unwrap_or(0.0);
                let relevant = top_score >= self.config.search.relevance_threshold;
                if !filtered.is_empty() && (has_intent || relevant) {
                    let mut top: Vec<SearchResultItem> =
                        filtered.into_iter().take(INJECT_TOP_N).collect();
                    // Always shown oldest to newest, whatever the retriever
                    // scored higher.
                    top.sort_by(|a, b| {
                        a.date
                            .cmp(&b.date)
                            .then(a.exchange_index.cmp(&b.exchange_index))
                    });
                    recall_entries = top
                        .into_iter()
                        .map(|r| RecallEntry {
                            user_text: r.user_text,
                            agent_text: r.agent_text,
                        })
                        .collect();
                }
            }
        }

        let anchors_block = agent.anchors.lock().ok().and_then(|a| a.format());
        let topic_block = agent.topics.lock().ok().and_then(|t| t.format_notes());

        Ok(InjectionBuilder::new()
            .anchors(anchors_block)
            .topic_notes(topic_block)
            .recall(&recall_entries)
            .render())
    }

    fn has_continuity_intent(&self, text: &str) -> bool {
        self.config
            .continuity_indicators
            .iter()
            .any(|indicator| TextUtils::contains_ignore_case(text, indicator))
    }

    /// Pre-populate the retrieval cache so the synchronous persist hook has
    /// data to splice in.
    pub async fn before_tool_call(
        &self,
        agent_id: &str,
        tool_name: &str,
        params: &serde_json::Value,
    ) {
        if tool_name != MEMORY_TOOL_NAME {
            return;
        }
        let query = params
            .get("query")
            .or_else(|| params.get("text"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if query.is_empty() {
            return;
        }
        let agent = self.agent(Some(agent_id));
        if let Some(searcher) = agent.searcher().await {
            let response = searcher.search(query, TURN_SEARCH_LIMIT).await;
            let filtered = self.config.noise_patterns.filter(response.results);
            agent.cache_retrieval(query, filtered);
        }
    }

    /// Mid-turn tool output feeds the topic tracker without advancing the
    /// exchange window.
    pub fn after_tool_call(&self, agent_id: &str, result_text: &str) {
        if result_text.is_empty() {
            return;
        }
        let agent = self.agent(Some(agent_id));
        if let Ok(mut topics) = agent.topics.lock() {
            let current = topics.exchange_index();
            topics.track(result_text, Some(current));
        };
    }

    /// Synchronous by contract: splices the cached retrieval into a sparse
    /// `memory_search` result. No I/O happens here.
    pub fn tool_result_persist(
        &self,
        agent_id: &str,
        tool_name: &str,
        message: &Message,
    ) -> Option<Message> {
        if tool_name != MEMORY_TOOL_NAME {
            return None;
        }
        let agent = self.agent(Some(agent_id));
        let cached = agent.cached_retrieval()?;
        let enriched = enrichment::enrich_tool_result(
            &message.text(),
            &cached.results,
            &self.config.noise_patterns,
            agent.archiver().dir(),
        )?;
        let mut replacement = message.clone();
        replacement.content = Content::Text(enriched);
        Some(replacement)
    }

    /// Turn end: anchors and topics absorb the turn, the archiver persists
    /// it, and the touched days get an incremental index pass.
    pub async fn agent_end(&self, agent_id: &str, messages: &[Message]) {
        if messages.is_empty() {
            return;
        }
        let agent = self.agent(Some(agent_id));

        if let Ok(mut anchors) = agent.anchors.lock() {
            anchors.detect(messages);
        }

        let last_user = messages.iter().rev().find(|m| m.role == "user");
        let last_agent = messages.iter().rev().find(|m| m.role == "assistant");
        let turn_text = [last_user, last_agent]
            .into_iter()
            .flatten()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n");
        if !turn_text.is_empty() {
            if let Ok(mut topics) = agent.topics.lock() {
                topics.track(&turn_text, None);
            }
        }
        if let Ok(mut session) = agent.session.lock() {
            session.exchange_count += 1;
        }

        if let Err(e) = agent.archiver().archive(messages) {
            warn!(agent = agent_id, error = %e, "archiving turn failed");
            return;
        }

        let touched: BTreeSet<String> = messages
            .iter()
            .filter(|m| m.role == "user" || m.role == "assistant")
            .map(|m| {
                m.timestamp
                    .unwrap_or_else(Utc::now)
                    .format("%Y-%m-%d")
                    .to_string()
            })
            .collect();
        if let Some(indexer) = agent.indexer().await {
            for date in touched {
                match agent.archiver().get_conversation(&date) {
                    Ok(day) => {
                        if let Err(e) = indexer.index_day(&date, &day).await {
                            warn!(agent = agent_id, date, error = %e, "incremental index failed");
                        }
                    }
                    Err(e) => warn!(agent = agent_id, date, error = %e, "loading day failed"),
                }
            }
        }
    }

    pub fn before_compaction(&self, agent_id: &str) {
        let agent = self.agent(Some(agent_id));
        let topic_count = agent.topics.lock().map(|t| t.topics().len()).unwrap_or(0);
        let anchor_count = agent.anchors.lock().map(|a| a.anchors().len()).unwrap_or(0);
        info!(
            agent = agent_id,
            topic_count, anchor_count, "compaction starting, session trackers carry over"
        );
    }

    pub fn session_start(&self, agent_id: &str, session_id: &str) {
        let agent = self.agent(Some(agent_id));
        if let Ok(mut session) = agent.session.lock() {
            session.reset(Some(session_id.to_string()));
        }
        debug!(agent = agent_id, session_id, "session counters reset");
    }

    /// Final index pass when a session closes.
    pub async fn session_end(&self, agent_id: &str, message_count: usize) {
        let agent = self.agent(Some(agent_id));
        debug!(agent = agent_id, message_count, "session ended, running final index pass");
        if let Some(indexer) = agent.indexer().await {
            if let Some(storage) = agent.ensure_storage().await {
                let unindexed = agent
                    .archiver()
                    .get_unindexed_dates(&storage.indexed_dates())
                    .unwrap_or_default();
                for date in unindexed {
                    if let Ok(day) = agent.archiver().get_conversation(&date) {
                        if let Err(e) = indexer.index_day(&date, &day).await {
                            warn!(agent = agent_id, date, error = %e, "final index pass failed");
                        }
                    }
                }
            }
        }
    }

    // ===== Administrative methods =====

    pub async fn get_state(&self, agent_id: Option<&str>) -> AgentStateReport {
        let agent = self.agent(agent_id);
        let (topics, fixated) = agent
            .topics
            .lock()
            .map(|t| (t.topics().clone(), t.fixated_topics()))
            .unwrap_or_default();
        let anchors = agent
            .anchors
            .lock()
            .map(|a| a.anchors().to_vec())
            .unwrap_or_default();
        AgentStateReport {
            agent_id: agent.agent_id.clone(),
            archive_stats: agent.archiver().get_stats().unwrap_or_default(),
            topics,
            fixated,
            anchors,
            exchange_count: agent.exchange_count(),
            session_age_seconds: agent.session.lock().map(|s| s.age_seconds()).unwrap_or(0),
            index_ready: agent.storage_ready(),
        }
    }

    pub async fn search(
        &self,
        agent_id: Option<&str>,
        query: &str,
        limit: usize,
    ) -> SearchOutcome {
        let agent = self.agent(agent_id);
        let Some(searcher) = agent.searcher().await else {
            return SearchOutcome::default();
        };
        let response = searcher.search(query, limit).await;
        let distances = response
            .results
            .iter()
            .map(|r| r.distance.unwrap_or(1.0 - r.composite.min(1.0)))
            .collect();
        SearchOutcome {
            exchanges: response.results,
            distances,
        }
    }

    pub fn get_archive_stats(&self, agent_id: Option<&str>) -> crate::archive::ArchiveStats {
        self.agent(agent_id)
            .archiver()
            .get_stats()
            .unwrap_or_default()
    }

    pub fn get_topics(&self, agent_id: Option<&str>) -> TopicsReport {
        let agent = self.agent(agent_id);
        let (topics, fixated) = agent
            .topics
            .lock()
            .map(|t| (t.topics().clone(), t.fixated_topics()))
            .unwrap_or_default();
        TopicsReport { topics, fixated }
    }

    pub fn list_agents(&self) -> Vec<AgentSummary> {
        let mut agents: Vec<AgentSummary> = self
            .agents
            .iter()
            .map(|entry| {
                let agent = entry.value();
                AgentSummary {
                    agent_id: agent.agent_id.clone(),
                    exchange_count: agent.exchange_count(),
                    storage_ready: agent.storage_ready(),
                    data_dir: agent.data_dir().clone(),
                }
            })
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Spawn the recurring maintenance task. The task holds only a weak
    /// reference, so dropping the runtime (which also aborts the handle)
    /// never leaves a timer keeping the process alive.
    pub fn start_maintenance(self: &Arc<Self>) {
        let mut guard = match self.maintenance.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if guard.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let interval = self.config.maintenance_interval.max(1);
        let batch_delay = self.config.archive.batch_index_delay;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval));
            // The first tick fires immediately; skip it so the initial sweep
            // happens one full interval after startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(runtime) = weak.upgrade() else { break };
                let agents: Vec<Arc<AgentMemory>> = runtime
                    .agents
                    .iter()
                    .map(|entry| entry.value().clone())
                    .collect();
                for agent in agents {
                    if maintenance::run_sweep(&agent, batch_delay).await.is_none() {
                        debug!(agent = %agent.agent_id, "previous sweep still running, skipped");
                    }
                }
            }
        });
        *guard = Some(handle);
    }
}

impl Drop for MemoryRuntime {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.maintenance.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
