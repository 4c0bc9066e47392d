//! Per-agent memory state: archive, lazy storage, session trackers, and the
//! last-retrieval cache. Each agent's state lives under its own directory;
//! nothing here is reachable from another agent.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::warn;

use crate::archive::Archiver;
use crate::config::Config;
use crate::embeddings::init_embedder;
use crate::memory_db::{Indexer, Searcher, SearchResultItem, Storage};
use crate::session::{ContinuityAnchors, SessionState, TopicTracker};

/// Retrieval results cached for the synchronous persist hook, overwritten on
/// every new lookup.
#[derive(Debug, Clone)]
pub struct CachedRetrieval {
    pub query: String,
    pub results: Vec<SearchResultItem>,
    pub fetched_at: DateTime<Utc>,
}

pub struct AgentMemory {
    pub agent_id: String,
    data_dir: PathBuf,
    config: Arc<Config>,
    archiver: Archiver,
    storage: OnceCell<Option<Arc<Storage>>>,
    pub(crate) session: Mutex<SessionState>,
    pub(crate) topics: Mutex<TopicTracker>,
    pub(crate) anchors: Mutex<ContinuityAnchors>,
    pub(crate) last_retrieval: RwLock<Option<CachedRetrieval>>,
    pub(crate) maintenance_running: AtomicBool,
    pub(crate) maintenance_runs: AtomicU64,
}

impl AgentMemory {
    pub fn new(agent_id: &str, config: Arc<Config>) -> Self {
        let data_dir = config.agent_dir(agent_id);
        let archiver = Archiver::new(&data_dir, &config.archive);
        Self {
            agent_id: agent_id.to_string(),
            data_dir,
            archiver,
            session: Mutex::new(SessionState::new()),
            topics: Mutex::new(TopicTracker::new(config.topic_tracking.clone())),
            anchors: Mutex::new(ContinuityAnchors::new(config.anchors.clone())),
            last_retrieval: RwLock::new(None),
            storage: OnceCell::new(),
            maintenance_running: AtomicBool::new(false),
            maintenance_runs: AtomicU64::new(0),
            config,
        }
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    /// Lazy, idempotent storage init. The first caller pays for the
    /// embedding warmup and schema setup; concurrent callers await the same
    /// future and observe the final state. A failed init leaves the agent in
    /// degraded mode (no retrieval) without poisoning later turns' session
    /// context.
    pub async fn ensure_storage(&self) -> Option<Arc<Storage>> {
        self.storage
            .get_or_init(|| async {
                let (embedder, dimensions) = match init_embedder(&self.config.embedding).await {
                    Some(ready) => ready,
                    None => {
                        warn!(agent = %self.agent_id, "no embedding provider available, retrieval disabled");
                        return None;
                    }
                };
                let db_path = self.data_dir.join(&self.config.embedding.db_file);
                let log_path = self.data_dir.join("index-log.json");
                match Storage::open(&db_path, &log_path, Some(embedder), dimensions) {
                    Ok(storage) => Some(Arc::new(storage)),
                    Err(e) => {
                        warn!(agent = %self.agent_id, error = %e, "storage init failed, retrieval disabled");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// `true` once storage init has completed successfully.
    pub fn storage_ready(&self) -> bool {
        matches!(self.storage.get(), Some(Some(_)))
    }

    pub async fn searcher(&self) -> Option<Searcher> {
        let storage = self.ensure_storage().await?;
        Some(Searcher::new(storage, self.config.search.clone()))
    }

    pub async fn indexer(&self) -> Option<Indexer> {
        let storage = self.ensure_storage().await?;
        Some(Indexer::new(storage))
    }

    pub fn cache_retrieval(&self, query: &str, results: Vec<SearchResultItem>) {
        if let Ok(mut cache) = self.last_retrieval.write() {
            *cache = Some(CachedRetrieval {
                query: query.to_string(),
                results,
                fetched_at: Utc::now(),
            });
        }
    }

    pub fn cached_retrieval(&self) -> Option<CachedRetrieval> {
        self.last_retrieval.read().ok().and_then(|c| c.clone())
    }

    pub fn exchange_count(&self) -> u64 {
        self.session
            .lock()
            .map(|s| s.exchange_count)
            .unwrap_or(0)
    }

    pub fn next_maintenance_run(&self) -> u64 {
        self.maintenance_runs.fetch_add(1, Ordering::SeqCst) + 1
    }
}
