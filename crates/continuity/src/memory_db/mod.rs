//! SQLite-backed exchange index: one relational table plus vector and
//! full-text virtual tables, shared by the indexer and the searcher.

pub mod indexer;
pub mod searcher;

pub use indexer::{pair_exchanges, Exchange, Indexer};
pub use searcher::{Searcher, SearchResponse, SearchResultItem};

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::ffi::sqlite3_auto_extension;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use sqlite_vec::sqlite3_vec_init;
use tracing::{info, warn};

use crate::embeddings::Embedder;

/// Register sqlite-vec for every connection opened by this process.
fn register_vec_extension() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| unsafe {
        sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
    });
}

/// Little-endian f32 blob, the wire format sqlite-vec expects.
pub(crate) fn encode_f32_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Which archive days have been indexed, persisted as JSON next to the DB.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexLog {
    pub dates: Vec<String>,
    pub last_indexed: Option<String>,
}

pub struct Storage {
    pool: Arc<Pool<SqliteConnectionManager>>,
    embedder: Option<Arc<dyn Embedder>>,
    dimensions: usize,
    fts_available: bool,
    index_log_path: PathBuf,
    index_log: Mutex<IndexLog>,
}

impl Storage {
    /// Open (or create) the exchange database. The vector table is created
    /// with the frozen dimensionality; a stale table with a different
    /// dimension is dropped and recreated.
    pub fn open(
        db_path: &Path,
        index_log_path: &Path,
        embedder: Option<Arc<dyn Embedder>>,
        dimensions: usize,
    ) -> Result<Self> {
        register_vec_extension();

        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating data dir {}", parent.display()))?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_flags(
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        );
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("failed to create connection pool: {}", e))?;

        let fts_available;
        {
            let conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )?;

            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS exchanges (
                     id TEXT PRIMARY KEY,
                     date TEXT NOT NULL,
                     exchange_index INTEGER NOT NULL,
                     user_text TEXT NOT NULL,
                     agent_text TEXT NOT NULL,
                     combined TEXT NOT NULL,
                     metadata TEXT,
                     created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_exchanges_date ON exchanges (date);",
            )?;

            let existing_vec_sql: Option<String> = conn
                .query_row(
                    "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'vec_exchanges'",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(sql) = existing_vec_sql {
                if !sql.contains(&format!("float[{}]", dimensions)) {
                    warn!(dimensions, "embedding dimension changed, recreating vector table");
                    conn.execute_batch("DROP TABLE vec_exchanges;")?;
                }
            }
            conn.execute_batch(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS vec_exchanges USING vec0(
                     id TEXT PRIMARY KEY,
                     embedding float[{}] distance_metric=cosine
                 );",
                dimensions
            ))?;

            fts_available = match conn.execute_batch(
                "CREATE VIRTUAL TABLE IF NOT EXISTS fts_exchanges USING fts5(id UNINDEXED, combined);",
            ) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "FTS5 unavailable, degrading to semantic-only search");
                    false
                }
            };
        }

        let index_log = load_index_log(index_log_path);
        info!(db = %db_path.display(), dimensions, fts_available, "exchange storage ready");
        Ok(Self {
            pool: Arc::new(pool),
            embedder,
            dimensions,
            fts_available,
            index_log_path: index_log_path.to_path_buf(),
            index_log: Mutex::new(index_log),
        })
    }

    pub fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("failed to get connection from pool: {}", e))
    }

    pub fn embedder(&self) -> Option<Arc<dyn Embedder>> {
        self.embedder.clone()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn fts_available(&self) -> bool {
        self.fts_available
    }

    pub fn exchange_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM exchanges", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn indexed_dates(&self) -> HashSet<String> {
        self.index_log
            .lock()
            .map(|log| log.dates.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn mark_indexed(&self, date: &str) {
        let snapshot = {
            let mut log = match self.index_log.lock() {
                Ok(log) => log,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !log.dates.iter().any(|d| d == date) {
                log.dates.push(date.to_string());
                log.dates.sort();
            }
            log.last_indexed = Some(chrono::Utc::now().to_rfc3339());
            log.clone()
        };
        if let Err(e) = save_index_log(&self.index_log_path, &snapshot) {
            warn!(error = %e, "failed to persist index log");
        }
    }
}

fn load_index_log(path: &Path) -> IndexLog {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(log) => log,
            Err(e) => {
                warn!(error = %e, "corrupt index log, starting fresh");
                IndexLog::default()
            }
        },
        Err(_) => IndexLog::default(),
    }
}

fn save_index_log(path: &Path, log: &IndexLog) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(log)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_storage(dir: &TempDir) -> Storage {
        Storage::open(
            &dir.path().join("continuity.db"),
            &dir.path().join("index-log.json"),
            None,
            8,
        )
        .unwrap()
    }

    #[test]
    fn test_open_creates_schema() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir);
        assert_eq!(storage.exchange_count().unwrap(), 0);
        assert!(storage.fts_available());
    }

    #[test]
    fn test_index_log_round_trip() {
        let dir = TempDir::new().unwrap();
        {
            let storage = open_storage(&dir);
            storage.mark_indexed("2025-06-02");
            storage.mark_indexed("2025-06-01");
            storage.mark_indexed("2025-06-02");
        }
        let storage = open_storage(&dir);
        let dates = storage.indexed_dates();
        assert_eq!(dates.len(), 2);
        assert!(dates.contains("2025-06-01"));
    }

    #[test]
    fn test_dimension_mismatch_recreates_vector_table() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("continuity.db");
        let log = dir.path().join("index-log.json");
        drop(Storage::open(&db, &log, None, 8).unwrap());
        // Reopen with a different dimensionality; must not error.
        let storage = Storage::open(&db, &log, None, 16).unwrap();
        assert_eq!(storage.dimensions(), 16);
    }

    #[test]
    fn test_encode_f32_blob_little_endian() {
        let blob = encode_f32_blob(&[1.0, -2.0]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
    }
}
