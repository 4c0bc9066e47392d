//! Exchange pairing and dual-index population.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::{debug, warn};

use crate::archive::ArchivedMessage;
use crate::embeddings::DOCUMENT_PREFIX;
use crate::memory_db::{encode_f32_blob, Storage};

/// A paired (user, agent) turn, the unit of indexing. Either side may be
/// missing for orphaned messages.
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    pub user: Option<ArchivedMessage>,
    pub agent: Option<ArchivedMessage>,
}

impl Exchange {
    pub fn user_text(&self) -> &str {
        self.user.as_ref().map(|m| m.text.as_str()).unwrap_or("")
    }

    pub fn agent_text(&self) -> &str {
        self.agent.as_ref().map(|m| m.text.as_str()).unwrap_or("")
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.user
            .as_ref()
            .and_then(|m| m.parsed_timestamp())
            .or_else(|| self.agent.as_ref().and_then(|m| m.parsed_timestamp()))
    }

    /// Rendering used for both embedding and full-text indexing.
    pub fn combined(&self, date: &str) -> String {
        let time = self
            .timestamp()
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "00:00".to_string());
        format!(
            "[{} {}]\nUser: {}\nAgent: {}",
            date,
            time,
            self.user_text(),
            self.agent_text()
        )
    }
}

/// Pair a time-ordered message stream: each user message opens an exchange
/// (flushing any already-open one), each agent message closes and flushes
/// the current exchange, and a trailing half-open pair is flushed at end.
pub fn pair_exchanges(messages: &[ArchivedMessage]) -> Vec<Exchange> {
    let mut exchanges = Vec::new();
    let mut open_user: Option<ArchivedMessage> = None;

    for message in messages {
        match message.sender.as_str() {
            "user" => {
                if let Some(user) = open_user.take() {
                    exchanges.push(Exchange {
                        user: Some(user),
                        agent: None,
                    });
                }
                open_user = Some(message.clone());
            }
            "agent" => {
                exchanges.push(Exchange {
                    user: open_user.take(),
                    agent: Some(message.clone()),
                });
            }
            other => {
                debug!(sender = other, "skipping unknown sender during pairing");
            }
        }
    }
    if let Some(user) = open_user {
        exchanges.push(Exchange {
            user: Some(user),
            agent: None,
        });
    }
    exchanges
}

pub struct Indexer {
    storage: Arc<Storage>,
}

impl Indexer {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Index one archive day: pair, embed, and upsert the exchange row plus
    /// its vector and FTS rows, one transaction per exchange. A failing
    /// exchange is skipped; the day is still marked indexed at the end.
    pub async fn index_day(&self, date: &str, messages: &[ArchivedMessage]) -> Result<usize> {
        let exchanges = pair_exchanges(messages);
        if exchanges.is_empty() {
            self.storage.mark_indexed(date);
            return Ok(0);
        }

        let combined: Vec<String> = exchanges.iter().map(|e| e.combined(date)).collect();
        let embeddings = match self.storage.embedder() {
            Some(embedder) => {
                let prefixed: Vec<String> = combined
                    .iter()
                    .map(|c| format!("{}{}", DOCUMENT_PREFIX, c))
                    .collect();
                match embedder.embed(&prefixed).await {
                    Ok(vectors) => Some(vectors),
                    Err(e) => {
                        warn!(date, error = %e, "embedding failed, indexing without vectors");
                        None
                    }
                }
            }
            None => None,
        };

        let mut indexed = 0usize;
        for (i, exchange) in exchanges.iter().enumerate() {
            let id = format!("exchange_{}_{}", date, i);
            let vector = embeddings.as_ref().and_then(|vs| vs.get(i));
            if let Err(e) = self.write_exchange(&id, date, i, exchange, &combined[i], vector) {
                warn!(id, error = %e, "failed to index exchange, skipping");
                continue;
            }
            indexed += 1;
        }

        self.storage.mark_indexed(date);
        debug!(date, indexed, "indexed archive day");
        Ok(indexed)
    }

    fn write_exchange(
        &self,
        id: &str,
        date: &str,
        index: usize,
        exchange: &Exchange,
        combined: &str,
        vector: Option<&Vec<f32>>,
    ) -> Result<()> {
        let created_at = exchange
            .timestamp()
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        let metadata = serde_json::json!({
            "date": date,
            "exchangeIndex": index,
        })
        .to_string();

        let mut conn = self.storage.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO exchanges
             (id, date, exchange_index, user_text, agent_text, combined, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                date,
                index as i64,
                exchange.user_text(),
                exchange.agent_text(),
                combined,
                metadata,
                created_at,
            ],
        )?;

        // vec0 has no upsert; replace is delete-then-insert in-transaction.
        if let Some(vector) = vector {
            tx.execute("DELETE FROM vec_exchanges WHERE id = ?1", params![id])?;
            tx.execute(
                "INSERT INTO vec_exchanges (id, embedding) VALUES (?1, ?2)",
                params![id, encode_f32_blob(vector)],
            )?;
        }

        if self.storage.fts_available() {
            tx.execute("DELETE FROM fts_exchanges WHERE id = ?1", params![id])?;
            tx.execute(
                "INSERT INTO fts_exchanges (id, combined) VALUES (?1, ?2)",
                params![id, combined],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use tempfile::TempDir;

    fn archived(sender: &str, text: &str, minute: u32) -> ArchivedMessage {
        ArchivedMessage {
            timestamp: format!("2025-06-01T09:{:02}:00+00:00", minute),
            sender: sender.into(),
            text: text.into(),
        }
    }

    #[test]
    fn test_pairing_alternating_stream() {
        let messages = vec![
            archived("user", "q1", 0),
            archived("agent", "a1", 1),
            archived("user", "q2", 2),
            archived("agent", "a2", 3),
        ];
        let exchanges = pair_exchanges(&messages);
        assert_eq!(exchanges.len(), 2);
        assert_eq!(exchanges[0].user_text(), "q1");
        assert_eq!(exchanges[0].agent_text(), "a1");
        assert_eq!(exchanges[1].agent_text(), "a2");
    }

    #[test]
    fn test_pairing_orphan_user_flushed() {
        let messages = vec![
            archived("user", "first", 0),
            archived("user", "second", 1),
            archived("agent", "answer", 2),
        ];
        let exchanges = pair_exchanges(&messages);
        assert_eq!(exchanges.len(), 2);
        assert_eq!(exchanges[0].user_text(), "first");
        assert!(exchanges[0].agent.is_none());
        assert_eq!(exchanges[1].user_text(), "second");
    }

    #[test]
    fn test_pairing_leading_agent_and_trailing_user() {
        let messages = vec![archived("agent", "hello", 0), archived("user", "hi", 1)];
        let exchanges = pair_exchanges(&messages);
        assert_eq!(exchanges.len(), 2);
        assert!(exchanges[0].user.is_none());
        assert_eq!(exchanges[0].agent_text(), "hello");
        assert!(exchanges[1].agent.is_none());
    }

    #[test]
    fn test_pairing_empty() {
        assert!(pair_exchanges(&[]).is_empty());
    }

    #[test]
    fn test_combined_format() {
        let exchange = Exchange {
            user: Some(archived("user", "I love sourdough", 15)),
            agent: Some(archived("agent", "Great bake!", 16)),
        };
        assert_eq!(
            exchange.combined("2025-06-01"),
            "[2025-06-01 09:15]\nUser: I love sourdough\nAgent: Great bake!"
        );
    }

    #[tokio::test]
    async fn test_index_day_writes_all_tables() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            Storage::open(
                &dir.path().join("continuity.db"),
                &dir.path().join("index-log.json"),
                Some(Arc::new(HashEmbedder::new(32))),
                32,
            )
            .unwrap(),
        );
        let indexer = Indexer::new(storage.clone());

        let messages = vec![
            archived("user", "I love sourdough", 0),
            archived("agent", "Great bake!", 1),
        ];
        let indexed = indexer.index_day("2025-06-01", &messages).await.unwrap();
        assert_eq!(indexed, 1);
        assert_eq!(storage.exchange_count().unwrap(), 1);
        assert!(storage.indexed_dates().contains("2025-06-01"));

        let conn = storage.conn().unwrap();
        let vec_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM vec_exchanges", [], |r| r.get(0))
            .unwrap();
        let fts_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM fts_exchanges", [], |r| r.get(0))
            .unwrap();
        assert_eq!(vec_rows, 1);
        assert_eq!(fts_rows, 1);
    }

    #[tokio::test]
    async fn test_reindex_replaces_rows() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            Storage::open(
                &dir.path().join("continuity.db"),
                &dir.path().join("index-log.json"),
                Some(Arc::new(HashEmbedder::new(32))),
                32,
            )
            .unwrap(),
        );
        let indexer = Indexer::new(storage.clone());
        let messages = vec![
            archived("user", "question", 0),
            archived("agent", "answer", 1),
        ];
        indexer.index_day("2025-06-01", &messages).await.unwrap();
        indexer.index_day("2025-06-01", &messages).await.unwrap();

        let conn = storage.conn().unwrap();
        for table in ["exchanges", "vec_exchanges", "fts_exchanges"] {
            let rows: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
                .unwrap();
            assert_eq!(rows, 1, "{} must hold exactly one row per exchange", table);
        }
    }

    #[tokio::test]
    async fn test_empty_day_marked_indexed() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            Storage::open(
                &dir.path().join("continuity.db"),
                &dir.path().join("index-log.json"),
                None,
                8,
            )
            .unwrap(),
        );
        let indexer = Indexer::new(storage.clone());
        assert_eq!(indexer.index_day("2025-06-09", &[]).await.unwrap(), 0);
        assert!(storage.indexed_dates().contains("2025-06-09"));
    }
}
