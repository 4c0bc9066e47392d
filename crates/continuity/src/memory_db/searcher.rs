//! Hybrid semantic/keyword retrieval with reciprocal rank fusion and a
//! temporal re-rank. Higher composite is better.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embeddings::QUERY_PREFIX;
use crate::memory_db::{encode_f32_blob, Storage};

/// Characters stripped outright before FTS tokenization.
const FTS_STRIP_CHARS: [char; 9] = ['*', '"', '^', '(', ')', '{', '}', '[', ']'];
const FTS_OPERATORS: [&str; 4] = ["AND", "OR", "NOT", "NEAR"];
const MAX_FETCH_LIMIT: usize = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchConfig {
    pub recency_half_life_days: f64,
    pub recency_weight: f64,
    pub rrf_k: f64,
    /// Minimum composite a retrieval hit needs before it can trigger
    /// injection on its own.
    pub relevance_threshold: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            recency_half_life_days: 14.0,
            recency_weight: 0.15,
            rrf_k: 60.0,
            relevance_threshold: 0.028,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub id: String,
    pub date: String,
    pub exchange_index: i64,
    pub user_text: String,
    pub agent_text: String,
    pub combined: String,
    pub created_at: String,
    /// Semantic distance when the vector retriever saw this row.
    pub distance: Option<f64>,
    pub rrf_score: f64,
    pub recency_boost: f64,
    pub composite: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
struct RowData {
    date: String,
    exchange_index: i64,
    user_text: String,
    agent_text: String,
    combined: String,
    created_at: String,
}

pub struct Searcher {
    storage: Arc<Storage>,
    config: SearchConfig,
}

impl Searcher {
    pub fn new(storage: Arc<Storage>, config: SearchConfig) -> Self {
        Self { storage, config }
    }

    /// Run the hybrid search. Failures never propagate to the caller; they
    /// come back as an empty result with the error attached.
    pub async fn search(&self, query: &str, limit: usize) -> SearchResponse {
        match self.search_inner(query, limit).await {
            Ok(results) => SearchResponse {
                results,
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "search failed");
                SearchResponse {
                    results: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn search_inner(&self, query: &str, limit: usize) -> Result<Vec<SearchResultItem>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let fetch_limit = (2 * limit).min(MAX_FETCH_LIMIT);
        let mut rows: HashMap<String, RowData> = HashMap::new();
        let mut distances: HashMap<String, f64> = HashMap::new();

        let semantic = match self.semantic_candidates(query, fetch_limit, &mut rows).await {
            Ok(ranked) => {
                for (id, distance) in &ranked {
                    distances.insert(id.clone(), *distance);
                }
                ranked.into_iter().map(|(id, _)| id).collect::<Vec<_>>()
            }
            Err(e) => {
                warn!(error = %e, "semantic retrieval unavailable");
                Vec::new()
            }
        };

        let keyword = match self.keyword_candidates(query, fetch_limit, &mut rows) {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!(error = %e, "keyword retrieval unavailable");
                Vec::new()
            }
        };

        if semantic.is_empty() && keyword.is_empty() {
            return Ok(Vec::new());
        }

        let fused = rrf_fuse(&[&semantic, &keyword], self.config.rrf_k);
        let now = Utc::now();
        let mut results: Vec<SearchResultItem> = fused
            .into_iter()
            .filter_map(|(id, rrf_score)| {
                let row = rows.get(&id)?;
                let boost = self.recency_boost(row, now);
                Some(SearchResultItem {
                    id: id.clone(),
                    date: row.date.clone(),
                    exchange_index: row.exchange_index,
                    user_text: row.user_text.clone(),
                    agent_text: row.agent_text.clone(),
                    combined: row.combined.clone(),
                    created_at: row.created_at.clone(),
                    distance: distances.get(&id).copied(),
                    rrf_score,
                    recency_boost: boost,
                    composite: rrf_score * (1.0 + boost),
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        debug!(query_len = query.len(), hits = results.len(), "search complete");
        Ok(results)
    }

    async fn semantic_candidates(
        &self,
        query: &str,
        fetch_limit: usize,
        rows: &mut HashMap<String, RowData>,
    ) -> Result<Vec<(String, f64)>> {
        let embedder = self
            .storage
            .embedder()
            .ok_or_else(|| anyhow::anyhow!("no embedder configured"))?;
        let vectors = embedder
            .embed(&[format!("{}{}", QUERY_PREFIX, query)])
            .await?;
        let vector = vectors
            .first()
            .ok_or_else(|| anyhow::anyhow!("empty query embedding"))?;

        let conn = self.storage.conn()?;
        let mut stmt = conn.prepare(
            "SELECT v.id, v.distance, e.date, e.exchange_index, e.user_text, e.agent_text,
                    e.combined, e.created_at
             FROM vec_exchanges v
             JOIN exchanges e ON e.id = v.id
             WHERE v.embedding MATCH ?1 AND k = ?2
             ORDER BY v.distance ASC",
        )?;
        let mut ranked = Vec::new();
        let mut query_rows = stmt.query(params![encode_f32_blob(vector), fetch_limit as i64])?;
        while let Some(row) = query_rows.next()? {
            let id: String = row.get(0)?;
            let distance: f64 = row.get(1)?;
            rows.insert(
                id.clone(),
                RowData {
                    date: row.get(2)?,
                    exchange_index: row.get(3)?,
                    user_text: row.get(4)?,
                    agent_text: row.get(5)?,
                    combined: row.get(6)?,
                    created_at: row.get(7)?,
                },
            );
            ranked.push((id, distance));
        }
        Ok(ranked)
    }

    fn keyword_candidates(
        &self,
        query: &str,
        fetch_limit: usize,
        rows: &mut HashMap<String, RowData>,
    ) -> Result<Vec<String>> {
        if !self.storage.fts_available() {
            return Ok(Vec::new());
        }
        let tokens = sanitize_fts_query(query);
        if tokens.len() < 2 {
            return Ok(Vec::new());
        }
        let match_expr = tokens.join(" ");

        let conn = self.storage.conn()?;
        let mut stmt = conn.prepare(
            "SELECT fts_exchanges.id, e.date, e.exchange_index, e.user_text, e.agent_text,
                    e.combined, e.created_at
             FROM fts_exchanges
             JOIN exchanges e ON e.id = fts_exchanges.id
             WHERE fts_exchanges MATCH ?1
             ORDER BY bm25(fts_exchanges) ASC
             LIMIT ?2",
        )?;
        let mut ranked = Vec::new();
        let mut query_rows = stmt.query(params![match_expr, fetch_limit as i64])?;
        while let Some(row) = query_rows.next()? {
            let id: String = row.get(0)?;
            rows.insert(
                id.clone(),
                RowData {
                    date: row.get(1)?,
                    exchange_index: row.get(2)?,
                    user_text: row.get(3)?,
                    agent_text: row.get(4)?,
                    combined: row.get(5)?,
                    created_at: row.get(6)?,
                },
            );
            ranked.push(id);
        }
        Ok(ranked)
    }

    fn recency_boost(&self, row: &RowData, now: DateTime<Utc>) -> f64 {
        let timestamp = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                // Fall back to the archive date at noon UTC, offset by the
                // exchange index so same-day exchanges stay ordered.
                let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d").ok()?;
                let noon = date.and_hms_opt(12, 0, 0)?;
                Some(
                    Utc.from_utc_datetime(&noon)
                        + chrono::Duration::minutes(row.exchange_index),
                )
            });
        let age_days = match timestamp {
            Some(t) => ((now - t).num_seconds() as f64 / 86_400.0).max(0.0),
            None => return 0.0,
        };
        (-age_days / self.config.recency_half_life_days).exp() * self.config.recency_weight
    }
}

/// Reciprocal rank fusion: each list contributes `1 / (k + rank + 1)` for
/// every document it ranked.
pub fn rrf_fuse(lists: &[&Vec<String>], k: f64) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for list in lists {
        for (rank, id) in list.iter().enumerate() {
            if !scores.contains_key(id) {
                order.push(id.clone());
            }
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (k + rank as f64 + 1.0);
        }
    }
    order
        .into_iter()
        .map(|id| {
            let score = scores[&id];
            (id, score)
        })
        .collect()
}

/// Sanitize free text into an FTS5 match expression: strip operator
/// characters and keywords, quote every surviving token (implicit AND).
pub fn sanitize_fts_query(query: &str) -> Vec<String> {
    let stripped: String = query
        .chars()
        .map(|c| {
            if FTS_STRIP_CHARS.contains(&c) || c == ':' {
                ' '
            } else {
                c
            }
        })
        .collect();

    stripped
        .split_whitespace()
        .filter(|t| !FTS_OPERATORS.contains(&t.to_uppercase().as_str()))
        .map(|t| {
            t.chars()
                .map(|c| if c.is_alphanumeric() { c } else { ' ' })
                .collect::<String>()
        })
        .flat_map(|t| {
            t.split_whitespace()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        })
        .filter(|t| t.chars().count() >= 2)
        .map(|t| format!("\"{}\"", t))
        .collect()
}
