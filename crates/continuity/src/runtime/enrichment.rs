//! Synchronous enrichment of memory tool results. Runs inside the host's
//! persist hook, so it may only read the pre-populated retrieval cache —
//! no I/O, no awaiting.

use std::path::Path;

use serde_json::{json, Value};
use tracing::debug;

use crate::context_engine::injection::{TOOL_RECALL_HEADER, TOOL_RECALL_TRAILER};
use crate::memory_db::SearchResultItem;
use crate::runtime::noise::NoisePatterns;
use crate::utils::text_utils::TextUtils;

const MAX_ARCHIVE_ENTRIES: usize = 5;
const SNIPPET_LIMIT: usize = 700;
const QUOTE_LIMIT: usize = 300;

/// Splice cached archive hits into a sparse `memory_search` tool result.
/// Returns the replacement text, or `None` when the payload is already rich,
/// unparseable, or nothing in the cache survives the noise filter.
pub fn enrich_tool_result(
    raw: &str,
    cached: &[SearchResultItem],
    patterns: &NoisePatterns,
    archive_dir: &Path,
) -> Option<String> {
    let mut payload: Value = serde_json::from_str(raw).ok()?;
    let existing = payload.get("results")?.as_array()?.len();
    if existing >= 2 {
        return None;
    }

    let survivors: Vec<&SearchResultItem> = cached
        .iter()
        .filter(|r| patterns.classify(&r.user_text, &r.agent_text).is_none())
        .take(MAX_ARCHIVE_ENTRIES)
        .collect();
    if survivors.is_empty() {
        return None;
    }

    let entries: Vec<Value> = survivors
        .iter()
        .map(|r| {
            json!({
                "id": format!("archive_{}_{}", r.date, r.exchange_index),
                "path": archive_dir
                    .join(format!("{}.json", r.date))
                    .to_string_lossy()
                    .to_string(),
                "snippet": TextUtils::truncate_chars(&r.combined, SNIPPET_LIMIT).into_owned(),
                "source": "conversation-archive",
                "score": 1.0 - r.distance.unwrap_or(0.5),
            })
        })
        .collect();
    payload
        .get_mut("results")?
        .as_array_mut()?
        .extend(entries);

    let mut block = String::from(TOOL_RECALL_HEADER);
    for r in &survivors {
        block.push_str(&format!(
            "\n- They told you: \"{}\"",
            TextUtils::truncate_chars(&r.user_text, QUOTE_LIMIT)
        ));
        block.push_str(&format!(
            "\n  You said: \"{}\"",
            TextUtils::truncate_chars(&r.agent_text, QUOTE_LIMIT)
        ));
    }
    block.push('\n');
    block.push_str(TOOL_RECALL_TRAILER);

    debug!(spliced = survivors.len(), "enriched memory tool result");
    Some(format!("{}\n\n{}", block, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cached_hit(user_text: &str, agent_text: &str) -> SearchResultItem {
        SearchResultItem {
            id: "exchange_2025-06-01_0".into(),
            date: "2025-06-01".into(),
            exchange_index: 0,
            user_text: user_text.into(),
            agent_text: agent_text.into(),
            combined: format!("[2025-06-01 09:00]\nUser: {}\nAgent: {}", user_text, agent_text),
            created_at: "2025-06-01T09:00:00+00:00".into(),
            distance: Some(0.2),
            rrf_score: 0.016,
            recency_boost: 0.1,
            composite: 0.018,
        }
    }

    #[test]
    fn test_empty_results_get_spliced() {
        let cached = vec![cached_hit("I love sourdough", "Great bake!")];
        let out = enrich_tool_result(
            r#"{"results": []}"#,
            &cached,
            &NoisePatterns::default(),
            &PathBuf::from("/data/archive"),
        )
        .unwrap();

        assert!(out.starts_with(TOOL_RECALL_HEADER));
        assert!(out.contains("I love sourdough"));
        assert!(out.contains("Great bake!"));

        let json_part = out.split("\n\n").last().unwrap();
        let payload: Value = serde_json::from_str(json_part).unwrap();
        let results = payload["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["id"], "archive_2025-06-01_0");
        assert_eq!(results[0]["source"], "conversation-archive");
        assert!((results[0]["score"].as_f64().unwrap() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_rich_results_untouched() {
        let cached = vec![cached_hit("a", "b")];
        let raw = r#"{"results": [{"id": 1}, {"id": 2}]}"#;
        assert!(enrich_tool_result(
            raw,
            &cached,
            &NoisePatterns::default(),
            &PathBuf::from("/data/archive")
        )
        .is_none());
    }

    #[test]
    fn test_unparseable_payload_untouched() {
        let cached = vec![cached_hit("a", "b")];
        assert!(enrich_tool_result(
            "not json at all",
            &cached,
            &NoisePatterns::default(),
            &PathBuf::from("/data/archive")
        )
        .is_none());
    }

    #[test]
    fn test_noisy_cache_entries_skipped() {
        let cached = vec![cached_hit(
            "do you remember my recipe?",
            "I don't have any information about that",
        )];
        assert!(enrich_tool_result(
            r#"{"results": []}"#,
            &cached,
            &NoisePatterns::default(),
            &PathBuf::from("/data/archive")
        )
        .is_none());
    }

    #[test]
    fn test_at_most_five_entries() {
        let cached: Vec<SearchResultItem> = (0..8)
            .map(|i| cached_hit(&format!("long enough user text {}", i), "a substantial reply about gardens"))
            .collect();
        let out = enrich_tool_result(
            r#"{"results": []}"#,
            &cached,
            &NoisePatterns::default(),
            &PathBuf::from("/data/archive"),
        )
        .unwrap();
        let json_part = out.split("\n\n").last().unwrap();
        let payload: Value = serde_json::from_str(json_part).unwrap();
        assert_eq!(payload["results"].as_array().unwrap().len(), 5);
    }
}
