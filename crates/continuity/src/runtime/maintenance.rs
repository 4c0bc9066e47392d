//! Background maintenance: batch-index archive days the index log has not
//! seen, then expire old archives. Every step catches its own errors so one
//! failure never aborts the sweep.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::archive::ArchiveStats;
use crate::runtime::agent::AgentMemory;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub run_number: u64,
    pub indexed: usize,
    pub pruned: usize,
    pub archive_stats: ArchiveStats,
    pub errors: Vec<String>,
}

/// One sweep over a single agent. Returns `None` when a previous sweep for
/// this agent is still running (reentry guard).
pub async fn run_sweep(agent: &AgentMemory, batch_delay_ms: u64) -> Option<MaintenanceReport> {
    if agent.maintenance_running.swap(true, Ordering::SeqCst) {
        return None;
    }
    let report = sweep_inner(agent, batch_delay_ms).await;
    agent.maintenance_running.store(false, Ordering::SeqCst);
    Some(report)
}

async fn sweep_inner(agent: &AgentMemory, batch_delay_ms: u64) -> MaintenanceReport {
    let run_number = agent.next_maintenance_run();
    let mut indexed = 0usize;
    let mut errors: Vec<String> = Vec::new();

    match agent.indexer().await {
        Some(indexer) => {
            let unindexed = match agent.ensure_storage().await {
                Some(storage) => agent
                    .archiver()
                    .get_unindexed_dates(&storage.indexed_dates())
                    .unwrap_or_else(|e| {
                        errors.push(format!("listing unindexed dates: {}", e));
                        Vec::new()
                    }),
                None => Vec::new(),
            };
            for date in unindexed {
                match agent.archiver().get_conversation(&date) {
                    Ok(messages) => match indexer.index_day(&date, &messages).await {
                        Ok(count) => indexed += count,
                        Err(e) => errors.push(format!("indexing {}: {}", date, e)),
                    },
                    Err(e) => errors.push(format!("loading {}: {}", date, e)),
                }
                // Small pause between days so batch embedding never saturates
                // the provider.
                if batch_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(batch_delay_ms)).await;
                }
            }
        }
        None => errors.push("storage unavailable, skipping index pass".to_string()),
    }

    let pruned = match agent.archiver().prune_old() {
        Ok(count) => count,
        Err(e) => {
            errors.push(format!("pruning archives: {}", e));
            0
        }
    };

    let archive_stats = agent.archiver().get_stats().unwrap_or_else(|e| {
        errors.push(format!("archive stats: {}", e));
        ArchiveStats::default()
    });

    if errors.is_empty() {
        info!(
            agent = %agent.agent_id,
            run_number, indexed, pruned,
            "maintenance sweep complete"
        );
    } else {
        warn!(
            agent = %agent.agent_id,
            run_number,
            error_count = errors.len(),
            "maintenance sweep finished with errors"
        );
    }

    MaintenanceReport {
        run_number,
        indexed,
        pruned,
        archive_stats,
        errors,
    }
}
