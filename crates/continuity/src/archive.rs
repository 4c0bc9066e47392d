//! Durable per-day conversation archive with deduplication.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::memory::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArchiveConfig {
    /// Directory name under the agent data dir.
    pub archive_dir: String,
    /// Day files older than this are pruned; 0 disables pruning.
    pub retention_days: i64,
    /// Sleep between day batches during maintenance indexing, milliseconds.
    pub batch_index_delay: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archive_dir: "archive".into(),
            retention_days: 30,
            batch_index_delay: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedMessage {
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// `user` or `agent`.
    pub sender: String,
    pub text: String,
}

impl ArchivedMessage {
    pub fn dedup_key(&self) -> String {
        format!("{}_{}", self.timestamp, self.sender)
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DayFile {
    date: String,
    message_count: usize,
    messages: Vec<ArchivedMessage>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveStats {
    pub total_days: usize,
    pub total_messages: usize,
    pub oldest_date: Option<String>,
    pub newest_date: Option<String>,
}

pub struct Archiver {
    dir: PathBuf,
    retention_days: i64,
}

impl Archiver {
    pub fn new(agent_dir: &Path, config: &ArchiveConfig) -> Self {
        Self {
            dir: agent_dir.join(&config.archive_dir),
            retention_days: config.retention_days,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn day_path(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{}.json", date))
    }

    /// Persist user/assistant messages into their day files. Idempotent:
    /// entries sharing `(timestamp, sender)` are never written twice.
    /// Returns the number of newly written entries.
    pub fn archive(&self, messages: &[Message]) -> Result<usize> {
        let entries: Vec<ArchivedMessage> = messages
            .iter()
            .filter(|m| m.role == "user" || m.role == "assistant")
            .filter_map(|m| {
                let text = m.text();
                if text.is_empty() {
                    return None;
                }
                let timestamp = m.timestamp.unwrap_or_else(Utc::now);
                Some(ArchivedMessage {
                    timestamp: timestamp.to_rfc3339(),
                    sender: if m.role == "user" { "user" } else { "agent" }.into(),
                    text,
                })
            })
            .collect();
        if entries.is_empty() {
            return Ok(0);
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating archive dir {}", self.dir.display()))?;

        let mut by_date: Vec<(String, Vec<ArchivedMessage>)> = Vec::new();
        for entry in entries {
            let date = entry.timestamp.chars().take(10).collect::<String>();
            match by_date.iter_mut().find(|(d, _)| *d == date) {
                Some((_, bucket)) => bucket.push(entry),
                None => by_date.push((date, vec![entry])),
            }
        }

        let mut written = 0usize;
        for (date, incoming) in by_date {
            let mut messages = self.load_day(&date);
            let mut seen: HashSet<String> = messages.iter().map(|m| m.dedup_key()).collect();
            for entry in incoming {
                if seen.insert(entry.dedup_key()) {
                    messages.push(entry);
                    written += 1;
                }
            }
            messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            self.write_day(&date, messages)?;
        }
        if written > 0 {
            debug!(written, "archived messages");
        }
        Ok(written)
    }

    fn load_day(&self, date: &str) -> Vec<ArchivedMessage> {
        let path = self.day_path(date);
        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<DayFile>(&raw) {
                Ok(day) => day.messages,
                Err(e) => {
                    warn!(date, error = %e, "corrupt archive day file, treating as empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        }
    }

    fn write_day(&self, date: &str, messages: Vec<ArchivedMessage>) -> Result<()> {
        let day = DayFile {
            date: date.to_string(),
            message_count: messages.len(),
            messages,
        };
        let path = self.day_path(date);
        let tmp = self.dir.join(format!(".{}.json.tmp", date));
        fs::write(&tmp, serde_json::to_vec_pretty(&day)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    pub fn get_conversation(&self, date: &str) -> Result<Vec<ArchivedMessage>> {
        Ok(self.load_day(date))
    }

    /// All archived dates, ascending.
    pub fn get_dates(&self) -> Result<Vec<String>> {
        let mut dates = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(dates),
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date) = name.strip_suffix(".json") {
                if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok() {
                    dates.push(date.to_string());
                }
            }
        }
        dates.sort();
        Ok(dates)
    }

    pub fn get_stats(&self) -> Result<ArchiveStats> {
        let dates = self.get_dates()?;
        let mut total_messages = 0usize;
        for date in &dates {
            total_messages += self.load_day(date).len();
        }
        Ok(ArchiveStats {
            total_days: dates.len(),
            total_messages,
            oldest_date: dates.first().cloned(),
            newest_date: dates.last().cloned(),
        })
    }

    pub fn get_unindexed_dates(&self, indexed: &HashSet<String>) -> Result<Vec<String>> {
        Ok(self
            .get_dates()?
            .into_iter()
            .filter(|d| !indexed.contains(d))
            .collect())
    }

    /// Delete day files past the retention window. Returns how many went.
    pub fn prune_old(&self) -> Result<usize> {
        if self.retention_days <= 0 {
            return Ok(0);
        }
        let cutoff = (Utc::now() - chrono::Duration::days(self.retention_days))
            .date_naive()
            .format("%Y-%m-%d")
            .to_string();
        let mut pruned = 0usize;
        for date in self.get_dates()? {
            if date < cutoff {
                if let Err(e) = fs::remove_file(self.day_path(&date)) {
                    warn!(date, error = %e, "failed to prune archive day");
                } else {
                    pruned += 1;
                }
            }
        }
        if pruned > 0 {
            info!(pruned, "pruned expired archive days");
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn archiver(dir: &TempDir) -> Archiver {
        Archiver::new(dir.path(), &ArchiveConfig::default())
    }

    fn stamped(role: &str, text: &str, secs: u32) -> Message {
        Message::new(role, text)
            .with_timestamp(Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, secs).unwrap())
    }

    #[test]
    fn test_archive_round_trip() {
        let dir = TempDir::new().unwrap();
        let a = archiver(&dir);
        a.archive(&[
            stamped("user", "I love sourdough", 0),
            stamped("assistant", "Great bake!", 1),
        ])
        .unwrap();

        let day = a.get_conversation("2025-06-01").unwrap();
        assert_eq!(day.len(), 2);
        assert_eq!(day[0].sender, "user");
        assert_eq!(day[1].text, "Great bake!");
    }

    #[test]
    fn test_archive_idempotent() {
        let dir = TempDir::new().unwrap();
        let a = archiver(&dir);
        let messages = vec![
            stamped("user", "hello", 0),
            stamped("assistant", "hi there", 1),
        ];
        assert_eq!(a.archive(&messages).unwrap(), 2);
        assert_eq!(a.archive(&messages).unwrap(), 0);
        assert_eq!(a.get_conversation("2025-06-01").unwrap().len(), 2);
    }

    #[test]
    fn test_dedup_key_uniqueness() {
        let dir = TempDir::new().unwrap();
        let a = archiver(&dir);
        a.archive(&[stamped("user", "first", 0), stamped("user", "first", 0)])
            .unwrap();
        a.archive(&[stamped("user", "first", 0)]).unwrap();
        let day = a.get_conversation("2025-06-01").unwrap();
        let keys: HashSet<String> = day.iter().map(|m| m.dedup_key()).collect();
        assert_eq!(keys.len(), day.len());
    }

    #[test]
    fn test_messages_sorted_by_timestamp() {
        let dir = TempDir::new().unwrap();
        let a = archiver(&dir);
        a.archive(&[stamped("user", "later", 30)]).unwrap();
        a.archive(&[stamped("user", "earlier", 5)]).unwrap();
        let day = a.get_conversation("2025-06-01").unwrap();
        assert_eq!(day[0].text, "earlier");
        assert_eq!(day[1].text, "later");
    }

    #[test]
    fn test_non_conversation_roles_skipped() {
        let dir = TempDir::new().unwrap();
        let a = archiver(&dir);
        let count = a
            .archive(&[
                stamped("system", "prompt", 0),
                stamped("tool", "result", 1),
            ])
            .unwrap();
        assert_eq!(count, 0);
        assert!(a.get_dates().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_day_file_tolerated() {
        let dir = TempDir::new().unwrap();
        let a = archiver(&dir);
        fs::create_dir_all(a.dir()).unwrap();
        fs::write(a.dir().join("2025-06-01.json"), "{not json").unwrap();
        let written = a.archive(&[stamped("user", "fresh start", 0)]).unwrap();
        assert_eq!(written, 1);
        assert_eq!(a.get_conversation("2025-06-01").unwrap().len(), 1);
    }

    #[test]
    fn test_get_dates_sorted_and_stats() {
        let dir = TempDir::new().unwrap();
        let a = archiver(&dir);
        a.archive(&[
            Message::user("newer").with_timestamp(Utc.with_ymd_and_hms(2025, 6, 3, 8, 0, 0).unwrap()),
            Message::user("older").with_timestamp(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()),
        ])
        .unwrap();
        assert_eq!(a.get_dates().unwrap(), vec!["2025-06-01", "2025-06-03"]);
        let stats = a.get_stats().unwrap();
        assert_eq!(stats.total_days, 2);
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.oldest_date.as_deref(), Some("2025-06-01"));
        assert_eq!(stats.newest_date.as_deref(), Some("2025-06-03"));
    }

    #[test]
    fn test_unindexed_dates() {
        let dir = TempDir::new().unwrap();
        let a = archiver(&dir);
        a.archive(&[
            Message::user("a").with_timestamp(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()),
            Message::user("b").with_timestamp(Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap()),
        ])
        .unwrap();
        let indexed: HashSet<String> = ["2025-06-01".to_string()].into_iter().collect();
        assert_eq!(a.get_unindexed_dates(&indexed).unwrap(), vec!["2025-06-02"]);
    }

    #[test]
    fn test_prune_old() {
        let dir = TempDir::new().unwrap();
        let a = Archiver::new(
            dir.path(),
            &ArchiveConfig {
                retention_days: 7,
                ..Default::default()
            },
        );
        a.archive(&[
            Message::user("ancient").with_timestamp(Utc::now() - chrono::Duration::days(30)),
            Message::user("recent").with_timestamp(Utc::now()),
        ])
        .unwrap();
        assert_eq!(a.prune_old().unwrap(), 1);
        assert_eq!(a.get_dates().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let dir = TempDir::new().unwrap();
        let a = archiver(&dir);
        assert_eq!(a.archive(&[]).unwrap(), 0);
        assert!(a.get_stats().unwrap().total_days == 0);
    }
}
