//! File-backed memory store — one bounded JSON log per agent

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::entry::{EntryKind, MemoryEntry};
use crate::error::{MemoryError, Result};
use crate::export::ExportFormat;

/// Number of entries retained per agent unless configured otherwise
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

const LOG_EXTENSION: &str = "json";

/// Summary counts for one agent's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub agent: String,
    pub total_entries: usize,
    pub task_inputs: usize,
    pub task_results: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Append-only, size-bounded memory log per agent identity.
///
/// Writers to the same agent are serialized through a per-agent lock; the
/// read-modify-write of one log never interleaves with another writer of that
/// log, while different agents proceed independently. Every write lands in a
/// temporary sibling file first and is then renamed over the log, so readers
/// see either the previous or the new contents.
pub struct MemoryStore {
    dir: PathBuf,
    max_entries: usize,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MemoryStore {
    pub fn new(dir: impl Into<PathBuf>, max_entries: usize) -> Self {
        let dir = dir.into();
        info!(
            "Memory store at {} (max {} entries per agent)",
            dir.display(),
            max_entries
        );
        Self {
            dir,
            max_entries: max_entries.max(1),
            locks: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Append an entry to its agent's log, returning the log length afterwards
    pub async fn append(&self, entry: MemoryEntry) -> Result<usize> {
        let agent = entry.agent().to_string();
        let lock = self.lock_for(&agent);
        let _guard = lock.lock().await;

        let mut log = self.load(&agent).await;
        debug!("Appending entry {} for agent '{}'", entry.id(), agent);
        log.push(entry);
        if log.len() > self.max_entries {
            let excess = log.len() - self.max_entries;
            log.drain(..excess);
            debug!("Evicted {} oldest entries for agent '{}'", excess, agent);
        }

        self.persist(&agent, &log).await?;
        Ok(log.len())
    }

    /// Record a task input for `agent`
    pub async fn append_input(
        &self,
        agent: &str,
        input_text: &str,
        context: Value,
    ) -> Result<MemoryEntry> {
        let entry = MemoryEntry::input(agent, input_text, context);
        self.append(entry.clone()).await?;
        Ok(entry)
    }

    /// Record a task result for `agent`
    pub async fn append_result(
        &self,
        agent: &str,
        task_id: &str,
        result: Value,
        metadata: Value,
    ) -> Result<MemoryEntry> {
        let entry = MemoryEntry::result(agent, task_id, result, metadata);
        self.append(entry.clone()).await?;
        Ok(entry)
    }

    /// Replay an agent's log, oldest first.
    ///
    /// `kind` restricts the variant; `limit` keeps the most recent N after
    /// filtering (`None` or `Some(0)` returns everything).
    pub async fn recall(
        &self,
        agent: &str,
        limit: Option<usize>,
        kind: Option<EntryKind>,
    ) -> Vec<MemoryEntry> {
        let mut log = self.load(agent).await;
        if let Some(kind) = kind {
            log.retain(|e| e.kind() == kind);
        }
        keep_last(log, limit.unwrap_or(0))
    }

    /// Entries whose input or result contains `query` (case-insensitive).
    /// Returns the most recent `limit` matches in original order; 0 means all.
    pub async fn search(&self, agent: &str, query: &str, limit: usize) -> Vec<MemoryEntry> {
        let needle = query.to_lowercase();
        let matches: Vec<MemoryEntry> = self
            .load(agent)
            .await
            .into_iter()
            .filter(|e| e.matches(&needle))
            .collect();
        keep_last(matches, limit)
    }

    pub async fn count(&self, agent: &str) -> usize {
        self.load(agent).await.len()
    }

    pub async fn stats(&self, agent: &str) -> MemoryStats {
        let log = self.load(agent).await;
        let task_inputs = log
            .iter()
            .filter(|e| e.kind() == EntryKind::TaskInput)
            .count();
        MemoryStats {
            agent: agent.to_string(),
            total_entries: log.len(),
            task_inputs,
            task_results: log.len() - task_inputs,
            oldest_entry: log.first().map(MemoryEntry::timestamp),
            newest_entry: log.last().map(MemoryEntry::timestamp),
        }
    }

    /// Stats for every agent that has a non-empty log on disk
    pub async fn all_stats(&self) -> Result<BTreeMap<String, MemoryStats>> {
        let mut stats = BTreeMap::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(MemoryError::io(&self.dir, e)),
        };

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| MemoryError::io(&self.dir, e))?
        {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            let Some(agent) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_agent)
            else {
                debug!("Skipping foreign file {} in memory dir", path.display());
                continue;
            };
            let agent_stats = self.stats(&agent).await;
            if agent_stats.total_entries > 0 {
                stats.insert(agent, agent_stats);
            }
        }
        Ok(stats)
    }

    /// Delete an agent's entire log. Does nothing unless `confirm` is set.
    ///
    /// Returns whether the clear was carried out.
    pub async fn clear(&self, agent: &str, confirm: bool) -> Result<bool> {
        if !confirm {
            debug!("Clear of '{}' memory skipped (not confirmed)", agent);
            return Ok(false);
        }

        let lock = self.lock_for(agent);
        let _guard = lock.lock().await;

        let path = self.log_path(agent);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("Cleared memory for agent '{}'", agent),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(MemoryError::io(path, e)),
        }
        Ok(true)
    }

    /// Serialize the full log for `agent` in the requested format
    pub async fn export(&self, agent: &str, format: ExportFormat) -> Result<String> {
        let log = self.load(agent).await;
        format.render(&log)
    }

    /// Locks are keyed by file stem so that every writer of one file shares a lock
    fn lock_for(&self, agent: &str) -> Arc<Mutex<()>> {
        self.locks.entry(encode_agent(agent)).or_default().clone()
    }

    fn log_path(&self, agent: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_agent(agent), LOG_EXTENSION))
    }

    /// Read an agent's log. Missing files are empty logs; unreadable or
    /// malformed files are reported and treated as empty.
    async fn load(&self, agent: &str) -> Vec<MemoryEntry> {
        let path = self.log_path(agent);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(
                    "Unreadable memory log for agent '{}' at {}: {}; starting fresh",
                    agent,
                    path.display(),
                    e
                );
                return Vec::new();
            }
        };

        if raw.trim().is_empty() {
            return Vec::new();
        }

        match serde_json::from_str::<Vec<MemoryEntry>>(&raw) {
            Ok(log) => log,
            Err(e) => {
                warn!(
                    "Corrupted memory log for agent '{}' at {}: {}; starting fresh",
                    agent,
                    path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    async fn persist(&self, agent: &str, log: &[MemoryEntry]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| MemoryError::io(&self.dir, e))?;

        let path = self.log_path(agent);
        let tmp = path.with_extension(format!("{}.tmp", LOG_EXTENSION));
        let body = serde_json::to_vec_pretty(log)?;

        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| MemoryError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| MemoryError::io(&path, e))?;

        debug!("Persisted {} entries for agent '{}'", log.len(), agent);
        Ok(())
    }
}

fn keep_last(mut entries: Vec<MemoryEntry>, limit: usize) -> Vec<MemoryEntry> {
    if limit > 0 && entries.len() > limit {
        entries.drain(..entries.len() - limit);
    }
    entries
}

/// Map an agent identity onto a file stem, one stem per identity.
///
/// ASCII letters, digits, `-` and `_` pass through; every other byte becomes
/// `%XX`. The empty identity is the lone `%`, which no other identity encodes to.
fn encode_agent(agent: &str) -> String {
    if agent.is_empty() {
        return "%".to_string();
    }
    let mut stem = String::with_capacity(agent.len());
    for byte in agent.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

/// Inverse of [`encode_agent`]; `None` for stems it could not have produced
fn decode_agent(stem: &str) -> Option<String> {
    if stem == "%" {
        return Some(String::new());
    }
    let bytes = stem.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = stem.get(i + 1..i + 3)?;
                decoded.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' => {
                decoded.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(max: usize) -> (TempDir, MemoryStore) {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path().join("memory"), max);
        (dir, store)
    }

    #[tokio::test]
    async fn test_append_and_recall_in_order() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        store.append_input("builder", "first", Value::Null).await.unwrap();
        store.append_input("builder", "second", Value::Null).await.unwrap();

        let log = store.recall("builder", None, None).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].input_text(), "first");
        assert_eq!(log[1].input_text(), "second");
    }

    #[tokio::test]
    async fn test_bound_keeps_most_recent_entries() {
        let (_dir, store) = store(10);
        for i in 0..25 {
            store
                .append_input("builder", &format!("task {i}"), Value::Null)
                .await
                .unwrap();
        }
        let log = store.recall("builder", None, None).await;
        assert_eq!(log.len(), 10);
        let texts: Vec<String> = log.iter().map(|e| e.input_text()).collect();
        let expected: Vec<String> = (15..25).map(|i| format!("task {i}")).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn test_default_bound() {
        assert_eq!(DEFAULT_MAX_ENTRIES, 1000);
    }

    #[tokio::test]
    async fn test_logs_are_isolated_per_agent() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        store.append_input("builder", "build", Value::Null).await.unwrap();
        store.append_input("scribe", "write", Value::Null).await.unwrap();

        let builder = store.recall("builder", None, None).await;
        assert_eq!(builder.len(), 1);
        assert!(builder.iter().all(|e| e.agent() == "builder"));
        assert_eq!(store.count("scribe").await, 1);
    }

    #[tokio::test]
    async fn test_recall_filter_and_limit() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        for i in 0..4 {
            store
                .append_input("builder", &format!("in {i}"), Value::Null)
                .await
                .unwrap();
            store
                .append_result("builder", &format!("t{i}"), json!(format!("out {i}")), Value::Null)
                .await
                .unwrap();
        }

        let results = store
            .recall("builder", None, Some(EntryKind::TaskResult))
            .await;
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|e| e.kind() == EntryKind::TaskResult));

        let last_two = store
            .recall("builder", Some(2), Some(EntryKind::TaskInput))
            .await;
        let texts: Vec<String> = last_two.iter().map(|e| e.input_text()).collect();
        assert_eq!(texts, vec!["in 2", "in 3"]);

        assert_eq!(store.recall("builder", Some(0), None).await.len(), 8);
    }

    #[tokio::test]
    async fn test_appended_entry_is_recalled_by_variant() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        let entry = store
            .append_result("integrator", "t9", json!({"ok": true}), json!({"confidence": 1.0}))
            .await
            .unwrap();
        let results = store
            .recall("integrator", None, Some(EntryKind::TaskResult))
            .await;
        assert!(results.contains(&entry));
    }

    #[tokio::test]
    async fn test_search_matches_input_and_result() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        store.append_input("builder", "Build the REPORT", Value::Null).await.unwrap();
        store
            .append_result("builder", "t1", json!("report generated"), Value::Null)
            .await
            .unwrap();
        store.append_input("builder", "unrelated", Value::Null).await.unwrap();

        let hits = store.search("builder", "report", 10).await;
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|e| e.matches("report")));

        let last = store.search("builder", "report", 1).await;
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].kind(), EntryKind::TaskResult);

        assert!(store.search("builder", "nothing-here", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_log_is_treated_as_empty() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        tokio::fs::create_dir_all(store.dir()).await.unwrap();
        tokio::fs::write(store.dir().join("builder.json"), "{not json")
            .await
            .unwrap();

        assert!(store.recall("builder", None, None).await.is_empty());

        // Writes start a fresh log
        store.append_input("builder", "fresh", Value::Null).await.unwrap();
        let log = store.recall("builder", None, None).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].input_text(), "fresh");
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        store.append_input("builder", "x", Value::Null).await.unwrap();
        assert!(store.dir().join("builder.json").exists());
        assert!(!store.dir().join("builder.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_clear_requires_confirmation() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        store.append_input("builder", "keep", Value::Null).await.unwrap();
        store.append_input("scribe", "keep too", Value::Null).await.unwrap();

        assert!(!store.clear("builder", false).await.unwrap());
        assert_eq!(store.count("builder").await, 1);

        assert!(store.clear("builder", true).await.unwrap());
        assert_eq!(store.count("builder").await, 0);
        assert_eq!(store.count("scribe").await, 1);

        // Clearing an absent log is fine
        assert!(store.clear("nobody", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_single_and_all() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        store.append_input("builder", "a", Value::Null).await.unwrap();
        store
            .append_result("builder", "t1", json!("b"), Value::Null)
            .await
            .unwrap();
        store.append_input("scribe", "c", Value::Null).await.unwrap();

        let stats = store.stats("builder").await;
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.task_inputs, 1);
        assert_eq!(stats.task_results, 1);
        assert!(stats.oldest_entry.unwrap() <= stats.newest_entry.unwrap());

        let empty = store.stats("nobody").await;
        assert_eq!(empty.total_entries, 0);
        assert!(empty.oldest_entry.is_none());

        store.clear("scribe", true).await.unwrap();
        let all = store.all_stats().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("builder"));
    }

    #[tokio::test]
    async fn test_all_stats_without_directory() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        assert!(store.all_stats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_formats() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        store.append_input("scribe", "write, then review", Value::Null).await.unwrap();

        let json = store.export("scribe", ExportFormat::Json).await.unwrap();
        let parsed: Vec<MemoryEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);

        let csv = store.export("scribe", ExportFormat::Csv).await.unwrap();
        assert!(csv.starts_with("timestamp,type,input,result,agent"));
        assert!(csv.contains("\"write, then review\""));
    }

    #[tokio::test]
    async fn test_concurrent_appends_to_one_agent_are_not_lost() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_input("builder", &format!("task {i}"), Value::Null)
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.count("builder").await, 20);
    }

    #[test]
    fn test_encode_agent() {
        assert_eq!(encode_agent("builder"), "builder");
        assert_eq!(encode_agent("data_eng"), "data_eng");
        assert_eq!(encode_agent("data.eng"), "data%2Eeng");
        assert_eq!(encode_agent("../etc/passwd"), "%2E%2E%2Fetc%2Fpasswd");
        assert_eq!(encode_agent(""), "%");
        for agent in ["builder", "data.eng", "a b/c", "", "%41", "caf\u{e9}"] {
            assert_eq!(decode_agent(&encode_agent(agent)).as_deref(), Some(agent));
        }
        assert!(decode_agent("notes.bak").is_none());
        assert!(decode_agent("bad%4").is_none());
    }

    #[tokio::test]
    async fn test_similar_identities_do_not_share_a_log() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        store.append_input("data.eng", "dotted", Value::Null).await.unwrap();
        store.append_input("data_eng", "underscored", Value::Null).await.unwrap();
        store.append_input("data/eng", "slashed", Value::Null).await.unwrap();

        let log = store.recall("data_eng", None, None).await;
        assert_eq!(log.len(), 1);
        assert!(log.iter().all(|e| e.agent() == "data_eng"));
        assert_eq!(log[0].input_text(), "underscored");

        let dotted = store.recall("data.eng", None, None).await;
        assert_eq!(dotted.len(), 1);
        assert_eq!(dotted[0].agent(), "data.eng");

        let all = store.all_stats().await.unwrap();
        let agents: Vec<&str> = all.keys().map(String::as_str).collect();
        assert_eq!(agents, vec!["data.eng", "data/eng", "data_eng"]);
    }

    #[tokio::test]
    async fn test_default_bound_keeps_last_thousand_in_order() {
        let (_dir, store) = store(DEFAULT_MAX_ENTRIES);
        let total = DEFAULT_MAX_ENTRIES + 5;
        for i in 0..total {
            store
                .append_input("builder", &format!("task {i}"), Value::Null)
                .await
                .unwrap();
        }
        assert_eq!(store.max_entries(), DEFAULT_MAX_ENTRIES);

        let log = store.recall("builder", None, None).await;
        assert_eq!(log.len(), DEFAULT_MAX_ENTRIES);
        let texts: Vec<String> = log.iter().map(|e| e.input_text()).collect();
        let expected: Vec<String> = (5..total).map(|i| format!("task {i}")).collect();
        assert_eq!(texts, expected);
    }
}
