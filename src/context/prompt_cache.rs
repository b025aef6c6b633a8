//! Process-wide prompt cache, keyed by structure hash + file content hash
//! + conversation id, with TTL expiry and oldest-first eviction once over
//! capacity. Kept purely in memory — nothing in this crate's scope needs
//! cache entries to survive a process restart.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub conversation_id: String,
    pub content_hash: String,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub structure_hash: String,
    pub file_content_hash: String,
    pub conversation_id: String,
    pub file_paths: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub ttl: chrono::Duration,
    pub token_count: u32,
    pub ast_context_hash: Option<String>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.created_at + self.ttl
    }
}

const DEFAULT_TTL_SECS: i64 = 3600;
const MAX_ENTRIES: usize = 1000;
const EVICTION_BATCH: usize = 100;

pub struct PromptCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    default_ttl: chrono::Duration,
}

impl Default for PromptCache {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl: chrono::Duration::seconds(DEFAULT_TTL_SECS),
        }
    }
}

impl PromptCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_hash(structure: &str, file_paths: &[String]) -> String {
        let mut sorted_paths = file_paths.to_vec();
        sorted_paths.sort();
        let mut hasher = Sha256::new();
        hasher.update(structure.as_bytes());
        hasher.update(sorted_paths.join("|").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    pub fn insert(&self, key: CacheKey, mut entry: CacheEntry, now: DateTime<Utc>) {
        if entry.ttl == chrono::Duration::zero() {
            entry.ttl = self.default_ttl;
        }
        let mut entries = self.entries.lock();
        entries.insert(key, entry);
        if entries.len() > MAX_ENTRIES {
            let mut by_age: Vec<(CacheKey, DateTime<Utc>)> = entries
                .iter()
                .map(|(k, v)| (k.clone(), v.created_at))
                .collect();
            by_age.sort_by_key(|(_, created_at)| *created_at);
            for (key, _) in by_age.into_iter().take(EVICTION_BATCH) {
                entries.remove(&key);
            }
        }
        let _ = now;
    }

    pub fn invalidate_conversation(&self, conversation_id: &str) {
        self.entries
            .lock()
            .retain(|key, _| key.conversation_id != conversation_id);
    }

    pub fn invalidate_files(&self, changed_paths: &[String]) {
        self.entries
            .lock()
            .retain(|_, entry| !entry.file_paths.iter().any(|p| changed_paths.contains(p)));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(conversation_id: &str, created_at: DateTime<Utc>, ttl_secs: i64) -> CacheEntry {
        CacheEntry {
            structure_hash: "s".into(),
            file_content_hash: "f".into(),
            conversation_id: conversation_id.to_string(),
            file_paths: vec!["a.rs".into()],
            created_at,
            ttl: chrono::Duration::seconds(ttl_secs),
            token_count: 100,
            ast_context_hash: None,
        }
    }

    #[test]
    fn expired_entries_are_evicted_on_lookup() {
        let cache = PromptCache::new();
        let created_at = Utc::now() - chrono::Duration::seconds(10);
        let key = CacheKey { conversation_id: "c1".into(), content_hash: "h1".into() };
        cache.insert(key.clone(), entry("c1", created_at, 1), created_at);
        assert!(cache.get(&key, Utc::now()).is_none());
    }

    #[test]
    fn fresh_entries_are_returned() {
        let cache = PromptCache::new();
        let now = Utc::now();
        let key = CacheKey { conversation_id: "c1".into(), content_hash: "h1".into() };
        cache.insert(key.clone(), entry("c1", now, 3600), now);
        assert!(cache.get(&key, now).is_some());
    }

    #[test]
    fn invalidate_conversation_removes_only_that_conversation() {
        let cache = PromptCache::new();
        let now = Utc::now();
        let k1 = CacheKey { conversation_id: "c1".into(), content_hash: "h1".into() };
        let k2 = CacheKey { conversation_id: "c2".into(), content_hash: "h2".into() };
        cache.insert(k1.clone(), entry("c1", now, 3600), now);
        cache.insert(k2.clone(), entry("c2", now, 3600), now);
        cache.invalidate_conversation("c1");
        assert!(cache.get(&k1, now).is_none());
        assert!(cache.get(&k2, now).is_some());
    }

    #[test]
    fn invalidate_files_removes_entries_depending_on_changed_path() {
        let cache = PromptCache::new();
        let now = Utc::now();
        let key = CacheKey { conversation_id: "c1".into(), content_hash: "h1".into() };
        cache.insert(key.clone(), entry("c1", now, 3600), now);
        cache.invalidate_files(&["a.rs".to_string()]);
        assert!(cache.get(&key, now).is_none());
    }

    #[test]
    fn over_cap_evicts_oldest_first() {
        let cache = PromptCache::new();
        let base = Utc::now() - chrono::Duration::seconds(2000);
        for i in 0..(MAX_ENTRIES + 1) {
            let created_at = base + chrono::Duration::seconds(i as i64);
            let key = CacheKey {
                conversation_id: "c1".into(),
                content_hash: format!("h{i}"),
            };
            cache.insert(key, entry("c1", created_at, 3600), created_at);
        }
        assert!(cache.len() <= MAX_ENTRIES);
        let oldest_key = CacheKey { conversation_id: "c1".into(), content_hash: "h0".into() };
        assert!(cache.get(&oldest_key, Utc::now()).is_none());
    }

    #[test]
    fn content_hash_is_order_independent_over_file_paths() {
        let a = PromptCache::content_hash("struct", &["b.rs".into(), "a.rs".into()]);
        let b = PromptCache::content_hash("struct", &["a.rs".into(), "b.rs".into()]);
        assert_eq!(a, b);
    }
}
