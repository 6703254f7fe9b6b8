//! L1 (per-session) and L2 (per-repo) suggestion caches (spec.md
//! §4.G). Each tier is a plain `HashMap` guarded by a `tokio::RwLock`,
//! in the same style as the teacher's `LiveSessionMap` — critical
//! sections only ever wrap the map mutation, never the Store call that
//! fills a miss.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use suggestd_rank::RankedSuggestion;

pub const CACHE_TTL_MS_DEFAULT: i64 = 30_000;
pub const CACHE_MEMORY_BUDGET_MB_DEFAULT: u64 = 50;
/// Rough per-entry footprint used for the memory budget estimate: one
/// `RankedSuggestion` plus its key rarely exceeds a couple hundred
/// bytes in practice; this is a conservative round number, not a
/// measured average.
const APPROX_BYTES_PER_ENTRY: u64 = 512;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

pub fn prefix_hash(prefix: &str) -> u64 {
    let hash = blake3::hash(prefix.as_bytes());
    let bytes = hash.as_bytes();
    u64::from_le_bytes(bytes[0..8].try_into().unwrap())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct L1Key {
    pub session_id: String,
    pub last_event_id: i64,
    pub prefix_hash: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct L2Key {
    pub repo_key: String,
    pub prefix_hash: u64,
}

struct Entry {
    suggestions: Arc<Vec<RankedSuggestion>>,
    inserted_ms: i64,
    last_access_ms: i64,
}

/// A TTL+LRU map shared by the L1 and L2 tiers; generic over the key
/// type so both tiers reuse the same eviction logic.
struct TieredMap<K: std::hash::Hash + Eq + Clone> {
    entries: RwLock<HashMap<K, Entry>>,
}

impl<K: std::hash::Hash + Eq + Clone> TieredMap<K> {
    fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    async fn get(&self, key: &K, ttl_ms: i64) -> Option<Arc<Vec<RankedSuggestion>>> {
        let mut entries = self.entries.write().await;
        let now = now_ms();
        let hit = match entries.get_mut(key) {
            Some(entry) if now - entry.inserted_ms <= ttl_ms => {
                entry.last_access_ms = now;
                Some(entry.suggestions.clone())
            }
            Some(_) => None,
            None => None,
        };
        if hit.is_none() {
            entries.remove(key);
        }
        hit
    }

    async fn put(&self, key: K, suggestions: Vec<RankedSuggestion>) {
        let now = now_ms();
        let mut entries = self.entries.write().await;
        entries.insert(key, Entry { suggestions: Arc::new(suggestions), inserted_ms: now, last_access_ms: now });
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Evict the single least-recently-accessed entry. Returns `true`
    /// if something was evicted.
    async fn evict_one_lru(&self) -> bool {
        let mut entries = self.entries.write().await;
        let oldest = entries.iter().min_by_key(|(_, e)| e.last_access_ms).map(|(k, _)| k.clone());
        match oldest {
            Some(k) => {
                entries.remove(&k);
                true
            }
            None => false,
        }
    }

    async fn retain_session(&self, predicate: impl Fn(&K) -> bool) {
        let mut entries = self.entries.write().await;
        entries.retain(|k, _| !predicate(k));
    }
}

/// The cache tiers plus the global eviction budget (spec.md §4.G
/// "Eviction. Global budget ... Under pressure, evict L2 LRU first,
/// then L1 LRU.").
pub struct SuggestionCache {
    l1: TieredMap<L1Key>,
    l2: TieredMap<L2Key>,
    ttl_ms: i64,
    memory_budget_bytes: u64,
}

impl SuggestionCache {
    pub fn new(ttl_ms: i64, memory_budget_mb: u64) -> Self {
        Self {
            l1: TieredMap::new(),
            l2: TieredMap::new(),
            ttl_ms,
            memory_budget_bytes: memory_budget_mb * 1024 * 1024,
        }
    }

    pub async fn get_l1(&self, key: &L1Key) -> Option<Arc<Vec<RankedSuggestion>>> {
        self.l1.get(key, self.ttl_ms).await
    }

    pub async fn get_l2(&self, key: &L2Key) -> Option<Arc<Vec<RankedSuggestion>>> {
        self.l2.get(key, self.ttl_ms).await
    }

    pub async fn put_l1(&self, key: L1Key, suggestions: Vec<RankedSuggestion>) {
        self.enforce_budget().await;
        self.l1.put(key, suggestions).await;
    }

    pub async fn put_l2(&self, key: L2Key, suggestions: Vec<RankedSuggestion>) {
        self.enforce_budget().await;
        self.l2.put(key, suggestions).await;
    }

    /// Drop every L1 entry belonging to `session_id` (spec.md §4.G
    /// invalidation on non-ephemeral `command_end`, I8).
    pub async fn invalidate_session(&self, session_id: &str) {
        self.l1.retain_session(|k| k.session_id == session_id).await;
    }

    /// Drop every L2 entry belonging to `repo_key` (cwd/repo/branch
    /// change; a coarser invalidation than per-session since L2 is
    /// shared across sessions in the same repo).
    pub async fn mark_repo_dirty(&self, repo_key: &str) {
        self.l2.retain_session(|k| k.repo_key == repo_key).await;
    }

    /// Current entry counts, for `DebugStats` (spec.md §6).
    pub async fn l1_len(&self) -> usize {
        self.l1.len().await
    }

    pub async fn l2_len(&self) -> usize {
        self.l2.len().await
    }

    async fn enforce_budget(&self) {
        loop {
            let total_entries = (self.l1.len().await + self.l2.len().await) as u64;
            if total_entries * APPROX_BYTES_PER_ENTRY <= self.memory_budget_bytes {
                return;
            }
            if self.l2.evict_one_lru().await {
                continue;
            }
            if !self.l1.evict_one_lru().await {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use suggestd_candidates::CandidateSource;

    fn suggestion(text: &str) -> RankedSuggestion {
        RankedSuggestion {
            text: text.to_string(),
            cmd_norm: text.to_string(),
            template_id: "t1".into(),
            source: CandidateSource::GlobalTransition,
            score: 1.0,
            confidence: 1.0,
            reasons: vec![],
            risk: false,
            last_seen_ms: 0,
        }
    }

    #[tokio::test]
    async fn put_then_get_returns_entry_within_ttl() {
        let cache = SuggestionCache::new(CACHE_TTL_MS_DEFAULT, CACHE_MEMORY_BUDGET_MB_DEFAULT);
        let key = L1Key { session_id: "s1".into(), last_event_id: 1, prefix_hash: prefix_hash("git") };
        cache.put_l1(key.clone(), vec![suggestion("git add .")]).await;
        let hit = cache.get_l1(&key).await.unwrap();
        assert_eq!(hit[0].text, "git add .");
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let cache = SuggestionCache::new(0, CACHE_MEMORY_BUDGET_MB_DEFAULT);
        let key = L1Key { session_id: "s1".into(), last_event_id: 1, prefix_hash: 0 };
        cache.put_l1(key.clone(), vec![suggestion("git add .")]).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(cache.get_l1(&key).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_session_drops_only_that_sessions_entries() {
        let cache = SuggestionCache::new(CACHE_TTL_MS_DEFAULT, CACHE_MEMORY_BUDGET_MB_DEFAULT);
        let key_a = L1Key { session_id: "a".into(), last_event_id: 1, prefix_hash: 0 };
        let key_b = L1Key { session_id: "b".into(), last_event_id: 1, prefix_hash: 0 };
        cache.put_l1(key_a.clone(), vec![suggestion("a")]).await;
        cache.put_l1(key_b.clone(), vec![suggestion("b")]).await;
        cache.invalidate_session("a").await;
        assert!(cache.get_l1(&key_a).await.is_none());
        assert!(cache.get_l1(&key_b).await.is_some());
    }

    #[tokio::test]
    async fn eviction_prefers_l2_before_l1() {
        let cache = SuggestionCache::new(CACHE_TTL_MS_DEFAULT, 0);
        cache.put_l2(L2Key { repo_key: "r".into(), prefix_hash: 0 }, vec![suggestion("repo")]).await;
        cache.put_l1(L1Key { session_id: "s".into(), last_event_id: 1, prefix_hash: 0 }, vec![suggestion("session")]).await;
        assert!(cache.get_l2(&L2Key { repo_key: "r".into(), prefix_hash: 0 }).await.is_none());
        assert!(cache.get_l1(&L1Key { session_id: "s".into(), last_event_id: 1, prefix_hash: 0 }).await.is_some());
    }
}
