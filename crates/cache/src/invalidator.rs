//! Implements the ingestion pipeline's `SessionCacheInvalidator` hook
//! (spec.md §9 dynamic-dispatch producer pattern) against the
//! `SuggestionCache`, so `suggestd-ingest` never depends on this crate
//! directly.

use std::sync::Arc;

use suggestd_ingest::SessionCacheInvalidator;

use crate::tiers::SuggestionCache;

pub struct CacheInvalidator {
    cache: Arc<SuggestionCache>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<SuggestionCache>) -> Self {
        Self { cache }
    }
}

impl SessionCacheInvalidator for CacheInvalidator {
    fn invalidate_session(&self, session_id: &str) {
        let cache = self.cache.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            cache.invalidate_session(&session_id).await;
        });
    }

    fn mark_repo_dirty(&self, repo_key: &str) {
        let cache = self.cache.clone();
        let repo_key = repo_key.to_string();
        tokio::spawn(async move {
            cache.mark_repo_dirty(&repo_key).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::{L1Key, CACHE_MEMORY_BUDGET_MB_DEFAULT, CACHE_TTL_MS_DEFAULT};
    use suggestd_candidates::CandidateSource;
    use suggestd_rank::RankedSuggestion;

    fn suggestion() -> RankedSuggestion {
        RankedSuggestion {
            text: "git status".into(),
            cmd_norm: "git status".into(),
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
    async fn invalidate_session_removes_entry_asynchronously() {
        let cache = Arc::new(SuggestionCache::new(CACHE_TTL_MS_DEFAULT, CACHE_MEMORY_BUDGET_MB_DEFAULT));
        let key = L1Key { session_id: "s1".into(), last_event_id: 1, prefix_hash: 0 };
        cache.put_l1(key.clone(), vec![suggestion()]).await;

        let invalidator = CacheInvalidator::new(cache.clone());
        invalidator.invalidate_session("s1");
        // Yield so the spawned invalidation task runs before we assert.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(cache.get_l1(&key).await.is_none());
    }
}
