//! Shared daemon state: the handles every connection's request
//! dispatch needs. Grounded in the teacher's `AppState` (`state.rs`) —
//! one `Arc`-wrapped struct built once at startup and cloned per
//! connection, rather than a global.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use suggestd_cache::{CacheInvalidator, SuggestionCache};
use suggestd_ingest::Pipeline;
use suggestd_search::SearchIndex;
use suggestd_store::Store;

use crate::config::Config;

pub struct AppState {
    pub store: Arc<Store>,
    pub pipeline: Arc<Pipeline>,
    pub cache: Arc<SuggestionCache>,
    pub search_index: Option<Arc<SearchIndex>>,
    config: RwLock<Config>,
    started_at: Instant,
    requests_served: AtomicU64,
    draining: AtomicBool,
}

impl AppState {
    pub fn new(
        store: Arc<Store>,
        pipeline: Arc<Pipeline>,
        cache: Arc<SuggestionCache>,
        search_index: Option<Arc<SearchIndex>>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            pipeline,
            cache,
            search_index,
            config: RwLock::new(config),
            started_at: Instant::now(),
            requests_served: AtomicU64::new(0),
            draining: AtomicBool::new(false),
        })
    }

    pub fn record_request(&self) {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Cheap clone of the live config, taken under a brief read lock.
    /// Request handlers call this once per request rather than holding
    /// the lock for the request's duration.
    pub fn config_snapshot(&self) -> Config {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Applies a freshly re-read config's weights/timeouts (spec.md §5
    /// "Reload signal") without dropping the listener.
    pub fn reload_config(&self, fresh: Config) {
        self.config.write().expect("config lock poisoned").apply_reload(fresh);
    }

    /// Set on an upgrade signal (spec.md §5 "Upgrade signal"); checked by
    /// `ops::ingest_event` to stop accepting new ingest frames while the
    /// pipeline drains for handoff.
    pub fn begin_draining(&self) {
        self.draining.store(true, Ordering::Relaxed);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    pub fn cache_invalidator(cache: Arc<SuggestionCache>) -> Arc<dyn suggestd_ingest::SessionCacheInvalidator> {
        Arc::new(CacheInvalidator::new(cache))
    }
}
