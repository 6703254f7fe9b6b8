//! The ingestion pipeline (spec.md §4.D): single-writer application of
//! validated events against the Store, including the nine-step
//! `apply_command_end` transaction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use suggestd_core::{
    classify_exit_code, declared_dependency_sets, normalize_with_limit, sanitize_secrets, Scope,
    CMD_RAW_MAX_BYTES_DEFAULT,
};
use suggestd_store::aggregates::HALF_LIFE_HOURS_DEFAULT;
use suggestd_store::Store;
use suggestd_types::{EventType, IngestEventRequest};
use tracing::{error, warn};

use crate::burst::{BurstConfig, BurstDecision, BurstObservation, BurstTracker};
use crate::queue::{EventQueue, QueuedEvent, QUEUE_BYTE_BUDGET_DEFAULT, QUEUE_CAPACITY_DEFAULT};

/// Hook the cache layer implements so the ingestion pipeline can
/// invalidate affected entries without ingest depending on the cache
/// crate directly (spec.md §9 "Dynamic dispatch": producers/consumers
/// sit behind a uniform interface rather than a hard-coded dependency).
pub trait SessionCacheInvalidator: Send + Sync {
    fn invalidate_session(&self, session_id: &str);
    fn mark_repo_dirty(&self, repo_key: &str);
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub queue_byte_budget: usize,
    pub burst: BurstConfig,
    pub half_life_hours: f64,
    pub cmd_raw_max_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: QUEUE_CAPACITY_DEFAULT,
            queue_byte_budget: QUEUE_BYTE_BUDGET_DEFAULT,
            burst: BurstConfig::default(),
            half_life_hours: HALF_LIFE_HOURS_DEFAULT,
            cmd_raw_max_bytes: CMD_RAW_MAX_BYTES_DEFAULT,
        }
    }
}

#[derive(Default)]
struct SessionCursor {
    prev_template_id: Option<String>,
    prev_exit_class: Option<suggestd_core::ExitClass>,
}

pub struct Pipeline {
    store: Arc<Store>,
    search_index: Option<Arc<suggestd_search::SearchIndex>>,
    cache_invalidator: Option<Arc<dyn SessionCacheInvalidator>>,
    queue: EventQueue,
    burst: BurstTracker,
    config: PipelineConfig,
    cursors: Mutex<HashMap<String, SessionCursor>>,
    /// Most-recently-seen `BucketInterior` event per session, overwritten
    /// as the bucket grows. Flushed (fully persisted) when the bucket
    /// closes, since only the bucket's true last event needs to survive
    /// burst-mode suppression (spec.md §4.D).
    pending_interior: Mutex<HashMap<String, IngestEventRequest>>,
}

impl Pipeline {
    pub fn new(
        store: Arc<Store>,
        search_index: Option<Arc<suggestd_search::SearchIndex>>,
        cache_invalidator: Option<Arc<dyn SessionCacheInvalidator>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            search_index,
            cache_invalidator,
            queue: EventQueue::new(config.queue_capacity, config.queue_byte_budget),
            burst: BurstTracker::new(config.burst),
            config,
            cursors: Mutex::new(HashMap::new()),
            pending_interior: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue_len(&self) -> u64 {
        self.queue.stats().len as u64
    }

    pub fn drop_count(&self) -> u64 {
        self.queue.stats().drop_count
    }

    pub fn burst_mode_session_count(&self) -> u64 {
        self.burst.burst_session_count()
    }

    /// Enqueue a validated event. Never blocks (fail-open rule, spec.md §5).
    pub fn enqueue(&self, event: IngestEventRequest) {
        let approx_bytes = event.cmd_raw.as_deref().map(str::len).unwrap_or(0) + 128;
        self.queue.push(QueuedEvent {
            session_id: event.session_id.clone(),
            event_type: event.event_type,
            ts_ms: event.ts_ms,
            payload: event,
            approx_bytes,
        });
    }

    /// Drain and apply one event from the queue. Returns `false` when
    /// the queue was empty (caller should back off).
    pub async fn drain_one(&self) -> bool {
        let Some(queued) = self.queue.pop() else {
            return false;
        };
        self.apply(queued).await;
        true
    }

    async fn apply(&self, queued: QueuedEvent) {
        let event = queued.payload;
        match event.event_type {
            EventType::SessionStart => self.apply_session_start(&event).await,
            EventType::SessionEnd => self.apply_session_end(&event).await,
            EventType::CommandEnd => self.apply_command_end(&event).await,
            EventType::CommandStart
            | EventType::SuggestRequest
            | EventType::SuggestFeedback => {
                // Telemetry-only events update in-memory recency via the
                // burst tracker and are never persisted.
                self.burst.observe(&event.session_id, event.ts_ms);
            }
        }
    }

    async fn apply_session_start(&self, event: &IngestEventRequest) {
        let session = suggestd_core::Session::new(
            event.session_id.clone(),
            event.shell.clone(),
            event.ts_ms,
        );
        let session = match &event.cwd {
            cwd if !cwd.is_empty() => session.with_initial_cwd(cwd.clone()),
            _ => session,
        };
        if let Err(e) = self.store.upsert_session(&session).await {
            error!(error = %e, session_id = %event.session_id, "failed to record session_start");
            metrics::counter!("suggestd_ingest_error_total").increment(1);
        }
    }

    async fn apply_session_end(&self, event: &IngestEventRequest) {
        if let Some(pending) = self.take_pending_interior(&event.session_id) {
            self.persist_command_end(&pending).await;
        }
        if let Err(e) = self.store.mark_session_ended(&event.session_id, event.ts_ms).await {
            error!(error = %e, session_id = %event.session_id, "failed to record session_end");
            metrics::counter!("suggestd_ingest_error_total").increment(1);
        }
        self.cursors.lock().expect("cursor mutex poisoned").remove(&event.session_id);
        self.burst.forget_session(&event.session_id);
    }

    fn set_pending_interior(&self, event: IngestEventRequest) {
        self.pending_interior
            .lock()
            .expect("pending interior mutex poisoned")
            .insert(event.session_id.clone(), event);
    }

    fn take_pending_interior(&self, session_id: &str) -> Option<IngestEventRequest> {
        self.pending_interior.lock().expect("pending interior mutex poisoned").remove(session_id)
    }

    /// Burst-mode gate in front of the nine-step apply-`command_end`
    /// transaction (spec.md §4.D). Only the bucket's first and last
    /// events are persisted; interior events are deferred (not dropped)
    /// so the bucket's true last event survives once the bucket closes.
    async fn apply_command_end(&self, event: &IngestEventRequest) {
        if event.ephemeral.unwrap_or(false) {
            // I2: ephemeral events never touch command_event or any
            // aggregate counter, but still feed burst-mode recency.
            self.burst.observe(&event.session_id, event.ts_ms);
            return;
        }

        let BurstObservation { decision, bucket_closed } =
            self.burst.observe(&event.session_id, event.ts_ms);

        if bucket_closed {
            if let Some(pending) = self.take_pending_interior(&event.session_id) {
                self.persist_command_end(&pending).await;
            }
        }

        match decision {
            BurstDecision::BucketInterior => {
                self.set_pending_interior(event.clone());
            }
            BurstDecision::Normal | BurstDecision::BucketFirst => {
                self.persist_command_end(event).await;
            }
        }
    }

    /// The nine-step apply-`command_end` transaction proper: sanitize,
    /// normalize, write through `apply_command_end_tx`, then index and
    /// invalidate caches on success.
    async fn persist_command_end(&self, event: &IngestEventRequest) {
        let cmd_raw = event.cmd_raw.clone().unwrap_or_default();
        let sanitized = sanitize_secrets(&cmd_raw);
        let normalized = normalize_with_limit(&sanitized, self.config.cmd_raw_max_bytes);
        // I4: the stored `cmd_raw` itself must respect the byte cap, not
        // just the template derived from it.
        let bounded_raw = suggestd_core::truncate_at_char_boundary(&sanitized, self.config.cmd_raw_max_bytes).to_string();
        let exit_class = classify_exit_code(event.exit_code);
        let now_ms = event.ts_ms;

        let result = self
            .apply_command_end_tx(event, &bounded_raw, &normalized, exit_class, now_ms)
            .await;

        match result {
            Ok(()) => {
                if let Some(index) = &self.search_index {
                    let doc = suggestd_search::SearchDocument {
                        session_id: event.session_id.clone(),
                        repo_key: event.repo_key.clone().unwrap_or_default(),
                        branch: event.branch.clone().unwrap_or_default(),
                        cmd_raw: bounded_raw.clone(),
                        cmd_norm: normalized.cmd_norm.clone(),
                        ts_ms: now_ms,
                        exit_code: event.exit_code.unwrap_or(-1) as i64,
                    };
                    if let Err(e) = index.index_command(doc).and_then(|_| index.commit()) {
                        warn!(error = %e, "failed to index command_end into search");
                    }
                }

                if let Some(invalidator) = &self.cache_invalidator {
                    invalidator.invalidate_session(&event.session_id);
                    if let Some(repo_key) = &event.repo_key {
                        invalidator.mark_repo_dirty(repo_key);
                    }
                }
            }
            Err(suggestd_store::StoreError::Busy) => {
                warn!(session_id = %event.session_id, "store busy applying command_end, dropping event");
                metrics::counter!("suggestd_ingest_drop_total").increment(1);
            }
            Err(e) => {
                error!(error = %e, session_id = %event.session_id, "failed to apply command_end");
                metrics::counter!("suggestd_ingest_error_total").increment(1);
            }
        }
    }

    async fn apply_command_end_tx(
        &self,
        event: &IngestEventRequest,
        cmd_raw: &str,
        normalized: &suggestd_core::NormalizeResult,
        exit_class: suggestd_core::ExitClass,
        now_ms: i64,
    ) -> Result<(), suggestd_store::StoreError> {
        let mut tx = self.store.pool().begin().await?;

        // 1. Insert the command_event row.
        Store::insert_command_event_tx(
            &mut tx,
            &event.session_id,
            now_ms,
            &event.cwd,
            event.repo_key.as_deref(),
            event.branch.as_deref(),
            cmd_raw,
            &normalized.cmd_norm,
            normalized.cmd_truncated,
            &normalized.template_id,
            event.exit_code,
            event.duration_ms,
        )
        .await?;

        // 2. Upsert command_template.
        Store::upsert_command_template(
            &self.store,
            &normalized.template_id,
            &normalized.cmd_norm,
            normalized.slots.len() as u32,
            now_ms,
        )
        .await?;

        let scopes = applicable_scopes(&event.session_id, event.repo_key.as_deref(), &event.cwd);
        let succeeded = matches!(exit_class, suggestd_core::ExitClass::Success);

        // 3. Update command_stat for all applicable scopes.
        for scope in &scopes {
            Store::upsert_command_stat_tx(
                &mut tx,
                scope,
                &normalized.template_id,
                succeeded,
                now_ms,
                self.config.half_life_hours,
            )
            .await?;
        }

        // 4. Transition from the previous template in this session, if any.
        let prev_template_id = {
            let mut cursors = self.cursors.lock().expect("cursor mutex poisoned");
            let cursor = cursors.entry(event.session_id.clone()).or_default();
            let prev = cursor.prev_template_id.clone();
            let prev_exit_class = cursor.prev_exit_class;
            cursor.prev_template_id = Some(normalized.template_id.clone());
            cursor.prev_exit_class = Some(exit_class);
            (prev, prev_exit_class)
        };
        if let (Some(prev_template_id), _) = &prev_template_id {
            for scope in &scopes {
                Store::upsert_transition_stat_tx(
                    &mut tx,
                    scope,
                    prev_template_id,
                    &normalized.template_id,
                    now_ms,
                    self.config.half_life_hours,
                )
                .await?;
            }
        }

        // 5. Update slot_stat for each extracted slot value.
        for (slot_index, slot) in normalized.slots.iter().enumerate() {
            for scope in &scopes {
                Store::upsert_slot_stat_tx(
                    &mut tx,
                    scope,
                    &normalized.template_id,
                    slot_index as u32,
                    &slot.value,
                    now_ms,
                    self.config.half_life_hours,
                )
                .await?;
            }
        }

        // 6. Update slot_correlation for each declared dependency set.
        for dependency_set in declared_dependency_sets(&normalized.cmd_norm) {
            let values: Vec<&str> = dependency_set
                .iter()
                .filter_map(|&i| normalized.slots.get(i).map(|s| s.value.as_str()))
                .collect();
            if values.len() != dependency_set.len() {
                continue;
            }
            let slot_key = dependency_set
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let tuple_value_json = serde_json::to_string(&values).unwrap_or_default();
            let tuple_hash = blake3::hash(tuple_value_json.as_bytes()).to_hex().to_string();
            for scope in &scopes {
                Store::upsert_slot_correlation_tx(
                    &mut tx,
                    scope,
                    &normalized.template_id,
                    &slot_key,
                    &tuple_hash,
                    &tuple_value_json,
                    now_ms,
                    self.config.half_life_hours,
                )
                .await?;
            }
        }

        // 7. If the previous command_end failed, upsert failure_recovery.
        if let (Some(prev_template_id), Some(prev_exit_class)) = prev_template_id {
            if !matches!(prev_exit_class, suggestd_core::ExitClass::Success) {
                for scope in &scopes {
                    Store::upsert_failure_recovery_tx(
                        &mut tx,
                        scope,
                        &prev_template_id,
                        prev_exit_class.as_str(),
                        &normalized.template_id,
                        succeeded,
                        now_ms,
                    )
                    .await?;
                }
            }
        }

        tx.commit().await?;

        // 8 and 9 (cache invalidation, weight-profile refresh scheduling)
        // happen in the caller after the transaction commits, and in the
        // maintenance task respectively.
        Ok(())
    }
}

/// Scopes a command_end applies to: global, session, repo (if any), dir
/// (spec.md §4.D step 3).
fn applicable_scopes(session_id: &str, repo_key: Option<&str>, cwd: &str) -> Vec<String> {
    let mut scopes = vec![Scope::Global.as_key(), Scope::Session(session_id.to_string()).as_key()];
    if let Some(repo_key) = repo_key {
        scopes.push(Scope::Repo(repo_key.to_string()).as_key());
    }
    if !cwd.is_empty() {
        scopes.push(Scope::Dir(cwd.to_string()).as_key());
    }
    scopes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(session_id: &str, cmd_raw: &str, exit_code: i32, ts_ms: i64) -> IngestEventRequest {
        IngestEventRequest {
            event_type: EventType::CommandEnd,
            session_id: session_id.to_string(),
            shell: "zsh".into(),
            ts_ms,
            cwd: "/repo".into(),
            cmd_raw: Some(cmd_raw.to_string()),
            cmd_truncated: Some(false),
            exit_code: Some(exit_code),
            duration_ms: Some(5),
            ephemeral: Some(false),
            repo_key: Some("clai/suggestd".into()),
            branch: Some("main".into()),
        }
    }

    #[tokio::test]
    async fn apply_command_end_persists_event_and_stats() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let pipeline = Pipeline::new(store.clone(), None, None, PipelineConfig::default());

        pipeline.apply_command_end(&event("s1", "git status", 0, 1000)).await;

        let stats = store.list_command_stats(&Scope::Global.as_key()).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].success_count, 1);
    }

    #[tokio::test]
    async fn ephemeral_events_never_touch_the_store() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let pipeline = Pipeline::new(store.clone(), None, None, PipelineConfig::default());

        let mut ephemeral_event = event("s1", "echo secret", 0, 1000);
        ephemeral_event.ephemeral = Some(true);
        pipeline.apply_command_end(&ephemeral_event).await;

        let stats = store.list_command_stats(&Scope::Global.as_key()).await.unwrap();
        assert!(stats.is_empty());
    }

    #[tokio::test]
    async fn second_command_records_transition_from_first() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let pipeline = Pipeline::new(store.clone(), None, None, PipelineConfig::default());

        pipeline.apply_command_end(&event("s1", "git status", 0, 1000)).await;
        pipeline.apply_command_end(&event("s1", "git add .", 0, 2000)).await;

        let git_status_template = suggestd_core::stable_template_id(
            &suggestd_core::normalize("git status").cmd_norm,
        );
        let transitions = store
            .list_transitions_from(&Scope::Global.as_key(), &git_status_template, 10)
            .await
            .unwrap();
        assert_eq!(transitions.len(), 1);
    }

    #[tokio::test]
    async fn failure_then_success_records_recovery_edge() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let pipeline = Pipeline::new(store.clone(), None, None, PipelineConfig::default());

        pipeline.apply_command_end(&event("s1", "pytest", 1, 1000)).await;
        pipeline.apply_command_end(&event("s1", "pytest -x", 0, 2000)).await;

        let pytest_template = suggestd_core::stable_template_id(
            &suggestd_core::normalize("pytest").cmd_norm,
        );
        let edges = store
            .list_failure_recovery(
                &Scope::Global.as_key(),
                &pytest_template,
                suggestd_core::ExitClass::GenericError.as_str(),
                false,
            )
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].success_rate, 1.0);
    }

    #[tokio::test]
    async fn burst_bucket_flushes_true_last_event_on_quiet_close() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let burst = BurstConfig { events_threshold: 1, window_ms: 100, quiet_ms: 50 };
        let config = PipelineConfig { burst, ..PipelineConfig::default() };
        let pipeline = Pipeline::new(store.clone(), None, None, config);

        // First two events: first is BucketFirst, second is BucketInterior
        // and deferred rather than persisted.
        pipeline.apply_command_end(&event("s1", "git status", 0, 0)).await;
        pipeline.apply_command_end(&event("s1", "git add .", 0, 1)).await;

        let git_status_template =
            suggestd_core::stable_template_id(&suggestd_core::normalize("git status").cmd_norm);
        let add_template =
            suggestd_core::stable_template_id(&suggestd_core::normalize("git add .").cmd_norm);

        // The deferred "git add ." hasn't been persisted yet.
        let stats = store.list_command_stats(&Scope::Global.as_key()).await.unwrap();
        assert!(stats.iter().any(|s| s.template_id == git_status_template));
        assert!(!stats.iter().any(|s| s.template_id == add_template));

        // A later event past the quiet period closes the bucket and
        // flushes the deferred event before handling the new one.
        pipeline.apply_command_end(&event("s1", "ls", 0, 1000)).await;

        let stats = store.list_command_stats(&Scope::Global.as_key()).await.unwrap();
        assert!(stats.iter().any(|s| s.template_id == add_template), "deferred bucket-last event was dropped");

        // The cursor now reflects "git add ." as the predecessor, not
        // "git status" (the bucket's first event), so the transition
        // recorded for "ls" is from the true last command of the burst.
        let transitions = store
            .list_transitions_from(&Scope::Global.as_key(), &add_template, 10)
            .await
            .unwrap();
        assert_eq!(transitions.len(), 1, "cursor should advance past the bucket's first event");
    }

    #[tokio::test]
    async fn queue_tracks_length_and_drains() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let pipeline = Pipeline::new(store, None, None, PipelineConfig::default());
        pipeline.enqueue(event("s1", "ls", 0, 1000));
        assert_eq!(pipeline.queue_len(), 1);
        assert!(pipeline.drain_one().await);
        assert_eq!(pipeline.queue_len(), 0);
        assert!(!pipeline.drain_one().await);
    }
}
