//! The five daemon operation handlers (spec.md §6), one function per
//! `Request` variant. Each takes the shared `AppState` and the typed
//! request payload and returns the typed response `ipc.rs` wraps in
//! an `Envelope`. Grounded in the teacher's `routes/*.rs` handlers:
//! thin functions that do one lookup/mutation and map store types onto
//! wire DTOs, with no framework glue of their own.

use std::time::Instant;

use suggestd_candidates::retrieval::RetrievalContext;
use suggestd_candidates::retrieve_candidates;
use suggestd_cache::feedback::{features_for_pair, learn_from_feedback, record_feedback as cache_record_feedback};
use suggestd_cache::{prefix_hash, L1Key, L2Key};
use suggestd_core::{classify_exit_code, stable_template_id, normalize, RankWeightProfile, Scope};
use suggestd_rank::{rank, RankRequest, SlotFillConfig};
use suggestd_search::fallback::{substring_scan, ScanRow};
use suggestd_types::{
    CacheStatus, DebugStatsResponse, FeedbackActionDto, IngestEventRequest, RecordFeedbackRequest,
    SearchBackend, SearchMode, SearchRequest, SearchResponse, SearchResultDto, SuggestRequest,
    SuggestResponse, SuggestionDto,
};

use crate::error::{DaemonError, DaemonResult};
use crate::state::AppState;

/// Drops the event instead of enqueueing it once the daemon has begun
/// draining for an upgrade handoff (spec.md §5 "Upgrade signal"), mirroring
/// the fail-open rule the shell side already applies on its side.
pub fn ingest_event(state: &AppState, event: IngestEventRequest) {
    if state.is_draining() {
        return;
    }
    state.pipeline.enqueue(event);
}

fn feedback_action_from_dto(dto: FeedbackActionDto) -> suggestd_core::FeedbackAction {
    use suggestd_core::FeedbackAction as Core;
    match dto {
        FeedbackActionDto::Accepted => Core::Accepted,
        FeedbackActionDto::Dismissed => Core::Dismissed,
        FeedbackActionDto::EditedThenRun => Core::EditedThenRun,
        FeedbackActionDto::IgnoredTimeout => Core::IgnoredTimeout,
        FeedbackActionDto::Never => Core::Never,
        FeedbackActionDto::Unblock => Core::Unblock,
    }
}

/// Best-effort wait for the ingestion pipeline to have applied the
/// `command_end` the shell helper already observed, before retrieving
/// candidates (spec.md §4.E's ingestion-suggest race). Gives up after
/// `wait_budget_ms` regardless of whether the expected template has
/// landed, since retrieval must never block indefinitely on ingest.
async fn wait_for_expected_template(
    state: &AppState,
    session_id: &str,
    expected_template_id: Option<&str>,
    wait_budget_ms: u64,
) {
    let Some(expected) = expected_template_id else {
        return;
    };
    let step = std::time::Duration::from_millis(1);
    let mut waited = std::time::Duration::ZERO;
    let budget = std::time::Duration::from_millis(wait_budget_ms);
    loop {
        match state.store.get_last_command_event(session_id).await {
            Ok(Some(ev)) if ev.template_id == expected => return,
            _ => {}
        }
        if waited >= budget {
            return;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
}

pub async fn suggest(state: &AppState, req: SuggestRequest, now_ms: i64) -> DaemonResult<SuggestResponse> {
    let start = Instant::now();
    let config = state.config_snapshot();

    let expected_template_id = req.last_cmd_norm.as_deref().map(stable_template_id);
    wait_for_expected_template(state, &req.session_id, expected_template_id.as_deref(), config.ingest_sync_wait_ms).await;

    let last_event = state.store.get_last_command_event(&req.session_id).await?;

    let mut ctx = RetrievalContext::new(req.session_id.clone(), req.cwd.clone());
    ctx.repo_key = req.repo_key.clone().or_else(|| last_event.as_ref().and_then(|e| e.repo_key.clone()));
    ctx.prefix = req.prefix.clone();
    ctx.per_source_cap = suggestd_candidates::retrieval::PER_SOURCE_CAP_DEFAULT;
    ctx.pool_cap = config.pool_cap;
    ctx.fuzzy_max_edits = config.fuzzy_max_edits;
    if let Some(ev) = &last_event {
        ctx.prev_template_id = Some(ev.template_id.clone());
        ctx.last_template_id = Some(ev.template_id.clone());
        ctx.last_exit_code_class = Some(classify_exit_code(ev.exit_code).as_str().to_string());
    }

    let prefix_h = prefix_hash(&req.prefix);
    let l1_key = L1Key {
        session_id: req.session_id.clone(),
        last_event_id: last_event.as_ref().map(|e| e.id).unwrap_or(0),
        prefix_hash: prefix_h,
    };
    if let Some(hit) = state.cache.get_l1(&l1_key).await {
        metrics::counter!("suggestd_cache_hit_total").increment(1);
        return Ok(build_response(&hit, CacheStatus::Hit, start));
    }

    let l2_key = ctx.repo_key.as_ref().map(|repo_key| L2Key { repo_key: repo_key.clone(), prefix_hash: prefix_h });
    if let Some(key) = &l2_key {
        if let Some(hit) = state.cache.get_l2(key).await {
            metrics::counter!("suggestd_cache_hit_total").increment(1);
            state.cache.put_l1(l1_key.clone(), hit.as_ref().clone()).await;
            return Ok(build_response(&hit, CacheStatus::Hit, start));
        }
    }
    metrics::counter!("suggestd_cache_miss_total").increment(1);

    let pool = retrieve_candidates(&state.store, &ctx).await?;

    let weights = state
        .store
        .get_rank_weight_profile("global")
        .await?
        .unwrap_or_else(|| RankWeightProfile::defaults("global"));

    let mut scope_chain = vec![Scope::Session(req.session_id.clone()).as_key()];
    if let Some(repo_key) = &ctx.repo_key {
        scope_chain.push(Scope::Repo(repo_key.clone()).as_key());
    }
    scope_chain.push(Scope::Global.as_key());

    let rank_req = RankRequest {
        prefix: &req.prefix,
        typo_trigger_active: ctx.typo_trigger_active(),
        fuzzy_max_edits: ctx.fuzzy_max_edits,
        now_ms,
        half_life_hours: config.half_life_hours,
        context_template_id: ctx.last_template_id.as_deref(),
        scope_chain: &scope_chain,
        min_confidence: config.min_confidence,
        include_low_confidence: req.include_low_confidence,
        limit: req.limit as usize,
        slot_fill: SlotFillConfig::default(),
    };

    let ranked = rank(&state.store, pool, &weights, &rank_req).await?;

    state.cache.put_l1(l1_key, ranked.clone()).await;
    if let Some(key) = l2_key {
        state.cache.put_l2(key, ranked.clone()).await;
    }

    let deadline_ms = config.retrieval_deadline_ms + config.ranking_deadline_ms;
    let status = if start.elapsed().as_millis() as u64 > deadline_ms {
        CacheStatus::DeadlineFallback
    } else {
        CacheStatus::Miss
    };
    Ok(build_response(&ranked, status, start))
}

fn build_response(ranked: &[suggestd_rank::RankedSuggestion], status: CacheStatus, start: Instant) -> SuggestResponse {
    SuggestResponse {
        suggestions: ranked
            .iter()
            .map(|r| SuggestionDto {
                text: r.text.clone(),
                cmd_norm: r.cmd_norm.clone(),
                source: r.source.as_str().to_string(),
                score: r.score,
                confidence: r.confidence,
                reasons: r.reasons.clone(),
                risk: r.risk.then(|| suggestd_core::RiskTag::Destructive.as_str().to_string()),
            })
            .collect(),
        cache_status: status,
        latency_ms: start.elapsed().as_millis() as u64,
    }
}

fn scope_qualifier(req: &SearchRequest) -> Option<String> {
    match req.scope.as_str() {
        "session" => req.session_id.as_deref().map(|id| format!("session:{id}")),
        "repo" => req.repo_key.as_deref().map(|key| format!("repo:{key}")),
        _ => None,
    }
}

pub async fn search(state: &AppState, req: SearchRequest) -> DaemonResult<SearchResponse> {
    let start = Instant::now();
    let qualifier = scope_qualifier(&req);

    if req.mode == SearchMode::Fts {
        if let Some(index) = &state.search_index {
            match suggestd_search::query::search(index, &req.query, qualifier.as_deref(), req.limit as usize) {
                Ok(outcome) => {
                    return Ok(SearchResponse {
                        results: outcome
                            .hits
                            .into_iter()
                            .map(|hit| SearchResultDto {
                                cmd_raw: hit.cmd_raw,
                                cmd_norm: hit.cmd_norm,
                                ts_ms: hit.ts_ms,
                                repo_key: hit.repo_key,
                                rank_score: hit.rank_score,
                            })
                            .collect(),
                        latency_ms: start.elapsed().as_millis() as u64,
                        backend: SearchBackend::Fts,
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "fts search failed, falling back to substring scan");
                }
            }
        }
    }

    let rows = state
        .store
        .list_recent_command_events(req.session_id.as_deref(), req.repo_key.as_deref(), 500)
        .await?;
    let scan_rows: Vec<ScanRow> = rows.iter().enumerate().map(|(index, row)| ScanRow { cmd_raw: &row.cmd_raw, index }).collect();
    let matched = substring_scan(&req.query, &scan_rows).map_err(|e| DaemonError::Internal(e.to_string()))?;

    let results = matched
        .into_iter()
        .take(req.limit as usize)
        .map(|i| {
            let row = &rows[i];
            SearchResultDto {
                cmd_raw: row.cmd_raw.clone(),
                cmd_norm: row.cmd_norm.clone(),
                ts_ms: row.ts_ms,
                repo_key: row.repo_key.clone(),
                rank_score: 1.0,
            }
        })
        .collect();

    Ok(SearchResponse { results, latency_ms: start.elapsed().as_millis() as u64, backend: SearchBackend::Fallback })
}

/// Looks up the session's last cached `Suggest` result (the same L1 key
/// `suggest()` would compute for this session/prefix) and, if the
/// suggestion acted on is still in it, pairs it against its top
/// runner-up so the online learner has an accepted/rejected feature
/// pair to train on. Returns `(accepted_cmd_norm, rejected_cmd_norm)`.
async fn runner_up_pair(
    state: &AppState,
    req: &RecordFeedbackRequest,
    action: suggestd_core::FeedbackAction,
    suggested_cmd_norm: &str,
) -> Option<(String, String)> {
    use suggestd_core::FeedbackAction;

    let accepted = matches!(action, FeedbackAction::Accepted | FeedbackAction::EditedThenRun);
    let rejected = matches!(action, FeedbackAction::Dismissed | FeedbackAction::Never);
    if !accepted && !rejected {
        return None;
    }

    let last_event = state.store.get_last_command_event(&req.session_id).await.ok()?;
    let l1_key = L1Key {
        session_id: req.session_id.clone(),
        last_event_id: last_event.as_ref().map(|e| e.id).unwrap_or(0),
        prefix_hash: prefix_hash(req.prefix.as_deref().unwrap_or("")),
    };
    let cached = state.cache.get_l1(&l1_key).await?;
    let position = cached.iter().position(|s| s.cmd_norm == suggested_cmd_norm)?;
    let runner_up = cached.iter().enumerate().find(|(i, s)| *i != position && s.cmd_norm != suggested_cmd_norm).map(|(_, s)| s)?;

    if accepted {
        Some((suggested_cmd_norm.to_string(), runner_up.cmd_norm.clone()))
    } else {
        Some((runner_up.cmd_norm.clone(), suggested_cmd_norm.to_string()))
    }
}

/// Records one feedback event against the dismissal state machine, and
/// steps the online learner when the cached `Suggest` list still holds
/// a runner-up to pair the acted-on suggestion against (spec.md §4.G,
/// component G's bandit-learning half).
pub async fn record_feedback(state: &AppState, req: RecordFeedbackRequest, now_ms: i64) -> DaemonResult<()> {
    let last_event = state.store.get_last_command_event(&req.session_id).await?;
    let context_template_id = last_event.map(|e| e.template_id).unwrap_or_else(|| "__none__".to_string());
    let suggested_cmd_norm = normalize(&req.suggested_text).cmd_norm;
    let dismissed_template_id = stable_template_id(&suggested_cmd_norm);
    let scope = Scope::Session(req.session_id.clone()).as_key();
    let action = feedback_action_from_dto(req.action);

    let feedback = suggestd_core::SuggestionFeedback {
        session_id: req.session_id.clone(),
        ts_ms: now_ms,
        prompt_prefix: req.prefix.clone(),
        suggested_text: req.suggested_text.clone(),
        action,
        executed_text: req.executed_text.clone(),
        latency_ms: req.latency_ms,
    };

    cache_record_feedback(
        &state.store,
        &feedback,
        &scope,
        &context_template_id,
        &dismissed_template_id,
        state.config_snapshot().learned_threshold,
        now_ms,
    )
    .await?;

    if let Some((accepted_cmd_norm, rejected_cmd_norm)) = runner_up_pair(state, &req, action, &suggested_cmd_norm).await {
        let (f_pos, f_neg) = features_for_pair(&accepted_cmd_norm, &rejected_cmd_norm, req.prefix.as_deref().unwrap_or(""), now_ms);
        let weights = state.store.get_rank_weight_profile("global").await?.unwrap_or_else(|| RankWeightProfile::defaults("global"));
        if let Err(e) = learn_from_feedback(&state.store, &weights, &f_pos, &f_neg).await {
            tracing::warn!(error = %e, "failed to persist online-learner weight update");
        }
    }

    if matches!(req.action, FeedbackActionDto::Dismissed | FeedbackActionDto::Never) {
        state.cache.invalidate_session(&req.session_id).await;
    }

    Ok(())
}

pub async fn debug_stats(state: &AppState) -> DebugStatsResponse {
    DebugStatsResponse {
        ingest_queue_len: state.pipeline.queue_len(),
        ingest_drop_count: state.pipeline.drop_count(),
        cache_l1_entries: state.cache.l1_len().await as u64,
        cache_l2_entries: state.cache.l2_len().await as u64,
        burst_mode_sessions: state.pipeline.burst_mode_session_count(),
        uptime_secs: state.uptime_secs(),
    }
}
