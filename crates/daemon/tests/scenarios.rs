//! End-to-end reproductions of the daemon's literal worked scenarios,
//! driven through `ops::ingest_event`/`ops::suggest`/`ops::record_feedback`
//! against an in-memory store, the same way a real connection would.

use std::sync::Arc;

use suggestd_cache::{SuggestionCache, CACHE_MEMORY_BUDGET_MB_DEFAULT, CACHE_TTL_MS_DEFAULT};
use suggestd_daemon::{ops, AppState, Config};
use suggestd_ingest::{Pipeline, PipelineConfig};
use suggestd_store::Store;
use suggestd_types::{
    EventType, FeedbackActionDto, IngestEventRequest, RecordFeedbackRequest, SuggestRequest,
};

async fn new_state() -> Arc<AppState> {
    let store = Arc::new(Store::open_in_memory().await.expect("open in-memory store"));
    let pipeline = Arc::new(Pipeline::new(store.clone(), None, None, PipelineConfig::default()));
    let cache = Arc::new(SuggestionCache::new(CACHE_TTL_MS_DEFAULT, CACHE_MEMORY_BUDGET_MB_DEFAULT));
    AppState::new(store, pipeline, cache, None, Config::default())
}

fn command_end(session_id: &str, cmd_raw: &str, exit_code: i32, ts_ms: i64) -> IngestEventRequest {
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

fn suggest_req(session_id: &str, prefix: &str) -> SuggestRequest {
    SuggestRequest {
        session_id: session_id.to_string(),
        cwd: "/repo".into(),
        repo_key: Some("clai/suggestd".into()),
        prefix: prefix.to_string(),
        cursor_pos: prefix.len() as u32,
        limit: 5,
        include_low_confidence: true,
        last_cmd_raw: None,
        last_cmd_norm: None,
        last_cmd_ts_ms: None,
        last_event_seq: None,
    }
}

async fn drain_all(pipeline: &Pipeline) {
    while pipeline.drain_one().await {}
}

/// S1: `git status` then `git add .` twice in the same session makes
/// `git add .` the deterministic top-1 suggestion after the next `git
/// status`, tagged with both a repo- and a global-scoped transition
/// reason, and a byte-identical repeat call (I7).
#[tokio::test]
async fn s1_session_transition_ranks_deterministically_and_repeats_identically() {
    let state = new_state().await;

    ops::ingest_event(&state, command_end("s1", "git status", 0, 1_000));
    ops::ingest_event(&state, command_end("s1", "git add .", 0, 61_000));
    ops::ingest_event(&state, command_end("s1", "git status", 0, 121_000));
    ops::ingest_event(&state, command_end("s1", "git add .", 0, 181_000));
    drain_all(&state.pipeline).await;
    ops::ingest_event(&state, command_end("s1", "git status", 0, 241_000));
    drain_all(&state.pipeline).await;

    let first = ops::suggest(&state, suggest_req("s1", ""), 300_000).await.unwrap();
    assert!(!first.suggestions.is_empty());
    let top = &first.suggestions[0];
    assert_eq!(top.text, "git add .");
    assert_eq!(top.source, "session_transition");
    assert!(
        top.reasons.iter().any(|r| r == "repo_transition" || r == "global_transition"),
        "reasons was {:?}",
        top.reasons
    );

    let second = ops::suggest(&state, suggest_req("s1", ""), 300_000).await.unwrap();
    assert_eq!(first.suggestions, second.suggestions);
}

/// S2: two sessions touching disjoint templates never see each
/// other's suggestions (I1).
#[tokio::test]
async fn s2_sessions_are_isolated_from_each_others_history() {
    let state = new_state().await;

    ops::ingest_event(&state, command_end("alice", "alice-only-cmd", 0, 1_000));
    ops::ingest_event(&state, command_end("bob", "bob-only-cmd", 0, 1_000));
    drain_all(&state.pipeline).await;

    let alice = ops::suggest(&state, suggest_req("alice", "alice"), 10_000).await.unwrap();
    assert!(alice.suggestions.iter().all(|s| s.cmd_norm != "bob-only-cmd"));

    let bob = ops::suggest(&state, suggest_req("bob", "bob"), 10_000).await.unwrap();
    assert!(bob.suggestions.iter().all(|s| s.cmd_norm != "alice-only-cmd"));
}

/// S3: ephemeral command_end events never reach `command_event` and
/// never surface from `Search` (I2).
#[tokio::test]
async fn s3_ephemeral_events_are_never_persisted() {
    let state = new_state().await;

    let mut first = command_end("s1", "echo one-off-secret", 0, 1_000);
    first.ephemeral = Some(true);
    let mut second = command_end("s1", "echo another-secret", 0, 2_000);
    second.ephemeral = Some(true);
    ops::ingest_event(&state, first);
    ops::ingest_event(&state, second);
    drain_all(&state.pipeline).await;

    assert!(state.store.get_last_command_event("s1").await.unwrap().is_none());

    let search = ops::search(
        &state,
        suggestd_types::SearchRequest {
            query: "secret".into(),
            session_id: Some("s1".into()),
            repo_key: None,
            scope: "session".into(),
            mode: suggestd_types::SearchMode::Substring,
            limit: 20,
        },
    )
    .await
    .unwrap();
    assert!(search.results.is_empty());
}

/// S4: an oversized `cmd_raw` is truncated to `CMD_RAW_MAX_BYTES_DEFAULT`
/// and persisted with `cmd_truncated = true` (I4).
#[tokio::test]
async fn s4_oversized_command_is_truncated_on_persist() {
    let state = new_state().await;

    let oversized = "echo ".to_string() + &"a".repeat(20_000);
    ops::ingest_event(&state, command_end("s1", &oversized, 0, 1_000));
    drain_all(&state.pipeline).await;

    let stored = state.store.get_last_command_event("s1").await.unwrap().expect("event persisted");
    assert_eq!(stored.cmd_raw.len(), suggestd_core::CMD_RAW_MAX_BYTES_DEFAULT);
    assert!(stored.cmd_truncated);
}

/// S5: three consecutive dismissals of the same suggestion in the same
/// context escalate to `learned`, after which it no longer appears in
/// a later `Suggest` call (spec.md §4.G table).
#[tokio::test]
async fn s5_repeated_dismissal_escalates_to_learned_and_suppresses() {
    let state = new_state().await;

    ops::ingest_event(&state, command_end("s1", "git status", 0, 1_000));
    ops::ingest_event(&state, command_end("s1", "git add .", 0, 61_000));
    drain_all(&state.pipeline).await;

    for i in 0..3i64 {
        ops::ingest_event(&state, command_end("s1", "git status", 0, 121_000 + i * 60_000));
        drain_all(&state.pipeline).await;

        let resp = ops::suggest(&state, suggest_req("s1", ""), 300_000 + i * 60_000).await.unwrap();
        let Some(suggestion) = resp.suggestions.iter().find(|s| s.text == "git add .") else {
            continue;
        };
        ops::record_feedback(
            &state,
            RecordFeedbackRequest {
                session_id: "s1".into(),
                action: FeedbackActionDto::Dismissed,
                suggested_text: suggestion.text.clone(),
                executed_text: None,
                prefix: Some(String::new()),
                latency_ms: Some(200),
            },
            300_000 + i * 60_000,
        )
        .await
        .unwrap();
    }

    ops::ingest_event(&state, command_end("s1", "git status", 0, 400_000));
    drain_all(&state.pipeline).await;
    let resp = ops::suggest(&state, suggest_req("s1", ""), 500_000).await.unwrap();
    assert!(resp.suggestions.iter().all(|s| s.text != "git add ."));
}

/// S6: a failed `pytest`, recovered by `pytest -x`, then a second
/// `pytest` failure makes `Suggest` surface `pytest -x` tagged
/// `source = "recovery"` with a `recovery_boost` reason.
#[tokio::test]
async fn s6_failure_recovery_surfaces_after_repeated_failure() {
    let state = new_state().await;

    ops::ingest_event(&state, command_end("s1", "pytest", 1, 1_000));
    ops::ingest_event(&state, command_end("s1", "pytest -x", 0, 61_000));
    drain_all(&state.pipeline).await;
    ops::ingest_event(&state, command_end("s1", "pytest", 1, 121_000));
    drain_all(&state.pipeline).await;

    let resp = ops::suggest(&state, suggest_req("s1", ""), 200_000).await.unwrap();
    let top = resp.suggestions.iter().find(|s| s.text == "pytest -x").expect("recovery candidate surfaced");
    assert_eq!(top.source, "recovery");
    assert!(top.reasons.contains(&"recovery_boost".to_string()));
}
