//! Retrieval orchestration (spec.md §4.E): runs every producer in the
//! spec's fixed source order, applies the prefix filter, and truncates
//! to the total pool cap.

use std::time::Duration;

use suggestd_core::ExitClass;
use suggestd_store::{Store, StoreResult};

use crate::candidate::{Candidate, CandidateSource};
use crate::fuzzy::head_token_within_edits;
use crate::producers::{
    CandidateProducer, FailureRecoveryProducer, FrequencyProducer, TaskProducer,
    TransitionProducer,
};

pub const PER_SOURCE_CAP_DEFAULT: usize = 40;
pub const POOL_CAP_DEFAULT: usize = 200;
pub const INGEST_SYNC_WAIT_MS_DEFAULT: u64 = 5;
pub const FUZZY_MAX_EDITS_DEFAULT: usize = 1;

/// Everything the retrieval pipeline needs about the requesting
/// session and its most recent command, resolved once up front so
/// every producer sees a consistent view (spec.md §4.E, I7).
#[derive(Debug, Clone)]
pub struct RetrievalContext {
    pub session_id: String,
    pub cwd: String,
    pub repo_key: Option<String>,
    pub prefix: String,
    pub prev_template_id: Option<String>,
    pub last_template_id: Option<String>,
    pub last_exit_code_class: Option<String>,
    pub include_bootstrap_recovery: bool,
    pub per_source_cap: usize,
    pub pool_cap: usize,
    pub fuzzy_max_edits: usize,
}

impl RetrievalContext {
    pub fn new(session_id: impl Into<String>, cwd: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            cwd: cwd.into(),
            repo_key: None,
            prefix: String::new(),
            prev_template_id: None,
            last_template_id: None,
            last_exit_code_class: None,
            include_bootstrap_recovery: false,
            per_source_cap: PER_SOURCE_CAP_DEFAULT,
            pool_cap: POOL_CAP_DEFAULT,
            fuzzy_max_edits: FUZZY_MAX_EDITS_DEFAULT,
        }
    }

    /// Whether the typo-trigger fuzzy match applies: the previous
    /// command exited 127 (command not found).
    pub fn typo_trigger_active(&self) -> bool {
        self.last_exit_code_class
            .as_deref()
            .map(|c| c == ExitClass::NotFound.as_str())
            .unwrap_or(false)
    }
}

/// Waits briefly for a newer `command_end` to land before retrieving,
/// mirroring spec.md §4.E's ingestion-suggest race handling. Callers
/// pass a closure that reports whether the ingestion pipeline has
/// already applied the session's latest known event; retrieval never
/// waits past `ingest_sync_wait_ms`.
pub async fn wait_for_ingest_sync<F>(mut is_visible: F, wait_budget: Duration)
where
    F: FnMut() -> bool,
{
    if is_visible() {
        return;
    }
    let step = Duration::from_millis(1);
    let mut waited = Duration::ZERO;
    while waited < wait_budget {
        tokio::time::sleep(step).await;
        waited += step;
        if is_visible() {
            return;
        }
    }
}

fn producers() -> Vec<Box<dyn CandidateProducer>> {
    vec![
        Box::new(TransitionProducer::new(CandidateSource::SessionTransition)),
        Box::new(TransitionProducer::new(CandidateSource::RepoTransition)),
        Box::new(TransitionProducer::new(CandidateSource::DirTransition)),
        Box::new(TransitionProducer::new(CandidateSource::GlobalTransition)),
        Box::new(FrequencyProducer::new(CandidateSource::SessionFrequency)),
        Box::new(FrequencyProducer::new(CandidateSource::RepoFrequency)),
        Box::new(FrequencyProducer::new(CandidateSource::GlobalFrequency)),
        Box::new(TaskProducer),
        Box::new(FailureRecoveryProducer),
    ]
}

/// Run every producer in spec order and apply the prefix filter,
/// returning a pool capped at `ctx.pool_cap` (spec.md §4.E).
pub async fn retrieve_candidates(store: &Store, ctx: &RetrievalContext) -> StoreResult<Vec<Candidate>> {
    let mut pool = Vec::new();
    for producer in producers() {
        // Failure-recovery only applies when the previous command failed.
        if matches!(producer.source(), CandidateSource::FailureRecovery)
            && ctx.last_exit_code_class.as_deref() == Some(ExitClass::Success.as_str())
        {
            continue;
        }
        let mut batch = producer.produce(store, ctx).await?;
        pool.append(&mut batch);
        if pool.len() >= ctx.pool_cap {
            break;
        }
    }

    pool.truncate(ctx.pool_cap);
    Ok(apply_prefix_filter(pool, ctx))
}

fn apply_prefix_filter(pool: Vec<Candidate>, ctx: &RetrievalContext) -> Vec<Candidate> {
    if ctx.prefix.is_empty() {
        return pool;
    }
    let prefix = ctx.prefix.to_ascii_lowercase();
    let typo_active = ctx.typo_trigger_active();
    pool.into_iter()
        .filter(|c| {
            if c.cmd_norm.to_ascii_lowercase().starts_with(&prefix) {
                return true;
            }
            typo_active && head_token_within_edits(&c.cmd_norm, &prefix, ctx.fuzzy_max_edits)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use suggestd_core::{normalize, Scope};
    use suggestd_store::Store;

    async fn seeded_store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        let s1 = normalize("git status");
        let s2 = normalize("git add .");
        store
            .upsert_command_template(&s1.template_id, &s1.cmd_norm, 0, 1000)
            .await
            .unwrap();
        store
            .upsert_command_template(&s2.template_id, &s2.cmd_norm, 0, 1000)
            .await
            .unwrap();
        let mut tx = store.pool().begin().await.unwrap();
        Store::upsert_transition_stat_tx(
            &mut tx,
            &Scope::Global.as_key(),
            &s1.template_id,
            &s2.template_id,
            1000,
            168.0,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn retrieves_global_transition_candidate() {
        let store = seeded_store().await;
        let status_template = normalize("git status").template_id;
        let mut ctx = RetrievalContext::new("s1", "/repo");
        ctx.prev_template_id = Some(status_template);
        let pool = retrieve_candidates(&store, &ctx).await.unwrap();
        assert!(pool.iter().any(|c| c.cmd_norm.starts_with("git add")));
    }

    #[tokio::test]
    async fn empty_prefix_keeps_all_candidates() {
        let store = seeded_store().await;
        let status_template = normalize("git status").template_id;
        let mut ctx = RetrievalContext::new("s1", "/repo");
        ctx.prev_template_id = Some(status_template);
        let pool = retrieve_candidates(&store, &ctx).await.unwrap();
        assert_eq!(apply_prefix_filter(pool.clone(), &ctx).len(), pool.len());
    }

    #[tokio::test]
    async fn nonmatching_prefix_without_typo_trigger_drops_candidate() {
        let store = seeded_store().await;
        let status_template = normalize("git status").template_id;
        let mut ctx = RetrievalContext::new("s1", "/repo");
        ctx.prev_template_id = Some(status_template);
        ctx.prefix = "zzz".into();
        let pool = retrieve_candidates(&store, &ctx).await.unwrap();
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn typo_trigger_matches_close_head_token() {
        let store = seeded_store().await;
        let status_template = normalize("git status").template_id;
        let mut ctx = RetrievalContext::new("s1", "/repo");
        ctx.prev_template_id = Some(status_template);
        ctx.prefix = "gti".into();
        ctx.last_exit_code_class = Some(ExitClass::NotFound.as_str().to_string());
        let pool = retrieve_candidates(&store, &ctx).await.unwrap();
        assert!(pool.iter().any(|c| c.cmd_norm.starts_with("git add")));
    }
}
