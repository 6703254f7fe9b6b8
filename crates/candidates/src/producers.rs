//! Candidate producers (spec.md §4.E "Ordering of retrieval"). Each
//! producer sits behind the `CandidateProducer` trait object so the
//! retrieval pipeline can run them uniformly and in a fixed order
//! without a hard-coded match over source kinds.

use async_trait::async_trait;
use suggestd_core::Scope;
use suggestd_store::{Store, StoreResult};

use crate::candidate::{Candidate, CandidateSource};
use crate::retrieval::RetrievalContext;

#[async_trait]
pub trait CandidateProducer: Send + Sync {
    fn source(&self) -> CandidateSource;

    async fn produce(&self, store: &Store, ctx: &RetrievalContext) -> StoreResult<Vec<Candidate>>;
}

fn transition_scope_key(source: CandidateSource, ctx: &RetrievalContext) -> Option<String> {
    match source {
        CandidateSource::SessionTransition => Some(Scope::Session(ctx.session_id.clone()).as_key()),
        CandidateSource::RepoTransition => ctx.repo_key.clone().map(|r| Scope::Repo(r).as_key()),
        CandidateSource::DirTransition => {
            (!ctx.cwd.is_empty()).then(|| Scope::Dir(ctx.cwd.clone()).as_key())
        }
        CandidateSource::GlobalTransition => Some(Scope::Global.as_key()),
        _ => None,
    }
}

pub struct TransitionProducer {
    source: CandidateSource,
}

impl TransitionProducer {
    pub fn new(source: CandidateSource) -> Self {
        Self { source }
    }
}

#[async_trait]
impl CandidateProducer for TransitionProducer {
    fn source(&self) -> CandidateSource {
        self.source
    }

    async fn produce(&self, store: &Store, ctx: &RetrievalContext) -> StoreResult<Vec<Candidate>> {
        let Some(prev_template_id) = ctx.prev_template_id.as_deref() else {
            return Ok(Vec::new());
        };
        let Some(scope) = transition_scope_key(self.source, ctx) else {
            return Ok(Vec::new());
        };
        let rows = store
            .list_transitions_from(&scope, prev_template_id, ctx.per_source_cap as i64)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(template) = store.get_command_template(&row.next_template_id).await? else {
                continue;
            };
            out.push(Candidate {
                template_id: row.next_template_id,
                cmd_norm: template.cmd_norm,
                source: self.source,
                scope: row.scope,
                weight: row.weight,
                count: row.count,
                success_rate: 1.0,
                last_seen_ms: row.last_seen_ms,
                task: None,
                recovery_source: None,
            });
        }
        Ok(out)
    }
}

fn frequency_scope_key(source: CandidateSource, ctx: &RetrievalContext) -> Option<String> {
    match source {
        CandidateSource::SessionFrequency => Some(Scope::Session(ctx.session_id.clone()).as_key()),
        CandidateSource::RepoFrequency => ctx.repo_key.clone().map(|r| Scope::Repo(r).as_key()),
        CandidateSource::GlobalFrequency => Some(Scope::Global.as_key()),
        _ => None,
    }
}

pub struct FrequencyProducer {
    source: CandidateSource,
}

impl FrequencyProducer {
    pub fn new(source: CandidateSource) -> Self {
        Self { source }
    }
}

#[async_trait]
impl CandidateProducer for FrequencyProducer {
    fn source(&self) -> CandidateSource {
        self.source
    }

    async fn produce(&self, store: &Store, ctx: &RetrievalContext) -> StoreResult<Vec<Candidate>> {
        let Some(scope) = frequency_scope_key(self.source, ctx) else {
            return Ok(Vec::new());
        };
        let stats = store.list_command_stats(&scope).await?;
        let mut out = Vec::with_capacity(stats.len().min(ctx.per_source_cap));
        for stat in stats.into_iter().take(ctx.per_source_cap) {
            let Some(template) = store.get_command_template(&stat.template_id).await? else {
                continue;
            };
            let count = stat.total();
            let success_rate = stat.success_rate();
            out.push(Candidate {
                template_id: stat.template_id,
                cmd_norm: template.cmd_norm,
                source: self.source,
                scope: stat.scope,
                weight: stat.score,
                count,
                success_rate,
                last_seen_ms: stat.last_seen_ms,
                task: None,
                recovery_source: None,
            });
        }
        Ok(out)
    }
}

pub struct TaskProducer;

#[async_trait]
impl CandidateProducer for TaskProducer {
    fn source(&self) -> CandidateSource {
        CandidateSource::Task
    }

    async fn produce(&self, store: &Store, ctx: &RetrievalContext) -> StoreResult<Vec<Candidate>> {
        let Some(repo_key) = ctx.repo_key.as_deref() else {
            return Ok(Vec::new());
        };
        let tasks = store.list_task_candidates(repo_key).await?;
        Ok(tasks
            .into_iter()
            .take(ctx.per_source_cap)
            .map(|task| {
                let normalized = suggestd_core::normalize(&task.command_text);
                Candidate {
                    template_id: normalized.template_id,
                    cmd_norm: normalized.cmd_norm,
                    source: CandidateSource::Task,
                    scope: Scope::Repo(repo_key.to_string()).as_key(),
                    weight: task.priority_boost,
                    count: 1,
                    success_rate: 1.0,
                    last_seen_ms: task.discovered_ms,
                    recovery_source: None,
                    task: Some(task),
                }
            })
            .collect())
    }
}

pub struct FailureRecoveryProducer;

#[async_trait]
impl CandidateProducer for FailureRecoveryProducer {
    fn source(&self) -> CandidateSource {
        CandidateSource::FailureRecovery
    }

    async fn produce(&self, store: &Store, ctx: &RetrievalContext) -> StoreResult<Vec<Candidate>> {
        let Some(exit_code_class) = ctx.last_exit_code_class.as_deref() else {
            return Ok(Vec::new());
        };
        let Some(failed_template_id) = ctx.last_template_id.as_deref() else {
            return Ok(Vec::new());
        };
        let scope = Scope::Global.as_key();
        let edges = store
            .list_failure_recovery(&scope, failed_template_id, exit_code_class, ctx.include_bootstrap_recovery)
            .await?;
        let mut out = Vec::with_capacity(edges.len());
        for edge in edges.into_iter().take(ctx.per_source_cap) {
            let Some(template) = store.get_command_template(&edge.recovery_template_id).await? else {
                continue;
            };
            out.push(Candidate {
                template_id: edge.recovery_template_id,
                cmd_norm: template.cmd_norm,
                source: CandidateSource::FailureRecovery,
                scope: edge.scope,
                weight: edge.weight,
                count: edge.count,
                success_rate: edge.success_rate,
                last_seen_ms: edge.last_seen_ms,
                task: None,
                recovery_source: Some(edge.source),
            });
        }
        Ok(out)
    }
}
