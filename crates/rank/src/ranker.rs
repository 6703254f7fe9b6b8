//! Top-level ranking pipeline (spec.md §4.F): merge same-template
//! candidates, fill slots, score, filter dismissed/low-confidence
//! entries, then apply the deterministic tie-break order.

use std::collections::HashMap;
use std::time::Instant;

use suggestd_candidates::{Candidate, CandidateSource};
use suggestd_core::{detect_destructive, RankWeightProfile};
use suggestd_store::{Store, StoreResult};

use crate::confidence::compute_confidence;
use crate::dismissal::is_suppressed;
use crate::explain::{explain, MAX_REASONS_DEFAULT, MIN_CONTRIBUTION_DEFAULT};
use crate::features::{compute_features, FeatureContext};
use crate::slotfill::{fill_slots, SlotFillConfig};

pub const MIN_CONFIDENCE_DEFAULT: f64 = 0.2;
pub const RETRIEVAL_DEADLINE_MS: u64 = 20;
pub const RANKING_DEADLINE_MS: u64 = 10;

#[derive(Debug, Clone)]
pub struct RankedSuggestion {
    pub text: String,
    pub cmd_norm: String,
    pub template_id: String,
    pub source: CandidateSource,
    pub score: f64,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub risk: bool,
    pub last_seen_ms: i64,
}

pub struct RankRequest<'a> {
    pub prefix: &'a str,
    pub typo_trigger_active: bool,
    pub fuzzy_max_edits: usize,
    pub now_ms: i64,
    pub half_life_hours: f64,
    pub context_template_id: Option<&'a str>,
    pub scope_chain: &'a [String],
    pub min_confidence: f64,
    pub include_low_confidence: bool,
    pub limit: usize,
    pub slot_fill: SlotFillConfig,
}

struct MergedCandidate {
    template_id: String,
    cmd_norm: String,
    transition_weight: f64,
    frequency_weight: f64,
    task_weight: f64,
    recovery_success_rate: Option<f64>,
    success_rate: f64,
    last_seen_ms: i64,
    sources: Vec<CandidateSource>,
}

fn merge(pool: Vec<Candidate>) -> Vec<MergedCandidate> {
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, MergedCandidate> = HashMap::new();

    for c in pool {
        let key = c.dedup_key().to_string();
        let entry = by_key.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            MergedCandidate {
                template_id: c.template_id.clone(),
                cmd_norm: c.cmd_norm.clone(),
                transition_weight: 0.0,
                frequency_weight: 0.0,
                task_weight: 0.0,
                recovery_success_rate: None,
                success_rate: 0.0,
                last_seen_ms: 0,
                sources: Vec::new(),
            }
        });

        if c.source.is_transition() {
            entry.transition_weight = entry.transition_weight.max(c.weight);
        }
        if c.source.is_frequency() {
            entry.frequency_weight = entry.frequency_weight.max(c.weight);
        }
        if matches!(c.source, CandidateSource::Task) {
            entry.task_weight = entry.task_weight.max(c.weight);
        }
        if matches!(c.source, CandidateSource::FailureRecovery) {
            entry.recovery_success_rate = Some(c.success_rate);
        }
        entry.success_rate = entry.success_rate.max(c.success_rate);
        entry.last_seen_ms = entry.last_seen_ms.max(c.last_seen_ms);
        if !entry.sources.contains(&c.source) {
            entry.sources.push(c.source);
        }
    }

    order.into_iter().filter_map(|k| by_key.remove(&k)).collect()
}

fn slot_count(cmd_norm: &str) -> usize {
    cmd_norm
        .split(' ')
        .filter(|t| t.starts_with('<') && t.ends_with('>'))
        .count()
}

/// Rank a retrieved candidate pool into the final top-k suggestion
/// list. Caller is responsible for enforcing the end-to-end hard
/// timeout; this function itself checks the `RANKING_DEADLINE_MS`
/// soft budget and stops slot-filling further candidates if exceeded,
/// returning whatever has been scored so far.
pub async fn rank(store: &Store, pool: Vec<Candidate>, weights: &RankWeightProfile, req: &RankRequest<'_>) -> StoreResult<Vec<RankedSuggestion>> {
    let deadline = Instant::now() + std::time::Duration::from_millis(RANKING_DEADLINE_MS);
    let merged = merge(pool);
    let context_template_id = req.context_template_id.unwrap_or("__none__");

    struct Scored {
        candidate: MergedCandidate,
        text: String,
        score: f64,
        risk: bool,
        reasons: Vec<String>,
    }

    let mut scored: Vec<Scored> = Vec::new();
    for candidate in merged {
        if Instant::now() >= deadline {
            tracing::warn!(scored = scored.len(), "ranking deadline exceeded, truncating candidate pool");
            break;
        }

        let suppressed = {
            let mut suppressed = false;
            for scope in req.scope_chain {
                if is_suppressed(store, scope, context_template_id, &candidate.template_id).await? {
                    suppressed = true;
                    break;
                }
            }
            suppressed
        };
        if suppressed {
            continue;
        }

        let slot_count = slot_count(&candidate.cmd_norm);
        let Some(text) = fill_slots(
            store,
            req.scope_chain,
            &candidate.template_id,
            &candidate.cmd_norm,
            slot_count,
            &req.slot_fill,
        )
        .await?
        else {
            continue;
        };

        let risk = detect_destructive(&text).is_some();
        let fuzzy_matched = req.typo_trigger_active
            && !candidate
                .cmd_norm
                .to_ascii_lowercase()
                .starts_with(&req.prefix.to_ascii_lowercase());

        let feature_ctx = FeatureContext {
            prefix: req.prefix,
            fuzzy_matched,
            fuzzy_max_edits: req.fuzzy_max_edits,
            now_ms: req.now_ms,
            half_life_hours: req.half_life_hours,
            risk_flagged: risk,
        };
        let pseudo = Candidate {
            template_id: candidate.template_id.clone(),
            cmd_norm: candidate.cmd_norm.clone(),
            source: dominant_source(&candidate.sources),
            scope: String::new(),
            weight: candidate.transition_weight.max(candidate.frequency_weight).max(candidate.task_weight),
            count: 0,
            success_rate: candidate.success_rate,
            last_seen_ms: candidate.last_seen_ms,
            task: None,
            recovery_source: None,
        };
        let mut features = compute_features(&pseudo, &feature_ctx);
        features.f_recovery = candidate.recovery_success_rate;
        features.f_feedback = dismissal_feedback(store, req.scope_chain, context_template_id, &candidate.template_id, req.now_ms, req.half_life_hours).await?;
        if candidate.transition_weight > 0.0 {
            features.f_transition = features.f_transition.max(crate::features::log_scale(candidate.transition_weight));
        }
        if candidate.frequency_weight > 0.0 {
            features.f_frequency = features.f_frequency.max(crate::features::log_scale(candidate.frequency_weight));
        }

        let score = features.weighted_score(weights);
        let reasons = explain(
            dominant_source(&candidate.sources),
            &features,
            weights,
            MIN_CONTRIBUTION_DEFAULT,
            MAX_REASONS_DEFAULT,
        );
        scored.push(Scored { candidate, text, score, risk, reasons });
    }

    // Deterministic tie-break (I7): score DESC, confidence DESC,
    // last_seen_ms DESC, cmd_norm ASC. Confidence depends on the
    // runner-up score, so sort by score first to establish it.
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut out = Vec::with_capacity(scored.len());
    for (i, entry) in scored.iter().enumerate() {
        let runner_up = scored.get(i + 1).map(|s| s.score).unwrap_or(0.0);
        let support_count = entry.candidate.sources.len().max(1) + entry.candidate.recovery_success_rate.map(|_| 1).unwrap_or(0);
        let confidence = compute_confidence(entry.score, runner_up, support_count);
        if confidence < req.min_confidence && !req.include_low_confidence {
            continue;
        }

        out.push(RankedSuggestion {
            text: entry.text.clone(),
            cmd_norm: entry.candidate.cmd_norm.clone(),
            template_id: entry.candidate.template_id.clone(),
            source: dominant_source(&entry.candidate.sources),
            score: entry.score,
            confidence,
            reasons: entry.reasons.clone(),
            risk: entry.risk,
            last_seen_ms: entry.candidate.last_seen_ms,
        });
    }

    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| b.last_seen_ms.cmp(&a.last_seen_ms))
            .then_with(|| a.cmd_norm.cmp(&b.cmd_norm))
    });
    out.truncate(req.limit);
    Ok(out)
}

/// The source a merged candidate is reported as, for both `source` and
/// the `explain()` reason tags. Failure-recovery wins over any
/// transition/frequency signal also backing the same template: a
/// command that both followed naturally *and* fixed the previous
/// failure should read as the recovery it is (spec.md §8 S6), not as
/// an ordinary next-step suggestion.
fn dominant_source(sources: &[CandidateSource]) -> CandidateSource {
    if sources.contains(&CandidateSource::FailureRecovery) {
        return CandidateSource::FailureRecovery;
    }
    sources.first().copied().unwrap_or(CandidateSource::GlobalTransition)
}

/// Real per-template `f_feedback`, grounded in `dismissal_pattern`
/// history rather than the candidate pool's own recency (spec.md
/// §4.F). Walks the scope chain the same way suppression does and
/// takes the strongest recency-decayed dismissal penalty found,
/// since a narrower scope's history is more specific than a wider
/// one's. Candidates with no dismissal history at any scope score the
/// neutral `1.0` `compute_features` already assigned.
async fn dismissal_feedback(
    store: &Store,
    scope_chain: &[String],
    context_template_id: &str,
    candidate_template_id: &str,
    now_ms: i64,
    half_life_hours: f64,
) -> StoreResult<f64> {
    let mut penalty = 0.0_f64;
    for scope in scope_chain {
        if let Some(row) = store.get_dismissal(scope, context_template_id, candidate_template_id).await? {
            let decayed = suggestd_store::aggregates::decay(row.dismissal_count as f64, (now_ms - row.last_dismissed_ms).max(0), half_life_hours);
            penalty = penalty.max(crate::features::dismissal_penalty_factor(decayed));
        }
    }
    Ok((1.0 - penalty).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use suggestd_core::{normalize, Scope};

    async fn seeded_store_with_transition() -> (Store, String, String) {
        let store = Store::open_in_memory().await.unwrap();
        let prev = normalize("git status");
        let next = normalize("git add .");
        store
            .upsert_command_template(&prev.template_id, &prev.cmd_norm, 0, 1000)
            .await
            .unwrap();
        store
            .upsert_command_template(&next.template_id, &next.cmd_norm, 0, 1000)
            .await
            .unwrap();
        let mut tx = store.pool().begin().await.unwrap();
        Store::upsert_transition_stat_tx(&mut tx, &Scope::Global.as_key(), &prev.template_id, &next.template_id, 1000, 168.0)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        (store, prev.template_id, next.template_id)
    }

    fn candidate(template_id: &str, cmd_norm: &str, source: CandidateSource, weight: f64) -> Candidate {
        Candidate {
            template_id: template_id.to_string(),
            cmd_norm: cmd_norm.to_string(),
            source,
            scope: "global".into(),
            weight,
            count: 3,
            success_rate: 1.0,
            last_seen_ms: 1000,
            task: None,
            recovery_source: None,
        }
    }

    #[tokio::test]
    async fn ranks_transition_candidate_above_threshold() {
        let (store, prev_id, next_id) = seeded_store_with_transition().await;
        let pool = vec![candidate(&next_id, "git add .", CandidateSource::GlobalTransition, 5.0)];
        let weights = RankWeightProfile::defaults("global");
        let req = RankRequest {
            prefix: "",
            typo_trigger_active: false,
            fuzzy_max_edits: 1,
            now_ms: 1000,
            half_life_hours: 168.0,
            context_template_id: Some(&prev_id),
            scope_chain: &[Scope::Global.as_key()],
            min_confidence: 0.0,
            include_low_confidence: true,
            limit: 10,
            slot_fill: SlotFillConfig::default(),
        };
        let results = rank(&store, pool, &weights, &req).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "git add .");
    }

    #[tokio::test]
    async fn suppressed_candidate_is_dropped() {
        let (store, prev_id, next_id) = seeded_store_with_transition().await;
        for i in 0..3 {
            store
                .apply_dismissal_action(&Scope::Global.as_key(), &prev_id, &next_id, suggestd_store::DismissalAction::Dismiss, 3, 1000 + i)
                .await
                .unwrap();
        }
        let pool = vec![candidate(&next_id, "git add .", CandidateSource::GlobalTransition, 5.0)];
        let weights = RankWeightProfile::defaults("global");
        let req = RankRequest {
            prefix: "",
            typo_trigger_active: false,
            fuzzy_max_edits: 1,
            now_ms: 1000,
            half_life_hours: 168.0,
            context_template_id: Some(&prev_id),
            scope_chain: &[Scope::Global.as_key()],
            min_confidence: 0.0,
            include_low_confidence: true,
            limit: 10,
            slot_fill: SlotFillConfig::default(),
        };
        let results = rank(&store, pool, &weights, &req).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn temporary_dismissal_history_lowers_score_but_does_not_suppress() {
        let (store, prev_id, next_id) = seeded_store_with_transition().await;
        // One dismissal stays under the learned threshold (3), so the
        // candidate still survives `is_suppressed` but should score
        // lower than an identical candidate with no dismissal history.
        store
            .apply_dismissal_action(&Scope::Global.as_key(), &prev_id, &next_id, suggestd_store::DismissalAction::Dismiss, 3, 1000)
            .await
            .unwrap();

        let pool = vec![candidate(&next_id, "git add .", CandidateSource::GlobalTransition, 5.0)];
        let weights = RankWeightProfile::defaults("global");
        let req = RankRequest {
            prefix: "",
            typo_trigger_active: false,
            fuzzy_max_edits: 1,
            now_ms: 1000,
            half_life_hours: 168.0,
            context_template_id: Some(&prev_id),
            scope_chain: &[Scope::Global.as_key()],
            min_confidence: 0.0,
            include_low_confidence: true,
            limit: 10,
            slot_fill: SlotFillConfig::default(),
        };
        let with_history = rank(&store, pool, &weights, &req).await.unwrap();
        assert_eq!(with_history.len(), 1);

        let pool = vec![candidate(&next_id, "git add .", CandidateSource::GlobalTransition, 5.0)];
        let no_history_req = RankRequest { context_template_id: Some("other_ctx"), ..req };
        let without_history = rank(&store, pool, &weights, &no_history_req).await.unwrap();
        assert_eq!(without_history.len(), 1);
        assert!(with_history[0].score < without_history[0].score);
    }

    #[tokio::test]
    async fn destructive_candidate_is_tagged_risky() {
        let store = Store::open_in_memory().await.unwrap();
        let cmd = normalize("rm -rf /var/lib/postgres");
        store
            .upsert_command_template(&cmd.template_id, &cmd.cmd_norm, 0, 1000)
            .await
            .unwrap();
        let pool = vec![candidate(&cmd.template_id, &cmd.cmd_norm, CandidateSource::GlobalFrequency, 5.0)];
        let weights = RankWeightProfile::defaults("global");
        let req = RankRequest {
            prefix: "",
            typo_trigger_active: false,
            fuzzy_max_edits: 1,
            now_ms: 1000,
            half_life_hours: 168.0,
            context_template_id: None,
            scope_chain: &[Scope::Global.as_key()],
            min_confidence: 0.0,
            include_low_confidence: true,
            limit: 10,
            slot_fill: SlotFillConfig::default(),
        };
        let results = rank(&store, pool, &weights, &req).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].risk);
        assert!(results[0].reasons.contains(&"dangerous".to_string()));
    }
}
