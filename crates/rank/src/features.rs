//! Per-candidate feature extraction and the weighted-sum scoring
//! formula (spec.md §4.F). Each feature is normalized to `[0,1]`
//! before weighting; `f_risk_penalty` is subtracted and `f_recovery`
//! only contributes when the candidate came from the failure-recovery
//! source.

use suggestd_candidates::{Candidate, CandidateSource};
use suggestd_core::RankWeightProfile;

/// Typical upper bound used to log-scale raw weight/count signals into
/// `[0,1]`; chosen so a handful of observations already saturates most
/// of the range while very frequent patterns still separate cleanly.
const LOG_SCALE_REFERENCE: f64 = 50.0;

pub(crate) fn log_scale(value: f64) -> f64 {
    if value <= 0.0 {
        return 0.0;
    }
    ((1.0 + value).ln() / (1.0 + LOG_SCALE_REFERENCE).ln()).clamp(0.0, 1.0)
}

/// Feature vector for one candidate, each component clamped to
/// `[0,1]` (spec.md §4.F "compute features in [0,1]").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateFeatures {
    pub f_transition: f64,
    pub f_frequency: f64,
    pub f_success: f64,
    pub f_prefix: f64,
    pub f_affinity: f64,
    pub f_task: f64,
    pub f_feedback: f64,
    pub f_risk_penalty: f64,
    /// `None` when the recovery term doesn't apply to this candidate.
    pub f_recovery: Option<f64>,
}

impl CandidateFeatures {
    /// The spec.md §4.F scoring formula: a weighted sum of every
    /// feature, risk subtracted, recovery added only when applicable.
    pub fn weighted_score(&self, weights: &RankWeightProfile) -> f64 {
        let mut score = weights.w_transition * self.f_transition
            + weights.w_frequency * self.f_frequency
            + weights.w_success * self.f_success
            + weights.w_prefix * self.f_prefix
            + weights.w_affinity * self.f_affinity
            + weights.w_task * self.f_task
            + weights.w_feedback * self.f_feedback
            - weights.w_risk_penalty * self.f_risk_penalty;
        if let Some(f_recovery) = self.f_recovery {
            score += weights.w_recovery * f_recovery;
        }
        score
    }

    /// Count of distinct signal families contributing a non-zero
    /// feature, used by `confidence`'s support-diversity factor.
    pub fn support_count(&self) -> usize {
        [
            self.f_transition > 0.0,
            self.f_frequency > 0.0,
            self.f_task > 0.0,
            self.f_recovery.map(|f| f > 0.0).unwrap_or(false),
        ]
        .into_iter()
        .filter(|b| *b)
        .count()
        .max(1)
    }
}

/// Affinity bonus for candidates whose source is scoped to the current
/// directory or repo, over a session/global-only signal (spec.md §4.F
/// `f_affinity` "locality" term).
fn affinity(source: CandidateSource) -> f64 {
    match source {
        CandidateSource::DirTransition | CandidateSource::RepoTransition => 1.0,
        CandidateSource::RepoFrequency | CandidateSource::Task => 0.6,
        CandidateSource::SessionTransition | CandidateSource::SessionFrequency => 0.3,
        CandidateSource::GlobalTransition | CandidateSource::GlobalFrequency => 0.0,
        CandidateSource::FailureRecovery => 0.0,
    }
}

/// How strongly `cmd_norm` matches the typed `prefix`: `1.0` with no
/// prefix (pure next-step mode, spec.md §4.E), `1.0` on a literal
/// match, else a partial credit for the fuzzy typo-trigger path.
fn prefix_strength(cmd_norm: &str, prefix: &str, fuzzy_matched: bool, max_edits: usize) -> f64 {
    if prefix.is_empty() {
        return 1.0;
    }
    if cmd_norm
        .to_ascii_lowercase()
        .starts_with(&prefix.to_ascii_lowercase())
    {
        return 1.0;
    }
    if fuzzy_matched && max_edits > 0 {
        return 0.5;
    }
    0.0
}

/// Converts a recency-decayed dismissal count into a `[0,1]` penalty:
/// a fresh, repeated dismissal of this exact (context, candidate) pair
/// pulls the feature toward 0, while an old or single dismissal barely
/// moves it. The ranker is the one with store access, so it decays
/// `dismissal_pattern.dismissal_count` by `last_dismissed_ms` itself
/// and passes the result in here; `compute_features` stays store-free.
pub fn dismissal_penalty_factor(decayed_dismissal_count: f64) -> f64 {
    log_scale(decayed_dismissal_count)
}

pub struct FeatureContext<'a> {
    pub prefix: &'a str,
    pub fuzzy_matched: bool,
    pub fuzzy_max_edits: usize,
    pub now_ms: i64,
    pub half_life_hours: f64,
    pub risk_flagged: bool,
}

pub fn compute_features(candidate: &Candidate, ctx: &FeatureContext<'_>) -> CandidateFeatures {
    let f_transition = if candidate.source.is_transition() {
        log_scale(candidate.weight)
    } else {
        0.0
    };
    let f_frequency = if candidate.source.is_frequency() {
        log_scale(candidate.weight)
    } else {
        0.0
    };
    let f_task = if matches!(candidate.source, CandidateSource::Task) {
        candidate.weight.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let f_recovery = matches!(candidate.source, CandidateSource::FailureRecovery)
        .then_some(candidate.success_rate.clamp(0.0, 1.0));

    CandidateFeatures {
        f_transition,
        f_frequency,
        f_success: candidate.success_rate.clamp(0.0, 1.0),
        f_prefix: prefix_strength(&candidate.cmd_norm, ctx.prefix, ctx.fuzzy_matched, ctx.fuzzy_max_edits),
        f_affinity: affinity(candidate.source),
        f_task,
        // Neutral baseline: no dismissal history known at this level.
        // The ranker overrides this with the real per-template penalty
        // once it has looked up `dismissal_pattern` for the candidate's
        // (context, template) pair.
        f_feedback: 1.0,
        f_risk_penalty: if ctx.risk_flagged { 1.0 } else { 0.0 },
        f_recovery,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use suggestd_candidates::CandidateSource;

    fn candidate(source: CandidateSource, weight: f64, success_rate: f64) -> Candidate {
        Candidate {
            template_id: "t1".into(),
            cmd_norm: "git add <path>".into(),
            source,
            scope: "global".into(),
            weight,
            count: 5,
            success_rate,
            last_seen_ms: 1000,
            task: None,
            recovery_source: None,
        }
    }

    fn ctx() -> FeatureContext<'static> {
        FeatureContext {
            prefix: "",
            fuzzy_matched: false,
            fuzzy_max_edits: 1,
            now_ms: 1000,
            half_life_hours: 168.0,
            risk_flagged: false,
        }
    }

    #[test]
    fn transition_candidate_has_nonzero_transition_feature_only() {
        let c = candidate(CandidateSource::GlobalTransition, 5.0, 1.0);
        let f = compute_features(&c, &ctx());
        assert!(f.f_transition > 0.0);
        assert_eq!(f.f_frequency, 0.0);
        assert_eq!(f.f_task, 0.0);
        assert!(f.f_recovery.is_none());
    }

    #[test]
    fn recovery_candidate_carries_recovery_feature() {
        let c = candidate(CandidateSource::FailureRecovery, 3.0, 0.8);
        let f = compute_features(&c, &ctx());
        assert_eq!(f.f_recovery, Some(0.8));
    }

    #[test]
    fn empty_prefix_gives_full_prefix_credit() {
        let c = candidate(CandidateSource::GlobalTransition, 5.0, 1.0);
        let f = compute_features(&c, &ctx());
        assert_eq!(f.f_prefix, 1.0);
    }

    #[test]
    fn nonmatching_prefix_without_fuzzy_gives_zero_credit() {
        let c = candidate(CandidateSource::GlobalTransition, 5.0, 1.0);
        let mut context = ctx();
        context.prefix = "zzz";
        let f = compute_features(&c, &context);
        assert_eq!(f.f_prefix, 0.0);
    }

    #[test]
    fn weighted_score_subtracts_risk_penalty() {
        let weights = RankWeightProfile::defaults("global");
        let mut f = compute_features(&candidate(CandidateSource::GlobalTransition, 5.0, 1.0), &ctx());
        let safe_score = f.weighted_score(&weights);
        f.f_risk_penalty = 1.0;
        let risky_score = f.weighted_score(&weights);
        assert!(risky_score < safe_score);
    }

    #[test]
    fn compute_features_leaves_feedback_neutral_by_default() {
        let f = compute_features(&candidate(CandidateSource::GlobalTransition, 5.0, 1.0), &ctx());
        assert_eq!(f.f_feedback, 1.0);
    }

    #[test]
    fn dismissal_penalty_factor_grows_with_dismissal_count() {
        assert_eq!(dismissal_penalty_factor(0.0), 0.0);
        assert!(dismissal_penalty_factor(3.0) > dismissal_penalty_factor(1.0));
    }

    #[test]
    fn support_count_is_at_least_one() {
        let f = compute_features(&candidate(CandidateSource::GlobalFrequency, 0.0, 0.0), &ctx());
        assert!(f.support_count() >= 1);
    }
}
