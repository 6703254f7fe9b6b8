//! Explanation generation (spec.md §4.F): derive a `reasons[]` tag
//! list from a suggestion's dominant normalized feature contributions.

use suggestd_candidates::CandidateSource;
use suggestd_core::RankWeightProfile;

use crate::features::CandidateFeatures;

pub const MIN_CONTRIBUTION_DEFAULT: f64 = 0.15;
pub const MAX_REASONS_DEFAULT: usize = 3;

struct Contribution {
    tag: &'static str,
    share: f64,
}

/// Map a candidate's source plus its feature vector to the reason tag
/// set spec.md §4.F lists, ranked by relative share of the (positive)
/// score and capped at `max_reasons`.
pub fn explain(
    source: CandidateSource,
    features: &CandidateFeatures,
    weights: &RankWeightProfile,
    min_contribution: f64,
    max_reasons: usize,
) -> Vec<String> {
    let mut terms = vec![
        Contribution {
            tag: transition_tag(source),
            share: weights.w_transition * features.f_transition,
        },
        Contribution {
            tag: frequency_tag(source),
            share: weights.w_frequency * features.f_frequency,
        },
        Contribution {
            tag: "project_task",
            share: weights.w_task * features.f_task,
        },
        Contribution {
            tag: "workflow_boost",
            share: weights.w_affinity * features.f_affinity,
        },
        Contribution {
            tag: "pipeline_conf",
            share: weights.w_success * features.f_success,
        },
        Contribution {
            tag: "dismissal_penalty",
            share: weights.w_feedback * features.f_feedback,
        },
    ];
    if let Some(f_recovery) = features.f_recovery {
        terms.push(Contribution {
            tag: "recovery_boost",
            share: weights.w_recovery * f_recovery,
        });
    }

    let positive_total: f64 = terms.iter().map(|t| t.share.max(0.0)).sum();
    let mut reasons: Vec<String> = if positive_total > 0.0 {
        let mut ranked: Vec<&Contribution> = terms
            .iter()
            .filter(|t| t.share > 0.0 && t.share / positive_total >= min_contribution)
            .collect();
        ranked.sort_by(|a, b| b.share.partial_cmp(&a.share).unwrap_or(std::cmp::Ordering::Equal));
        ranked.into_iter().take(max_reasons).map(|t| t.tag.to_string()).collect()
    } else {
        Vec::new()
    };

    if features.f_risk_penalty > 0.0 {
        reasons.push("dangerous".to_string());
    }

    reasons
}

fn transition_tag(source: CandidateSource) -> &'static str {
    match source {
        CandidateSource::RepoTransition => "repo_transition",
        CandidateSource::DirTransition => "dir_transition",
        CandidateSource::GlobalTransition | CandidateSource::SessionTransition => "global_transition",
        _ => "global_transition",
    }
}

fn frequency_tag(source: CandidateSource) -> &'static str {
    match source {
        CandidateSource::RepoFrequency => "repo_frequency",
        CandidateSource::GlobalFrequency | CandidateSource::SessionFrequency => "global_frequency",
        _ => "dir_frequency",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::CandidateFeatures;

    fn features(f_transition: f64, f_risk_penalty: f64) -> CandidateFeatures {
        CandidateFeatures {
            f_transition,
            f_frequency: 0.0,
            f_success: 0.0,
            f_prefix: 1.0,
            f_affinity: 0.0,
            f_task: 0.0,
            f_feedback: 0.0,
            f_risk_penalty,
            f_recovery: None,
        }
    }

    #[test]
    fn dominant_transition_feature_yields_transition_tag() {
        let weights = RankWeightProfile::defaults("global");
        let reasons = explain(
            CandidateSource::RepoTransition,
            &features(1.0, 0.0),
            &weights,
            MIN_CONTRIBUTION_DEFAULT,
            MAX_REASONS_DEFAULT,
        );
        assert!(reasons.contains(&"repo_transition".to_string()));
    }

    #[test]
    fn dominant_feedback_feature_yields_dismissal_penalty_tag() {
        let weights = RankWeightProfile::defaults("global");
        let mut f = features(0.0, 0.0);
        f.f_feedback = 1.0;
        let reasons = explain(CandidateSource::GlobalTransition, &f, &weights, MIN_CONTRIBUTION_DEFAULT, MAX_REASONS_DEFAULT);
        assert!(reasons.contains(&"dismissal_penalty".to_string()));
    }

    #[test]
    fn risk_penalty_adds_dangerous_tag() {
        let weights = RankWeightProfile::defaults("global");
        let reasons = explain(
            CandidateSource::GlobalTransition,
            &features(1.0, 1.0),
            &weights,
            MIN_CONTRIBUTION_DEFAULT,
            MAX_REASONS_DEFAULT,
        );
        assert!(reasons.contains(&"dangerous".to_string()));
    }

    #[test]
    fn reasons_are_capped_at_max_reasons() {
        let weights = RankWeightProfile::defaults("global");
        let mut f = features(1.0, 0.0);
        f.f_frequency = 1.0;
        f.f_task = 1.0;
        f.f_affinity = 1.0;
        f.f_success = 1.0;
        let reasons = explain(CandidateSource::RepoTransition, &f, &weights, 0.01, 2);
        assert!(reasons.len() <= 2);
    }
}
