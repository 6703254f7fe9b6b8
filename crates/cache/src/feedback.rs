//! `RecordFeedback` handling (spec.md §4.G): maps a feedback action
//! onto the dismissal state machine, detects implicit acceptance, and
//! drives the online learner from the resulting accept/reject pair.

use suggestd_core::{FeedbackAction, RankWeightProfile, SuggestionFeedback};
use suggestd_rank::{compute_features, CandidateFeatures, FeatureContext};
use suggestd_store::{DismissalAction, Store, StoreResult};

use crate::learner::apply_update;

pub const FEEDBACK_MATCH_WINDOW_MS_DEFAULT: i64 = 5000;
pub const LEARNED_THRESHOLD_DEFAULT: u32 = 3;

fn dismissal_action_for(action: FeedbackAction) -> Option<DismissalAction> {
    match action {
        FeedbackAction::Dismissed => Some(DismissalAction::Dismiss),
        FeedbackAction::Accepted | FeedbackAction::EditedThenRun => Some(DismissalAction::Accept),
        FeedbackAction::Never => Some(DismissalAction::Never),
        FeedbackAction::Unblock => Some(DismissalAction::Unblock),
        FeedbackAction::IgnoredTimeout => None,
    }
}

/// True when the next executed command exactly matches the prior top
/// suggestion within the feedback match window — the implicit-accept
/// heuristic spec.md §4.G defines as an alternative trigger to an
/// explicit `accepted` feedback call.
pub fn is_implicit_accept(top_suggestion_text: &str, executed_text: &str, suggested_ts_ms: i64, executed_ts_ms: i64, window_ms: i64) -> bool {
    executed_text == top_suggestion_text && (executed_ts_ms - suggested_ts_ms).abs() <= window_ms
}

/// Record one feedback event: persist it, update the dismissal state
/// machine for `(scope, context_template_id, dismissed_template_id)`
/// when the action maps onto a transition, and return the committed
/// `DismissalAction` applied, if any.
pub async fn record_feedback(
    store: &Store,
    feedback: &SuggestionFeedback,
    scope: &str,
    context_template_id: &str,
    dismissed_template_id: &str,
    learned_threshold: u32,
    now_ms: i64,
) -> StoreResult<()> {
    store.append_suggestion_feedback(feedback).await?;

    if let Some(action) = dismissal_action_for(feedback.action) {
        store
            .apply_dismissal_action(scope, context_template_id, dismissed_template_id, action, learned_threshold, now_ms)
            .await?;
    }

    Ok(())
}

/// Commit one online-learner step from an accepted/rejected candidate
/// pair and persist the new weight profile (spec.md "Updates are
/// applied asynchronously and versioned").
pub async fn learn_from_feedback(store: &Store, prev: &RankWeightProfile, f_pos: &CandidateFeatures, f_neg: &CandidateFeatures) -> StoreResult<RankWeightProfile> {
    let next = apply_update(prev, f_pos, f_neg);
    store.put_rank_weight_profile(&next).await?;
    Ok(next)
}

/// Build the accepted/rejected feature pair from the literal
/// suggestion texts recorded in feedback, reusing the ranker's own
/// feature extraction so the learner moves weights in the same
/// feature space the ranker scores with.
pub fn features_for_pair(accepted_cmd_norm: &str, rejected_cmd_norm: &str, prefix: &str, now_ms: i64) -> (CandidateFeatures, CandidateFeatures) {
    use suggestd_candidates::{Candidate, CandidateSource};

    let ctx = FeatureContext {
        prefix,
        fuzzy_matched: false,
        fuzzy_max_edits: 1,
        now_ms,
        half_life_hours: suggestd_store::aggregates::HALF_LIFE_HOURS_DEFAULT,
        risk_flagged: false,
    };
    let as_candidate = |cmd_norm: &str| Candidate {
        template_id: String::new(),
        cmd_norm: cmd_norm.to_string(),
        source: CandidateSource::GlobalTransition,
        scope: String::new(),
        weight: 1.0,
        count: 1,
        success_rate: 1.0,
        last_seen_ms: now_ms,
        task: None,
        recovery_source: None,
    };
    (
        compute_features(&as_candidate(accepted_cmd_norm), &ctx),
        compute_features(&as_candidate(rejected_cmd_norm), &ctx),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use suggestd_core::SuppressionLevel;

    fn feedback(action: FeedbackAction) -> SuggestionFeedback {
        SuggestionFeedback {
            session_id: "s1".into(),
            ts_ms: 1000,
            prompt_prefix: Some("git".into()),
            suggested_text: "git add .".into(),
            action,
            executed_text: None,
            latency_ms: Some(10),
        }
    }

    #[tokio::test]
    async fn dismiss_feedback_creates_temporary_dismissal() {
        let store = Store::open_in_memory().await.unwrap();
        record_feedback(&store, &feedback(FeedbackAction::Dismissed), "global", "ctx", "dismissed", LEARNED_THRESHOLD_DEFAULT, 1000)
            .await
            .unwrap();
        let row = store.get_dismissal("global", "ctx", "dismissed").await.unwrap().unwrap();
        assert_eq!(row.suppression_level, SuppressionLevel::Temporary);
    }

    #[tokio::test]
    async fn repeated_dismiss_reaches_learned_threshold() {
        let store = Store::open_in_memory().await.unwrap();
        for i in 0..3 {
            record_feedback(&store, &feedback(FeedbackAction::Dismissed), "global", "ctx", "dismissed", 3, 1000 + i)
                .await
                .unwrap();
        }
        let row = store.get_dismissal("global", "ctx", "dismissed").await.unwrap().unwrap();
        assert_eq!(row.suppression_level, SuppressionLevel::Learned);
    }

    #[tokio::test]
    async fn ignored_timeout_does_not_touch_dismissal_state() {
        let store = Store::open_in_memory().await.unwrap();
        record_feedback(&store, &feedback(FeedbackAction::IgnoredTimeout), "global", "ctx", "dismissed", 3, 1000)
            .await
            .unwrap();
        assert!(store.get_dismissal("global", "ctx", "dismissed").await.unwrap().is_none());
    }

    #[test]
    fn implicit_accept_requires_exact_match_within_window() {
        assert!(is_implicit_accept("git add .", "git add .", 1000, 1500, FEEDBACK_MATCH_WINDOW_MS_DEFAULT));
        assert!(!is_implicit_accept("git add .", "git add .", 1000, 10_000, FEEDBACK_MATCH_WINDOW_MS_DEFAULT));
        assert!(!is_implicit_accept("git add .", "git commit", 1000, 1500, FEEDBACK_MATCH_WINDOW_MS_DEFAULT));
    }

    #[tokio::test]
    async fn learn_from_feedback_persists_new_profile() {
        let store = Store::open_in_memory().await.unwrap();
        let mut prev = RankWeightProfile::defaults("global");
        prev.sample_count = 40;
        store.put_rank_weight_profile(&prev).await.unwrap();

        let (f_pos, f_neg) = features_for_pair("git add .", "git status", "", 1000);
        let next = learn_from_feedback(&store, &prev, &f_pos, &f_neg).await.unwrap();
        let persisted = store.get_rank_weight_profile("global").await.unwrap().unwrap();
        assert_eq!(persisted.sample_count, next.sample_count);
    }
}
