//! Dismissal filter (spec.md §4.F "Before final ordering, drop
//! candidates whose dismissal state is `learned` or `permanent`").

use suggestd_core::SuppressionLevel;
use suggestd_store::{Store, StoreResult};

/// True when `(scope, context_template_id, dismissed_template_id)` is
/// suppressed and should never reach the final ordering.
pub async fn is_suppressed(
    store: &Store,
    scope: &str,
    context_template_id: &str,
    dismissed_template_id: &str,
) -> StoreResult<bool> {
    let dismissal = store
        .get_dismissal(scope, context_template_id, dismissed_template_id)
        .await?;
    Ok(matches!(
        dismissal.map(|d| d.suppression_level),
        Some(SuppressionLevel::Learned) | Some(SuppressionLevel::Permanent)
    ))
}
