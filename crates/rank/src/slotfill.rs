//! Slot filling (spec.md §4.F): turns a candidate's slot-marker
//! template (`git add <path>`) into literal suggestion text by
//! sampling `slot_correlation` for declared dependency sets and
//! `slot_stat` for independent slots, each with a session → repo →
//! global fallback chain.

use suggestd_core::declared_dependency_sets;
use suggestd_store::{Store, StoreResult};

pub const SLOT_CORRELATION_MIN_CONFIDENCE_DEFAULT: f64 = 0.65;

#[derive(Debug, Clone, Copy)]
pub struct SlotFillConfig {
    pub min_correlation_confidence: f64,
    /// When false (default), a template with any slot left unfilled is
    /// dropped rather than emitted with literal `<type>` placeholders.
    pub support_partial_slots: bool,
}

impl Default for SlotFillConfig {
    fn default() -> Self {
        Self {
            min_correlation_confidence: SLOT_CORRELATION_MIN_CONFIDENCE_DEFAULT,
            support_partial_slots: false,
        }
    }
}

/// Replace each `<type>` marker in `cmd_norm`, in order, with a sampled
/// literal value. Returns `None` when slots remain unfilled and
/// `support_partial_slots` is off.
pub async fn fill_slots(
    store: &Store,
    scope_chain: &[String],
    template_id: &str,
    cmd_norm: &str,
    slot_count: usize,
    config: &SlotFillConfig,
) -> StoreResult<Option<String>> {
    if slot_count == 0 {
        return Ok(Some(cmd_norm.to_string()));
    }

    let mut filled: Vec<Option<String>> = vec![None; slot_count];

    for dependency_set in declared_dependency_sets(cmd_norm) {
        if dependency_set.iter().any(|&i| filled[i].is_some()) {
            continue;
        }
        let slot_key = dependency_set
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        if let Some(values) = best_correlation_tuple(store, scope_chain, template_id, &slot_key, config).await? {
            if values.len() == dependency_set.len() {
                for (&idx, value) in dependency_set.iter().zip(values.into_iter()) {
                    filled[idx] = Some(value);
                }
            }
        }
    }

    for (idx, slot) in filled.iter_mut().enumerate() {
        if slot.is_some() {
            continue;
        }
        *slot = best_slot_value(store, scope_chain, template_id, idx as u32).await?;
    }

    if !config.support_partial_slots && filled.iter().any(Option::is_none) {
        return Ok(None);
    }

    Ok(Some(substitute_markers(cmd_norm, &filled)))
}

async fn best_correlation_tuple(
    store: &Store,
    scope_chain: &[String],
    template_id: &str,
    slot_key: &str,
    config: &SlotFillConfig,
) -> StoreResult<Option<Vec<String>>> {
    for scope in scope_chain {
        let rows = store.list_slot_correlations(scope, template_id, slot_key).await?;
        if rows.is_empty() {
            continue;
        }
        let total_weight: f64 = rows.iter().map(|r| r.weight).sum();
        if total_weight <= 0.0 {
            continue;
        }
        let top = &rows[0];
        let confidence = top.weight / total_weight;
        if confidence < config.min_correlation_confidence {
            continue;
        }
        if let Ok(values) = serde_json::from_str::<Vec<String>>(&top.tuple_value_json) {
            return Ok(Some(values));
        }
    }
    Ok(None)
}

async fn best_slot_value(
    store: &Store,
    scope_chain: &[String],
    template_id: &str,
    slot_index: u32,
) -> StoreResult<Option<String>> {
    for scope in scope_chain {
        let rows = store.list_slot_stats(scope, template_id, slot_index).await?;
        if let Some(top) = rows.into_iter().next() {
            return Ok(Some(top.value));
        }
    }
    Ok(None)
}

fn substitute_markers(cmd_norm: &str, filled: &[Option<String>]) -> String {
    let mut slot_iter = filled.iter();
    cmd_norm
        .split(' ')
        .map(|token| {
            if !token.starts_with('<') || !token.ends_with('>') {
                return token.to_string();
            }
            match slot_iter.next() {
                Some(Some(value)) => value.clone(),
                _ => token.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use suggestd_core::{normalize, Scope};

    #[tokio::test]
    async fn fills_independent_slot_from_slot_stat() {
        let store = Store::open_in_memory().await.unwrap();
        let n = normalize("git checkout main");
        store
            .upsert_command_template(&n.template_id, &n.cmd_norm, n.slots.len() as u32, 1000)
            .await
            .unwrap();
        let mut tx = store.pool().begin().await.unwrap();
        Store::upsert_slot_stat_tx(&mut tx, &Scope::Global.as_key(), &n.template_id, 0, "main", 1000, 168.0)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let config = SlotFillConfig::default();
        let filled = fill_slots(
            &store,
            &[Scope::Global.as_key()],
            &n.template_id,
            &n.cmd_norm,
            n.slots.len(),
            &config,
        )
        .await
        .unwrap();
        assert_eq!(filled.as_deref(), Some("git checkout main"));
    }

    #[tokio::test]
    async fn unfilled_slot_drops_candidate_without_partial_support() {
        let store = Store::open_in_memory().await.unwrap();
        let n = normalize("git checkout main");
        store
            .upsert_command_template(&n.template_id, &n.cmd_norm, n.slots.len() as u32, 1000)
            .await
            .unwrap();

        let config = SlotFillConfig::default();
        let filled = fill_slots(
            &store,
            &[Scope::Global.as_key()],
            &n.template_id,
            &n.cmd_norm,
            n.slots.len(),
            &config,
        )
        .await
        .unwrap();
        assert!(filled.is_none());
    }

    #[tokio::test]
    async fn partial_slots_allowed_when_configured() {
        let store = Store::open_in_memory().await.unwrap();
        let n = normalize("git checkout main");
        store
            .upsert_command_template(&n.template_id, &n.cmd_norm, n.slots.len() as u32, 1000)
            .await
            .unwrap();

        let config = SlotFillConfig {
            support_partial_slots: true,
            ..SlotFillConfig::default()
        };
        let filled = fill_slots(
            &store,
            &[Scope::Global.as_key()],
            &n.template_id,
            &n.cmd_norm,
            n.slots.len(),
            &config,
        )
        .await
        .unwrap();
        assert_eq!(filled.as_deref(), Some("git checkout <arg>"));
    }
}
