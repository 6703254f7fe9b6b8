// crates/store/src/maintenance.rs
//! Background maintenance operations (spec.md §4.C "Maintenance loop"):
//! WAL checkpointing, FTS index optimization, and retention pruning.
//! Run periodically by the daemon's maintenance task, never inline with
//! a request.

use crate::{Store, StoreResult};
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub retention_max_events: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: crate::RETENTION_DAYS_DEFAULT,
            retention_max_events: crate::RETENTION_MAX_EVENTS_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceReport {
    pub events_pruned_by_age: u64,
    pub events_pruned_by_cap: u64,
    pub zero_weight_rows_pruned: u64,
}

impl Store {
    /// Force a WAL checkpoint, folding the write-ahead log back into the
    /// main database file. Cheap and safe to call from a timer.
    pub async fn checkpoint_wal(&self) -> StoreResult<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Rebuild the FTS5 index's internal b-tree, merging small segments
    /// (the 'optimize' special FTS5 command).
    pub async fn optimize_fts(&self) -> StoreResult<()> {
        sqlx::query("INSERT INTO command_event_fts(command_event_fts) VALUES ('optimize')")
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Delete `command_event` rows older than `retention_days`, then
    /// (if still over `retention_max_events`) delete the oldest rows
    /// down to the cap. FTS rows follow via the delete triggers.
    pub async fn prune_retention(
        &self,
        policy: RetentionPolicy,
        now_ms: i64,
    ) -> StoreResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();

        let cutoff_ms = now_ms - (policy.retention_days as i64) * 86_400_000;
        let result = sqlx::query("DELETE FROM command_event WHERE ts_ms < ?")
            .bind(cutoff_ms)
            .execute(self.pool())
            .await?;
        report.events_pruned_by_age = result.rows_affected();

        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM command_event")
            .fetch_one(self.pool())
            .await?;
        if (total.0 as u64) > policy.retention_max_events {
            let excess = total.0 as u64 - policy.retention_max_events;
            let result = sqlx::query(
                r#"DELETE FROM command_event WHERE id IN (
                    SELECT id FROM command_event ORDER BY ts_ms ASC LIMIT ?
                )"#,
            )
            .bind(excess as i64)
            .execute(self.pool())
            .await?;
            report.events_pruned_by_cap = result.rows_affected();
        }

        if report.events_pruned_by_age > 0 || report.events_pruned_by_cap > 0 {
            info!(
                pruned_by_age = report.events_pruned_by_age,
                pruned_by_cap = report.events_pruned_by_cap,
                "pruned command_event rows by retention policy"
            );
        }

        Ok(report)
    }

    /// Prune aggregate rows whose weight has decayed to (near) zero and
    /// that haven't been touched in at least `2 * half_life_hours`
    /// (spec.md §4.C: "prune zero-weight aggregate rows older than 2x
    /// half-life"). Applies to `transition_stat`, `command_stat`,
    /// `slot_stat`, and `slot_correlation`.
    pub async fn prune_decayed_aggregates(
        &self,
        half_life_hours: f64,
        now_ms: i64,
        weight_floor: f64,
    ) -> StoreResult<MaintenanceReport> {
        let cutoff_ms = now_ms - (2.0 * half_life_hours * 3_600_000.0) as i64;
        let mut pruned = 0u64;

        for table in [
            "transition_stat",
            "slot_stat",
            "slot_correlation",
            "command_stat",
        ] {
            let weight_column = if table == "command_stat" {
                "score"
            } else {
                "weight"
            };
            let query = format!(
                "DELETE FROM {table} WHERE {weight_column} <= ? AND last_seen_ms < ?"
            );
            let result = sqlx::query(&query)
                .bind(weight_floor)
                .bind(cutoff_ms)
                .execute(self.pool())
                .await?;
            pruned += result.rows_affected();
        }

        Ok(MaintenanceReport {
            zero_weight_rows_pruned: pruned,
            ..Default::default()
        })
    }

    /// Run the full maintenance pass in the order the spec prescribes:
    /// prune, then checkpoint, then reindex.
    pub async fn run_maintenance_pass(
        &self,
        policy: RetentionPolicy,
        half_life_hours: f64,
        now_ms: i64,
    ) -> StoreResult<MaintenanceReport> {
        let mut report = self.prune_retention(policy, now_ms).await?;
        let decay_report = self
            .prune_decayed_aggregates(half_life_hours, now_ms, 0.01)
            .await?;
        report.zero_weight_rows_pruned = decay_report.zero_weight_rows_pruned;
        self.checkpoint_wal().await?;
        self.optimize_fts().await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregates::HALF_LIFE_HOURS_DEFAULT;

    #[tokio::test]
    async fn prune_retention_removes_old_events_and_respects_cap() {
        let store = Store::open_in_memory().await.unwrap();
        let mut tx = store.pool().begin().await.unwrap();
        Store::insert_command_event_tx(
            &mut tx, "s1", 1_000, "/tmp", None, None, "ls", "ls", false, "t1", Some(0), Some(5),
        )
        .await
        .unwrap();
        Store::insert_command_event_tx(
            &mut tx, "s1", 200_000_000_000, "/tmp", None, None, "ls", "ls", false, "t1", Some(0),
            Some(5),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let report = store
            .prune_retention(
                RetentionPolicy {
                    retention_days: 90,
                    retention_max_events: 500_000,
                },
                200_000_000_000,
            )
            .await
            .unwrap();
        assert_eq!(report.events_pruned_by_age, 1);
    }

    #[tokio::test]
    async fn prune_decayed_aggregates_drops_stale_zero_weight_rows() {
        let store = Store::open_in_memory().await.unwrap();
        let mut tx = store.pool().begin().await.unwrap();
        crate::Store::upsert_transition_stat_tx(&mut tx, "global", "t1", "t2", 1_000, HALF_LIFE_HOURS_DEFAULT)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let far_future = 1_000 + (3.0 * HALF_LIFE_HOURS_DEFAULT * 3_600_000.0) as i64;
        let report = store
            .prune_decayed_aggregates(HALF_LIFE_HOURS_DEFAULT, far_future, 1.0)
            .await
            .unwrap();
        assert_eq!(report.zero_weight_rows_pruned, 1);
    }

    #[tokio::test]
    async fn checkpoint_and_optimize_do_not_error_on_empty_store() {
        let store = Store::open_in_memory().await.unwrap();
        store.checkpoint_wal().await.unwrap();
        store.optimize_fts().await.unwrap();
    }
}
