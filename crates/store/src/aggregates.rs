// crates/store/src/aggregates.rs
//! Typed read/write operations over the aggregate tables spec.md §3
//! defines. These are the primitives the ingestion pipeline composes
//! into the `apply_command_end` transaction (spec.md §4.D) and the
//! candidate generator reads from (spec.md §4.E).

use crate::{Store, StoreResult};
use serde_json;
use sqlx::{Sqlite, Transaction};
use suggestd_core::{
    CommandEvent, CommandStat, CommandTemplate, DismissalPattern, FailureRecoveryEdge,
    RankWeightProfile, RecoverySource, Session, SlotCorrelation, SlotStat, SuggestionFeedback,
    SuppressionLevel, TaskCandidate, TaskSource, TransitionStat, SLOT_STAT_MAX_VALUES,
};

/// Half-life decay applied to every aggregate weight update, per
/// spec.md §4.D "Time decay": `weight' = weight * 2^(-dt/H) + increment`.
pub fn decay(weight: f64, delta_ms: i64, half_life_hours: f64) -> f64 {
    if half_life_hours <= 0.0 {
        return weight;
    }
    let delta_hours = (delta_ms.max(0) as f64) / 3_600_000.0;
    weight * 2f64.powf(-delta_hours / half_life_hours)
}

pub const HALF_LIFE_HOURS_DEFAULT: f64 = 168.0;

impl Store {
    pub async fn upsert_session(&self, session: &Session) -> StoreResult<()> {
        let project_types = serde_json::to_string(&session.project_types).unwrap_or_default();
        sqlx::query(
            r#"INSERT INTO session (session_id, shell, started_ms, host, user, initial_cwd, project_types, ended_ms)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(session_id) DO UPDATE SET ended_ms = excluded.ended_ms"#,
        )
        .bind(&session.session_id)
        .bind(&session.shell)
        .bind(session.started_ms)
        .bind(&session.host)
        .bind(&session.user)
        .bind(&session.initial_cwd)
        .bind(project_types)
        .bind(session.ended_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_session_ended(&self, session_id: &str, ended_ms: i64) -> StoreResult<()> {
        sqlx::query("UPDATE session SET ended_ms = ? WHERE session_id = ?")
            .bind(ended_ms)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_command_template(
        &self,
        template_id: &str,
        cmd_norm: &str,
        slot_count: u32,
        now_ms: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO command_template (template_id, cmd_norm, slot_count, first_seen_ms, last_seen_ms)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(template_id) DO UPDATE SET last_seen_ms = excluded.last_seen_ms"#,
        )
        .bind(template_id)
        .bind(cmd_norm)
        .bind(slot_count)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_command_template(
        &self,
        template_id: &str,
    ) -> StoreResult<Option<CommandTemplate>> {
        let row = sqlx::query_as::<_, (String, String, i64, i64, i64)>(
            "SELECT template_id, cmd_norm, slot_count, first_seen_ms, last_seen_ms FROM command_template WHERE template_id = ?",
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(template_id, cmd_norm, slot_count, first_seen_ms, last_seen_ms)| {
            CommandTemplate {
                template_id,
                cmd_norm,
                slot_count: slot_count as u32,
                first_seen_ms,
                last_seen_ms,
            }
        }))
    }

    /// Insert one `command_event` row within a caller-held transaction,
    /// returning the new row id. Only called for non-ephemeral events
    /// (spec.md invariant I2).
    pub async fn insert_command_event_tx(
        tx: &mut Transaction<'_, Sqlite>,
        session_id: &str,
        ts_ms: i64,
        cwd: &str,
        repo_key: Option<&str>,
        branch: Option<&str>,
        cmd_raw: &str,
        cmd_norm: &str,
        cmd_truncated: bool,
        template_id: &str,
        exit_code: Option<i32>,
        duration_ms: Option<i64>,
    ) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO command_event
                (session_id, ts_ms, cwd, repo_key, branch, cmd_raw, cmd_norm, cmd_truncated, template_id, exit_code, duration_ms, ephemeral)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)"#,
        )
        .bind(session_id)
        .bind(ts_ms)
        .bind(cwd)
        .bind(repo_key)
        .bind(branch)
        .bind(cmd_raw)
        .bind(cmd_norm)
        .bind(cmd_truncated)
        .bind(template_id)
        .bind(exit_code)
        .bind(duration_ms)
        .execute(&mut **tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Most recent non-ephemeral `command_event` for `session_id`, used
    /// by the candidate generator to recover `prev_template_id` and the
    /// failed-last-command typo trigger (spec.md §4.E) when the caller
    /// didn't pass `last_cmd_norm`/`last_event_seq` explicitly.
    pub async fn get_last_command_event(
        &self,
        session_id: &str,
    ) -> StoreResult<Option<CommandEvent>> {
        let row = sqlx::query_as::<_, (i64, String, i64, String, Option<String>, Option<String>, String, String, bool, String, Option<i32>, Option<i64>)>(
            r#"SELECT id, session_id, ts_ms, cwd, repo_key, branch, cmd_raw, cmd_norm, cmd_truncated, template_id, exit_code, duration_ms
               FROM command_event WHERE session_id = ? ORDER BY ts_ms DESC, id DESC LIMIT 1"#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(
            |(id, session_id, ts_ms, cwd, repo_key, branch, cmd_raw, cmd_norm, cmd_truncated, template_id, exit_code, duration_ms)| {
                CommandEvent {
                    id,
                    session_id,
                    ts_ms,
                    cwd,
                    repo_key,
                    branch,
                    cmd_raw,
                    cmd_norm,
                    cmd_truncated,
                    template_id,
                    exit_code,
                    duration_ms,
                    ephemeral: false,
                }
            },
        ))
    }

    /// Most recent non-ephemeral command events, optionally scoped to a
    /// session or repo, most-recent-first. Backs the `Search` op's
    /// substring-scan fallback (spec.md §6 `SearchBackend::Fallback`),
    /// which scans `cmd_raw` directly rather than going through the FTS
    /// index.
    pub async fn list_recent_command_events(
        &self,
        session_id: Option<&str>,
        repo_key: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<CommandEvent>> {
        let rows = sqlx::query_as::<_, (i64, String, i64, String, Option<String>, Option<String>, String, String, bool, String, Option<i32>, Option<i64>)>(
            r#"SELECT id, session_id, ts_ms, cwd, repo_key, branch, cmd_raw, cmd_norm, cmd_truncated, template_id, exit_code, duration_ms
               FROM command_event
               WHERE ephemeral = 0
                 AND (?1 IS NULL OR session_id = ?1)
                 AND (?2 IS NULL OR repo_key = ?2)
               ORDER BY ts_ms DESC, id DESC LIMIT ?3"#,
        )
        .bind(session_id)
        .bind(repo_key)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(id, session_id, ts_ms, cwd, repo_key, branch, cmd_raw, cmd_norm, cmd_truncated, template_id, exit_code, duration_ms)| CommandEvent {
                    id,
                    session_id,
                    ts_ms,
                    cwd,
                    repo_key,
                    branch,
                    cmd_raw,
                    cmd_norm,
                    cmd_truncated,
                    template_id,
                    exit_code,
                    duration_ms,
                    ephemeral: false,
                },
            )
            .collect())
    }

    pub async fn upsert_command_stat_tx(
        tx: &mut Transaction<'_, Sqlite>,
        scope: &str,
        template_id: &str,
        success: bool,
        now_ms: i64,
        half_life_hours: f64,
    ) -> StoreResult<()> {
        let existing = sqlx::query_as::<_, (f64, i64, i64, i64)>(
            "SELECT score, success_count, failure_count, last_seen_ms FROM command_stat WHERE scope = ? AND template_id = ?",
        )
        .bind(scope)
        .bind(template_id)
        .fetch_optional(&mut **tx)
        .await?;

        let (score, mut success_count, mut failure_count, last_seen_ms) =
            existing.unwrap_or((0.0, 0, 0, now_ms));
        let decayed_score = decay(score, now_ms - last_seen_ms, half_life_hours) + 1.0;
        if success {
            success_count += 1;
        } else {
            failure_count += 1;
        }

        sqlx::query(
            r#"INSERT INTO command_stat (scope, template_id, score, success_count, failure_count, last_seen_ms)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(scope, template_id) DO UPDATE SET
                 score = excluded.score,
                 success_count = excluded.success_count,
                 failure_count = excluded.failure_count,
                 last_seen_ms = excluded.last_seen_ms"#,
        )
        .bind(scope)
        .bind(template_id)
        .bind(decayed_score)
        .bind(success_count)
        .bind(failure_count)
        .bind(now_ms)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn list_command_stats(&self, scope: &str) -> StoreResult<Vec<CommandStat>> {
        let rows = sqlx::query_as::<_, (String, String, f64, i64, i64, i64)>(
            "SELECT scope, template_id, score, success_count, failure_count, last_seen_ms FROM command_stat WHERE scope = ? ORDER BY score DESC",
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(scope, template_id, score, success_count, failure_count, last_seen_ms)| {
                CommandStat {
                    scope,
                    template_id,
                    score,
                    success_count: success_count as u64,
                    failure_count: failure_count as u64,
                    last_seen_ms,
                }
            })
            .collect())
    }

    pub async fn upsert_transition_stat_tx(
        tx: &mut Transaction<'_, Sqlite>,
        scope: &str,
        prev_template_id: &str,
        next_template_id: &str,
        now_ms: i64,
        half_life_hours: f64,
    ) -> StoreResult<()> {
        let existing = sqlx::query_as::<_, (f64, i64, i64)>(
            "SELECT weight, count, last_seen_ms FROM transition_stat WHERE scope = ? AND prev_template_id = ? AND next_template_id = ?",
        )
        .bind(scope)
        .bind(prev_template_id)
        .bind(next_template_id)
        .fetch_optional(&mut **tx)
        .await?;

        let (weight, count, last_seen_ms) = existing.unwrap_or((0.0, 0, now_ms));
        let next_weight = decay(weight, now_ms - last_seen_ms, half_life_hours) + 1.0;

        sqlx::query(
            r#"INSERT INTO transition_stat (scope, prev_template_id, next_template_id, weight, count, last_seen_ms)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(scope, prev_template_id, next_template_id) DO UPDATE SET
                 weight = excluded.weight, count = excluded.count, last_seen_ms = excluded.last_seen_ms"#,
        )
        .bind(scope)
        .bind(prev_template_id)
        .bind(next_template_id)
        .bind(next_weight)
        .bind(count + 1)
        .bind(now_ms)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn list_transitions_from(
        &self,
        scope: &str,
        prev_template_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<TransitionStat>> {
        let rows = sqlx::query_as::<_, (String, String, String, f64, i64, i64)>(
            r#"SELECT scope, prev_template_id, next_template_id, weight, count, last_seen_ms
               FROM transition_stat WHERE scope = ? AND prev_template_id = ?
               ORDER BY weight DESC LIMIT ?"#,
        )
        .bind(scope)
        .bind(prev_template_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(scope, prev_template_id, next_template_id, weight, count, last_seen_ms)| {
                TransitionStat {
                    scope,
                    prev_template_id,
                    next_template_id,
                    weight,
                    count: count as u64,
                    last_seen_ms,
                }
            })
            .collect())
    }

    /// Upsert one slot value observation, evicting the lowest-weighted
    /// value once the per-slot cap is exceeded (spec.md §3 SlotStat,
    /// §4.D step 5).
    pub async fn upsert_slot_stat_tx(
        tx: &mut Transaction<'_, Sqlite>,
        scope: &str,
        template_id: &str,
        slot_index: u32,
        value: &str,
        now_ms: i64,
        half_life_hours: f64,
    ) -> StoreResult<()> {
        let existing = sqlx::query_as::<_, (f64, i64, i64)>(
            "SELECT weight, count, last_seen_ms FROM slot_stat WHERE scope = ? AND template_id = ? AND slot_index = ? AND value = ?",
        )
        .bind(scope)
        .bind(template_id)
        .bind(slot_index)
        .bind(value)
        .fetch_optional(&mut **tx)
        .await?;
        let (weight, count, last_seen_ms) = existing.unwrap_or((0.0, 0, now_ms));
        let next_weight = decay(weight, now_ms - last_seen_ms, half_life_hours) + 1.0;

        sqlx::query(
            r#"INSERT INTO slot_stat (scope, template_id, slot_index, value, weight, count, last_seen_ms)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(scope, template_id, slot_index, value) DO UPDATE SET
                 weight = excluded.weight, count = excluded.count, last_seen_ms = excluded.last_seen_ms"#,
        )
        .bind(scope)
        .bind(template_id)
        .bind(slot_index)
        .bind(value)
        .bind(next_weight)
        .bind(count + 1)
        .bind(now_ms)
        .execute(&mut **tx)
        .await?;

        let distinct_count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM slot_stat WHERE scope = ? AND template_id = ? AND slot_index = ?",
        )
        .bind(scope)
        .bind(template_id)
        .bind(slot_index)
        .fetch_one(&mut **tx)
        .await?;

        if distinct_count.0 as usize > SLOT_STAT_MAX_VALUES {
            sqlx::query(
                r#"DELETE FROM slot_stat WHERE rowid IN (
                    SELECT rowid FROM slot_stat WHERE scope = ? AND template_id = ? AND slot_index = ?
                    ORDER BY weight ASC LIMIT 1
                )"#,
            )
            .bind(scope)
            .bind(template_id)
            .bind(slot_index)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    pub async fn list_slot_stats(
        &self,
        scope: &str,
        template_id: &str,
        slot_index: u32,
    ) -> StoreResult<Vec<SlotStat>> {
        let rows = sqlx::query_as::<_, (String, String, i64, String, f64, i64, i64)>(
            r#"SELECT scope, template_id, slot_index, value, weight, count, last_seen_ms
               FROM slot_stat WHERE scope = ? AND template_id = ? AND slot_index = ?
               ORDER BY weight DESC"#,
        )
        .bind(scope)
        .bind(template_id)
        .bind(slot_index)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(scope, template_id, slot_index, value, weight, count, last_seen_ms)| SlotStat {
                scope,
                template_id,
                slot_index: slot_index as u32,
                value,
                weight,
                count: count as u64,
                last_seen_ms,
            })
            .collect())
    }

    pub async fn upsert_slot_correlation_tx(
        tx: &mut Transaction<'_, Sqlite>,
        scope: &str,
        template_id: &str,
        slot_key: &str,
        tuple_hash: &str,
        tuple_value_json: &str,
        now_ms: i64,
        half_life_hours: f64,
    ) -> StoreResult<()> {
        let existing = sqlx::query_as::<_, (f64, i64, i64)>(
            "SELECT weight, count, last_seen_ms FROM slot_correlation WHERE scope = ? AND template_id = ? AND slot_key = ? AND tuple_hash = ?",
        )
        .bind(scope)
        .bind(template_id)
        .bind(slot_key)
        .bind(tuple_hash)
        .fetch_optional(&mut **tx)
        .await?;
        let (weight, count, last_seen_ms) = existing.unwrap_or((0.0, 0, now_ms));
        let next_weight = decay(weight, now_ms - last_seen_ms, half_life_hours) + 1.0;

        sqlx::query(
            r#"INSERT INTO slot_correlation (scope, template_id, slot_key, tuple_hash, tuple_value_json, weight, count, last_seen_ms)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(scope, template_id, slot_key, tuple_hash) DO UPDATE SET
                 weight = excluded.weight, count = excluded.count, last_seen_ms = excluded.last_seen_ms"#,
        )
        .bind(scope)
        .bind(template_id)
        .bind(slot_key)
        .bind(tuple_hash)
        .bind(tuple_value_json)
        .bind(next_weight)
        .bind(count + 1)
        .bind(now_ms)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn list_slot_correlations(
        &self,
        scope: &str,
        template_id: &str,
        slot_key: &str,
    ) -> StoreResult<Vec<SlotCorrelation>> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String, f64, i64, i64)>(
            r#"SELECT scope, template_id, slot_key, tuple_hash, tuple_value_json, weight, count, last_seen_ms
               FROM slot_correlation WHERE scope = ? AND template_id = ? AND slot_key = ?
               ORDER BY weight DESC"#,
        )
        .bind(scope)
        .bind(template_id)
        .bind(slot_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(scope, template_id, slot_key, tuple_hash, tuple_value_json, weight, count, last_seen_ms)| {
                    SlotCorrelation {
                        scope,
                        template_id,
                        slot_key,
                        tuple_hash,
                        tuple_value_json,
                        weight,
                        count: count as u64,
                        last_seen_ms,
                    }
                },
            )
            .collect())
    }

    /// Upsert a failure-recovery edge, folding in one more outcome
    /// observation (spec.md §4.D step 7).
    pub async fn upsert_failure_recovery_tx(
        tx: &mut Transaction<'_, Sqlite>,
        scope: &str,
        failed_template_id: &str,
        exit_code_class: &str,
        recovery_template_id: &str,
        succeeded: bool,
        now_ms: i64,
    ) -> StoreResult<()> {
        let existing = sqlx::query_as::<_, (f64, i64, f64)>(
            r#"SELECT weight, count, success_rate FROM failure_recovery
               WHERE scope = ? AND failed_template_id = ? AND exit_code_class = ? AND recovery_template_id = ?"#,
        )
        .bind(scope)
        .bind(failed_template_id)
        .bind(exit_code_class)
        .bind(recovery_template_id)
        .fetch_optional(&mut **tx)
        .await?;

        let (_weight, count, success_rate) = existing.unwrap_or((0.0, 0, 0.0));
        let next_count = count + 1;
        let next_success_rate =
            (success_rate * count as f64 + if succeeded { 1.0 } else { 0.0 }) / next_count as f64;

        sqlx::query(
            r#"INSERT INTO failure_recovery
                (scope, failed_template_id, exit_code_class, recovery_template_id, weight, count, success_rate, last_seen_ms, source)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'learned')
               ON CONFLICT(scope, failed_template_id, exit_code_class, recovery_template_id) DO UPDATE SET
                 weight = excluded.weight, count = excluded.count, success_rate = excluded.success_rate, last_seen_ms = excluded.last_seen_ms"#,
        )
        .bind(scope)
        .bind(failed_template_id)
        .bind(exit_code_class)
        .bind(recovery_template_id)
        .bind(next_count as f64)
        .bind(next_count)
        .bind(next_success_rate)
        .bind(now_ms)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn list_failure_recovery(
        &self,
        scope: &str,
        failed_template_id: &str,
        exit_code_class: &str,
        include_bootstrap: bool,
    ) -> StoreResult<Vec<FailureRecoveryEdge>> {
        let wildcard = suggestd_core::RECOVERY_WILDCARD;
        let rows = sqlx::query_as::<_, (String, String, String, String, f64, i64, f64, i64, String)>(
            r#"SELECT scope, failed_template_id, exit_code_class, recovery_template_id, weight, count, success_rate, last_seen_ms, source
               FROM failure_recovery
               WHERE scope = ? AND exit_code_class = ? AND (failed_template_id = ? OR (? AND failed_template_id = ?))
               ORDER BY weight DESC"#,
        )
        .bind(scope)
        .bind(exit_code_class)
        .bind(failed_template_id)
        .bind(include_bootstrap)
        .bind(wildcard)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(
                |(scope, failed_template_id, exit_code_class, recovery_template_id, weight, count, success_rate, last_seen_ms, source)| {
                    Some(FailureRecoveryEdge {
                        scope,
                        failed_template_id,
                        exit_code_class,
                        recovery_template_id,
                        weight,
                        count: count as u64,
                        success_rate,
                        last_seen_ms,
                        source: match source.as_str() {
                            "bootstrap" => RecoverySource::Bootstrap,
                            _ => RecoverySource::Learned,
                        },
                    })
                },
            )
            .collect())
    }

    /// Dismissal state machine transition (spec.md §4.G table).
    /// `accept` and `unblock` delete the row; other actions upsert.
    pub async fn apply_dismissal_action(
        &self,
        scope: &str,
        context_template_id: &str,
        dismissed_template_id: &str,
        action: DismissalAction,
        learned_threshold: u32,
        now_ms: i64,
    ) -> StoreResult<Option<SuppressionLevel>> {
        let existing = sqlx::query_as::<_, (i64, String)>(
            r#"SELECT dismissal_count, suppression_level FROM dismissal_pattern
               WHERE scope = ? AND context_template_id = ? AND dismissed_template_id = ?"#,
        )
        .bind(scope)
        .bind(context_template_id)
        .bind(dismissed_template_id)
        .fetch_optional(&self.pool)
        .await?;

        let current_level = existing
            .as_ref()
            .and_then(|(_, level)| parse_suppression_level(level));

        match action {
            DismissalAction::Accept | DismissalAction::Unblock => {
                if current_level == Some(SuppressionLevel::Permanent)
                    && action == DismissalAction::Accept
                {
                    // Accept never downgrades `permanent` (I6); a permanent
                    // suggestion should not have been surfaced to accept in
                    // the first place, but guard here too.
                    return Ok(Some(SuppressionLevel::Permanent));
                }
                sqlx::query(
                    "DELETE FROM dismissal_pattern WHERE scope = ? AND context_template_id = ? AND dismissed_template_id = ?",
                )
                .bind(scope)
                .bind(context_template_id)
                .bind(dismissed_template_id)
                .execute(&self.pool)
                .await?;
                Ok(None)
            }
            DismissalAction::Dismiss => {
                if current_level == Some(SuppressionLevel::Permanent) {
                    return Ok(Some(SuppressionLevel::Permanent));
                }
                let next_count = existing.as_ref().map(|(c, _)| *c + 1).unwrap_or(1);
                let next_level = if next_count as u32 >= learned_threshold {
                    SuppressionLevel::Learned
                } else {
                    SuppressionLevel::Temporary
                };
                self.upsert_dismissal_row(
                    scope,
                    context_template_id,
                    dismissed_template_id,
                    next_count,
                    now_ms,
                    next_level,
                )
                .await?;
                Ok(Some(next_level))
            }
            DismissalAction::Never => {
                self.upsert_dismissal_row(
                    scope,
                    context_template_id,
                    dismissed_template_id,
                    existing.map(|(c, _)| c).unwrap_or(0),
                    now_ms,
                    SuppressionLevel::Permanent,
                )
                .await?;
                Ok(Some(SuppressionLevel::Permanent))
            }
        }
    }

    async fn upsert_dismissal_row(
        &self,
        scope: &str,
        context_template_id: &str,
        dismissed_template_id: &str,
        count: i64,
        now_ms: i64,
        level: SuppressionLevel,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO dismissal_pattern (scope, context_template_id, dismissed_template_id, dismissal_count, last_dismissed_ms, suppression_level)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(scope, context_template_id, dismissed_template_id) DO UPDATE SET
                 dismissal_count = excluded.dismissal_count,
                 last_dismissed_ms = excluded.last_dismissed_ms,
                 suppression_level = excluded.suppression_level"#,
        )
        .bind(scope)
        .bind(context_template_id)
        .bind(dismissed_template_id)
        .bind(count)
        .bind(now_ms)
        .bind(suppression_level_str(level))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_dismissal(
        &self,
        scope: &str,
        context_template_id: &str,
        dismissed_template_id: &str,
    ) -> StoreResult<Option<DismissalPattern>> {
        let row = sqlx::query_as::<_, (i64, i64, String)>(
            r#"SELECT dismissal_count, last_dismissed_ms, suppression_level FROM dismissal_pattern
               WHERE scope = ? AND context_template_id = ? AND dismissed_template_id = ?"#,
        )
        .bind(scope)
        .bind(context_template_id)
        .bind(dismissed_template_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|(count, last_dismissed_ms, level)| {
            parse_suppression_level(&level).map(|level| DismissalPattern {
                scope: scope.to_string(),
                context_template_id: context_template_id.to_string(),
                dismissed_template_id: dismissed_template_id.to_string(),
                dismissal_count: count as u32,
                last_dismissed_ms,
                suppression_level: level,
            })
        }))
    }

    pub async fn append_suggestion_feedback(
        &self,
        feedback: &SuggestionFeedback,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO suggestion_feedback (session_id, ts_ms, prompt_prefix, suggested_text, action, executed_text, latency_ms)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&feedback.session_id)
        .bind(feedback.ts_ms)
        .bind(&feedback.prompt_prefix)
        .bind(&feedback.suggested_text)
        .bind(feedback_action_str(feedback.action))
        .bind(&feedback.executed_text)
        .bind(feedback.latency_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_rank_weight_profile(
        &self,
        profile_key: &str,
    ) -> StoreResult<Option<RankWeightProfile>> {
        let row = sqlx::query_as::<_, (String, f64, f64, f64, f64, f64, f64, f64, f64, f64, i64, f64)>(
            r#"SELECT profile_key, w_transition, w_frequency, w_success, w_prefix, w_affinity, w_task, w_feedback, w_risk_penalty, w_recovery, sample_count, learning_rate
               FROM rank_weight_profile WHERE profile_key = ?"#,
        )
        .bind(profile_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(
            |(profile_key, w_transition, w_frequency, w_success, w_prefix, w_affinity, w_task, w_feedback, w_risk_penalty, w_recovery, sample_count, learning_rate)| {
                RankWeightProfile {
                    profile_key,
                    w_transition,
                    w_frequency,
                    w_success,
                    w_prefix,
                    w_affinity,
                    w_task,
                    w_feedback,
                    w_risk_penalty,
                    w_recovery,
                    sample_count: sample_count as u64,
                    learning_rate,
                }
            },
        ))
    }

    pub async fn put_rank_weight_profile(&self, profile: &RankWeightProfile) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO rank_weight_profile
                (profile_key, w_transition, w_frequency, w_success, w_prefix, w_affinity, w_task, w_feedback, w_risk_penalty, w_recovery, sample_count, learning_rate)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(profile_key) DO UPDATE SET
                 w_transition = excluded.w_transition, w_frequency = excluded.w_frequency,
                 w_success = excluded.w_success, w_prefix = excluded.w_prefix,
                 w_affinity = excluded.w_affinity, w_task = excluded.w_task,
                 w_feedback = excluded.w_feedback, w_risk_penalty = excluded.w_risk_penalty,
                 w_recovery = excluded.w_recovery,
                 sample_count = excluded.sample_count, learning_rate = excluded.learning_rate"#,
        )
        .bind(&profile.profile_key)
        .bind(profile.w_transition)
        .bind(profile.w_frequency)
        .bind(profile.w_success)
        .bind(profile.w_prefix)
        .bind(profile.w_affinity)
        .bind(profile.w_task)
        .bind(profile.w_feedback)
        .bind(profile.w_risk_penalty)
        .bind(profile.w_recovery)
        .bind(profile.sample_count as i64)
        .bind(profile.learning_rate)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_task_candidates(&self, repo_key: &str) -> StoreResult<Vec<TaskCandidate>> {
        let rows = sqlx::query_as::<_, (String, String, String, String, Option<String>, String, f64, Option<String>, i64)>(
            "SELECT repo_key, kind, name, command_text, description, source, priority_boost, source_checksum, discovered_ms FROM task_candidate WHERE repo_key = ?",
        )
        .bind(repo_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(repo_key, kind, name, command_text, description, source, priority_boost, source_checksum, discovered_ms)| {
                    TaskCandidate {
                        repo_key,
                        kind,
                        name,
                        command_text,
                        description,
                        source: if source == "playbook" {
                            TaskSource::Playbook
                        } else {
                            TaskSource::Auto
                        },
                        priority_boost,
                        source_checksum,
                        discovered_ms,
                    }
                },
            )
            .collect())
    }

    pub async fn put_task_candidate(&self, task: &TaskCandidate) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO task_candidate (repo_key, kind, name, command_text, description, source, priority_boost, source_checksum, discovered_ms)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(repo_key, kind, name) DO UPDATE SET
                 command_text = excluded.command_text, description = excluded.description,
                 source = excluded.source, priority_boost = excluded.priority_boost,
                 source_checksum = excluded.source_checksum, discovered_ms = excluded.discovered_ms"#,
        )
        .bind(&task.repo_key)
        .bind(&task.kind)
        .bind(&task.name)
        .bind(&task.command_text)
        .bind(&task.description)
        .bind(match task.source {
            TaskSource::Auto => "auto",
            TaskSource::Playbook => "playbook",
        })
        .bind(task.priority_boost)
        .bind(&task.source_checksum)
        .bind(task.discovered_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissalAction {
    Dismiss,
    Accept,
    Never,
    Unblock,
}

fn parse_suppression_level(s: &str) -> Option<SuppressionLevel> {
    match s {
        "temporary" => Some(SuppressionLevel::Temporary),
        "learned" => Some(SuppressionLevel::Learned),
        "permanent" => Some(SuppressionLevel::Permanent),
        _ => None,
    }
}

fn suppression_level_str(level: SuppressionLevel) -> &'static str {
    match level {
        SuppressionLevel::Temporary => "temporary",
        SuppressionLevel::Learned => "learned",
        SuppressionLevel::Permanent => "permanent",
    }
}

fn feedback_action_str(action: suggestd_core::FeedbackAction) -> &'static str {
    use suggestd_core::FeedbackAction::*;
    match action {
        Accepted => "accepted",
        Dismissed => "dismissed",
        EditedThenRun => "edited_then_run",
        IgnoredTimeout => "ignored_timeout",
        Never => "never",
        Unblock => "unblock",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_with_zero_delta_is_unchanged() {
        assert!((decay(10.0, 0, HALF_LIFE_HOURS_DEFAULT) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn decay_with_one_half_life_halves_weight() {
        let half_life_ms = (HALF_LIFE_HOURS_DEFAULT * 3_600_000.0) as i64;
        let decayed = decay(10.0, half_life_ms, HALF_LIFE_HOURS_DEFAULT);
        assert!((decayed - 5.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn command_template_upsert_preserves_first_seen() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .upsert_command_template("t1", "git status", 0, 1000)
            .await
            .unwrap();
        store
            .upsert_command_template("t1", "git status", 0, 2000)
            .await
            .unwrap();
        let tmpl = store.get_command_template("t1").await.unwrap().unwrap();
        assert_eq!(tmpl.first_seen_ms, 1000);
        assert_eq!(tmpl.last_seen_ms, 2000);
    }

    #[tokio::test]
    async fn command_stat_splits_success_and_failure() {
        let store = Store::open_in_memory().await.unwrap();
        let mut tx = store.pool().begin().await.unwrap();
        Store::upsert_command_stat_tx(&mut tx, "global", "t1", true, 1000, HALF_LIFE_HOURS_DEFAULT)
            .await
            .unwrap();
        Store::upsert_command_stat_tx(&mut tx, "global", "t1", false, 2000, HALF_LIFE_HOURS_DEFAULT)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stats = store.list_command_stats("global").await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].success_count, 1);
        assert_eq!(stats[0].failure_count, 1);
    }

    #[tokio::test]
    async fn slot_stat_evicts_lowest_weight_beyond_cap() {
        let store = Store::open_in_memory().await.unwrap();
        let mut tx = store.pool().begin().await.unwrap();
        for i in 0..(SLOT_STAT_MAX_VALUES + 1) {
            Store::upsert_slot_stat_tx(
                &mut tx,
                "global",
                "t1",
                0,
                &format!("v{i}"),
                1000 + i as i64,
                HALF_LIFE_HOURS_DEFAULT,
            )
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let stats = store.list_slot_stats("global", "t1", 0).await.unwrap();
        assert_eq!(stats.len(), SLOT_STAT_MAX_VALUES);
        assert!(!stats.iter().any(|s| s.value == "v0"));
    }

    #[tokio::test]
    async fn dismissal_escalates_to_learned_at_threshold() {
        let store = Store::open_in_memory().await.unwrap();
        for i in 0..3 {
            let level = store
                .apply_dismissal_action("global", "ctx", "t1", DismissalAction::Dismiss, 3, 1000 + i)
                .await
                .unwrap();
            if i < 2 {
                assert_eq!(level, Some(SuppressionLevel::Temporary));
            } else {
                assert_eq!(level, Some(SuppressionLevel::Learned));
            }
        }
    }

    #[tokio::test]
    async fn dismissal_never_downgrades_permanent_except_unblock() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .apply_dismissal_action("global", "ctx", "t1", DismissalAction::Never, 3, 1000)
            .await
            .unwrap();
        let level = store
            .apply_dismissal_action("global", "ctx", "t1", DismissalAction::Dismiss, 3, 2000)
            .await
            .unwrap();
        assert_eq!(level, Some(SuppressionLevel::Permanent));

        let level = store
            .apply_dismissal_action("global", "ctx", "t1", DismissalAction::Unblock, 3, 3000)
            .await
            .unwrap();
        assert_eq!(level, None);
        assert!(store
            .get_dismissal("global", "ctx", "t1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn failure_recovery_tracks_running_success_rate() {
        let store = Store::open_in_memory().await.unwrap();
        let mut tx = store.pool().begin().await.unwrap();
        Store::upsert_failure_recovery_tx(&mut tx, "global", "pytest", "generic_error", "pytest_x", true, 1000)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let edges = store
            .list_failure_recovery("global", "pytest", "generic_error", false)
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].success_rate, 1.0);
    }
}
