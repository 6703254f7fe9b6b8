// crates/store/src/migrations.rs
//! Schema migrations, applied in order and tracked by `schema_migrations`
//! (spec.md §6 "Persistent state layout"). Each entry is either a
//! single SQL statement or a `BEGIN; ... COMMIT;` block; `run_migrations`
//! in `lib.rs` picks the execution path based on which shape it is.

pub const MIGRATIONS: &[&str] = &[
    // 1: session
    r#"CREATE TABLE IF NOT EXISTS session (
        session_id TEXT PRIMARY KEY,
        shell TEXT NOT NULL,
        started_ms INTEGER NOT NULL,
        host TEXT NOT NULL DEFAULT '',
        user TEXT NOT NULL DEFAULT '',
        initial_cwd TEXT,
        project_types TEXT NOT NULL DEFAULT '[]',
        ended_ms INTEGER
    )"#,
    // 2: command_template
    r#"CREATE TABLE IF NOT EXISTS command_template (
        template_id TEXT PRIMARY KEY,
        cmd_norm TEXT NOT NULL,
        slot_count INTEGER NOT NULL DEFAULT 0,
        first_seen_ms INTEGER NOT NULL,
        last_seen_ms INTEGER NOT NULL
    )"#,
    // 3: command_event (+ indexes)
    r#"BEGIN;
    CREATE TABLE IF NOT EXISTS command_event (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        ts_ms INTEGER NOT NULL,
        cwd TEXT NOT NULL,
        repo_key TEXT,
        branch TEXT,
        cmd_raw TEXT NOT NULL,
        cmd_norm TEXT NOT NULL,
        cmd_truncated INTEGER NOT NULL DEFAULT 0,
        template_id TEXT NOT NULL,
        exit_code INTEGER,
        duration_ms INTEGER,
        ephemeral INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_command_event_session_ts ON command_event(session_id, ts_ms DESC);
    CREATE INDEX IF NOT EXISTS idx_command_event_ts ON command_event(ts_ms DESC);
    CREATE INDEX IF NOT EXISTS idx_command_event_cwd_ts ON command_event(cwd, ts_ms DESC);
    CREATE INDEX IF NOT EXISTS idx_command_event_cmd_norm ON command_event(cmd_norm);
    COMMIT;"#,
    // 4: transition_stat
    r#"CREATE TABLE IF NOT EXISTS transition_stat (
        scope TEXT NOT NULL,
        prev_template_id TEXT NOT NULL,
        next_template_id TEXT NOT NULL,
        weight REAL NOT NULL DEFAULT 0,
        count INTEGER NOT NULL DEFAULT 0,
        last_seen_ms INTEGER NOT NULL,
        PRIMARY KEY (scope, prev_template_id, next_template_id)
    )"#,
    // 5: command_stat
    r#"CREATE TABLE IF NOT EXISTS command_stat (
        scope TEXT NOT NULL,
        template_id TEXT NOT NULL,
        score REAL NOT NULL DEFAULT 0,
        success_count INTEGER NOT NULL DEFAULT 0,
        failure_count INTEGER NOT NULL DEFAULT 0,
        last_seen_ms INTEGER NOT NULL,
        PRIMARY KEY (scope, template_id)
    )"#,
    // 6: slot_stat
    r#"CREATE TABLE IF NOT EXISTS slot_stat (
        scope TEXT NOT NULL,
        template_id TEXT NOT NULL,
        slot_index INTEGER NOT NULL,
        value TEXT NOT NULL,
        weight REAL NOT NULL DEFAULT 0,
        count INTEGER NOT NULL DEFAULT 0,
        last_seen_ms INTEGER NOT NULL,
        PRIMARY KEY (scope, template_id, slot_index, value)
    )"#,
    // 7: slot_correlation
    r#"CREATE TABLE IF NOT EXISTS slot_correlation (
        scope TEXT NOT NULL,
        template_id TEXT NOT NULL,
        slot_key TEXT NOT NULL,
        tuple_hash TEXT NOT NULL,
        tuple_value_json TEXT NOT NULL,
        weight REAL NOT NULL DEFAULT 0,
        count INTEGER NOT NULL DEFAULT 0,
        last_seen_ms INTEGER NOT NULL,
        PRIMARY KEY (scope, template_id, slot_key, tuple_hash)
    )"#,
    // 8: task_candidate
    r#"CREATE TABLE IF NOT EXISTS task_candidate (
        repo_key TEXT NOT NULL,
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        command_text TEXT NOT NULL,
        description TEXT,
        source TEXT NOT NULL,
        priority_boost REAL NOT NULL DEFAULT 0,
        source_checksum TEXT,
        discovered_ms INTEGER NOT NULL,
        PRIMARY KEY (repo_key, kind, name)
    )"#,
    // 9: failure_recovery
    r#"CREATE TABLE IF NOT EXISTS failure_recovery (
        scope TEXT NOT NULL,
        failed_template_id TEXT NOT NULL,
        exit_code_class TEXT NOT NULL,
        recovery_template_id TEXT NOT NULL,
        weight REAL NOT NULL DEFAULT 0,
        count INTEGER NOT NULL DEFAULT 0,
        success_rate REAL NOT NULL DEFAULT 0,
        last_seen_ms INTEGER NOT NULL,
        source TEXT NOT NULL,
        PRIMARY KEY (scope, failed_template_id, exit_code_class, recovery_template_id)
    )"#,
    // 10: dismissal_pattern
    r#"CREATE TABLE IF NOT EXISTS dismissal_pattern (
        scope TEXT NOT NULL,
        context_template_id TEXT NOT NULL,
        dismissed_template_id TEXT NOT NULL,
        dismissal_count INTEGER NOT NULL DEFAULT 0,
        last_dismissed_ms INTEGER NOT NULL,
        suppression_level TEXT NOT NULL,
        PRIMARY KEY (scope, context_template_id, dismissed_template_id)
    )"#,
    // 11: suggestion_feedback (append-only)
    r#"CREATE TABLE IF NOT EXISTS suggestion_feedback (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        ts_ms INTEGER NOT NULL,
        prompt_prefix TEXT,
        suggested_text TEXT NOT NULL,
        action TEXT NOT NULL,
        executed_text TEXT,
        latency_ms INTEGER
    )"#,
    // 12: rank_weight_profile
    r#"CREATE TABLE IF NOT EXISTS rank_weight_profile (
        profile_key TEXT PRIMARY KEY,
        w_transition REAL NOT NULL,
        w_frequency REAL NOT NULL,
        w_success REAL NOT NULL,
        w_prefix REAL NOT NULL,
        w_affinity REAL NOT NULL,
        w_task REAL NOT NULL,
        w_feedback REAL NOT NULL,
        w_risk_penalty REAL NOT NULL,
        w_recovery REAL NOT NULL DEFAULT 0.25,
        sample_count INTEGER NOT NULL DEFAULT 0,
        learning_rate REAL NOT NULL DEFAULT 0.02
    )"#,
    // 13: command_event_fts — virtual FTS index with triggers keeping it
    // in sync with command_event inserts/deletes (spec.md §6 schema sketch).
    r#"BEGIN;
    CREATE VIRTUAL TABLE IF NOT EXISTS command_event_fts USING fts5(
        cmd_raw, cmd_norm, content='command_event', content_rowid='id'
    );
    CREATE TRIGGER IF NOT EXISTS command_event_ai AFTER INSERT ON command_event BEGIN
        INSERT INTO command_event_fts(rowid, cmd_raw, cmd_norm)
        VALUES (new.id, new.cmd_raw, new.cmd_norm);
    END;
    CREATE TRIGGER IF NOT EXISTS command_event_ad AFTER DELETE ON command_event BEGIN
        INSERT INTO command_event_fts(command_event_fts, rowid, cmd_raw, cmd_norm)
        VALUES ('delete', old.id, old.cmd_raw, old.cmd_norm);
    END;
    COMMIT;"#,
];
