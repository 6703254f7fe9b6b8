//! Layered configuration (defaults → `~/.config/clai/suggestd.toml` →
//! `CLAI_*` environment overrides), reloadable without dropping the
//! listener (spec.md §5 "Reload signal"). Grounded in the teacher's
//! constant-based configuration style (`live/manager.rs` interval
//! constants) generalized into one typed, documented-default struct,
//! since the teacher has no single config file of its own to adapt.

use std::path::PathBuf;

use serde::Deserialize;

use suggestd_candidates::retrieval::{FUZZY_MAX_EDITS_DEFAULT, INGEST_SYNC_WAIT_MS_DEFAULT, POOL_CAP_DEFAULT};
use suggestd_rank::{MIN_CONFIDENCE_DEFAULT, RANKING_DEADLINE_MS, RETRIEVAL_DEADLINE_MS};
use suggestd_store::aggregates::HALF_LIFE_HOURS_DEFAULT;
use suggestd_store::RETENTION_DAYS_DEFAULT;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: Option<PathBuf>,
    pub socket_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub half_life_hours: f64,
    pub retrieval_deadline_ms: u64,
    pub ranking_deadline_ms: u64,
    pub min_confidence: f64,
    pub pool_cap: usize,
    pub fuzzy_max_edits: usize,
    pub ingest_sync_wait_ms: u64,
    pub retention_days: u32,
    pub learned_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            socket_path: None,
            log_dir: None,
            metrics_port: None,
            half_life_hours: HALF_LIFE_HOURS_DEFAULT,
            retrieval_deadline_ms: RETRIEVAL_DEADLINE_MS,
            ranking_deadline_ms: RANKING_DEADLINE_MS,
            min_confidence: MIN_CONFIDENCE_DEFAULT,
            pool_cap: POOL_CAP_DEFAULT,
            fuzzy_max_edits: FUZZY_MAX_EDITS_DEFAULT,
            ingest_sync_wait_ms: INGEST_SYNC_WAIT_MS_DEFAULT,
            retention_days: RETENTION_DAYS_DEFAULT,
            learned_threshold: suggestd_cache::LEARNED_THRESHOLD_DEFAULT,
        }
    }
}

impl Config {
    /// Load defaults, overlay the TOML file at `~/.config/clai/suggestd.toml`
    /// if present, then overlay `CLAI_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_file_path() {
            if let Ok(text) = std::fs::read_to_string(&path) {
                config = toml_merge(config, &text)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Copies only the weights/timeouts fields from `fresh`, leaving
    /// `db_path`/`socket_path`/`log_dir`/`metrics_port` untouched — those
    /// are fixed for the process lifetime and only take effect on restart.
    pub fn apply_reload(&mut self, fresh: Config) {
        self.half_life_hours = fresh.half_life_hours;
        self.retrieval_deadline_ms = fresh.retrieval_deadline_ms;
        self.ranking_deadline_ms = fresh.ranking_deadline_ms;
        self.min_confidence = fresh.min_confidence;
        self.pool_cap = fresh.pool_cap;
        self.fuzzy_max_edits = fresh.fuzzy_max_edits;
        self.ingest_sync_wait_ms = fresh.ingest_sync_wait_ms;
        self.retention_days = fresh.retention_days;
        self.learned_threshold = fresh.learned_threshold;
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CLAI_DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("CLAI_SOCKET_PATH") {
            self.socket_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("CLAI_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = std::env::var("CLAI_METRICS_PORT").ok().and_then(|s| s.parse().ok()) {
            self.metrics_port = Some(v);
        }
        if let Some(v) = std::env::var("CLAI_MIN_CONFIDENCE").ok().and_then(|s| s.parse().ok()) {
            self.min_confidence = v;
        }
        if let Some(v) = std::env::var("CLAI_RETENTION_DAYS").ok().and_then(|s| s.parse().ok()) {
            self.retention_days = v;
        }
    }
}

fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("clai").join("suggestd.toml"))
}

fn toml_merge(defaults: Config, text: &str) -> anyhow::Result<Config> {
    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct Overlay {
        db_path: Option<PathBuf>,
        socket_path: Option<PathBuf>,
        log_dir: Option<PathBuf>,
        metrics_port: Option<u16>,
        half_life_hours: Option<f64>,
        retrieval_deadline_ms: Option<u64>,
        ranking_deadline_ms: Option<u64>,
        min_confidence: Option<f64>,
        pool_cap: Option<usize>,
        fuzzy_max_edits: Option<usize>,
        ingest_sync_wait_ms: Option<u64>,
        retention_days: Option<u32>,
        learned_threshold: Option<u32>,
    }

    let overlay: Overlay = toml::from_str(text)?;
    let mut config = defaults;
    if overlay.db_path.is_some() {
        config.db_path = overlay.db_path;
    }
    if overlay.socket_path.is_some() {
        config.socket_path = overlay.socket_path;
    }
    if overlay.log_dir.is_some() {
        config.log_dir = overlay.log_dir;
    }
    if overlay.metrics_port.is_some() {
        config.metrics_port = overlay.metrics_port;
    }
    if let Some(v) = overlay.half_life_hours {
        config.half_life_hours = v;
    }
    if let Some(v) = overlay.retrieval_deadline_ms {
        config.retrieval_deadline_ms = v;
    }
    if let Some(v) = overlay.ranking_deadline_ms {
        config.ranking_deadline_ms = v;
    }
    if let Some(v) = overlay.min_confidence {
        config.min_confidence = v;
    }
    if let Some(v) = overlay.pool_cap {
        config.pool_cap = v;
    }
    if let Some(v) = overlay.fuzzy_max_edits {
        config.fuzzy_max_edits = v;
    }
    if let Some(v) = overlay.ingest_sync_wait_ms {
        config.ingest_sync_wait_ms = v;
    }
    if let Some(v) = overlay.retention_days {
        config.retention_days = v;
    }
    if let Some(v) = overlay.learned_threshold {
        config.learned_threshold = v;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = Config::default();
        assert_eq!(config.half_life_hours, HALF_LIFE_HOURS_DEFAULT);
        assert_eq!(config.min_confidence, MIN_CONFIDENCE_DEFAULT);
    }

    #[test]
    fn toml_overlay_only_replaces_present_fields() {
        let defaults = Config::default();
        let original_pool_cap = defaults.pool_cap;
        let merged = toml_merge(defaults, "min_confidence = 0.5\n").unwrap();
        assert_eq!(merged.min_confidence, 0.5);
        assert_eq!(merged.pool_cap, original_pool_cap);
    }

    #[test]
    fn apply_reload_leaves_paths_untouched() {
        let mut live = Config { socket_path: Some(PathBuf::from("/run/suggestd.sock")), min_confidence: 0.1, ..Config::default() };
        let fresh = Config { socket_path: Some(PathBuf::from("/ignored.sock")), min_confidence: 0.9, ..Config::default() };
        live.apply_reload(fresh);
        assert_eq!(live.socket_path, Some(PathBuf::from("/run/suggestd.sock")));
        assert_eq!(live.min_confidence, 0.9);
    }
}
