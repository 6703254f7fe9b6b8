use serde::Serialize;

/// One command matched by a search query (spec.md §6 `Search` response).
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub cmd_raw: String,
    pub cmd_norm: String,
    pub ts_ms: i64,
    pub repo_key: Option<String>,
    pub session_id: String,
    /// BM25 score for FTS hits, or a constant for substring-fallback hits.
    pub rank_score: f64,
}

/// The outcome of one search call, reporting which backend actually
/// served it (spec.md §6 `SearchBackend`).
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    pub elapsed_ms: f64,
    pub hits: Vec<SearchHit>,
    pub used_fallback: bool,
}
