//! Full-text search over command history (spec.md §4.E candidate source
//! `history_fts`, §6 `Search` operation).
//!
//! Uses Tantivy (embedded Rust search engine) to index `cmd_raw`/`cmd_norm`
//! for each non-ephemeral `command_event`. When the index is unavailable
//! or a query fails to parse, callers fall back to [`fallback::substring_scan`],
//! a `grep`-crate-based linear scan over recent rows pulled from the store.
//!
//! # Architecture
//!
//! - **Schema**: 7 fields per document (see `build_schema`)
//! - **Write path**: `indexer::SearchDocument` -> `SearchIndex::index_commands` -> `commit`
//! - **Read path**: `query::search` -> qualifier parsing -> BooleanQuery -> `SearchHit`s
//! - **Storage**: on-disk at `<data_dir>/clai/search-index/`, or in-RAM for tests

pub mod fallback;
pub mod indexer;
pub mod query;
pub mod types;

use std::path::Path;
use std::sync::Mutex;

use tantivy::schema::{Field, Schema, FAST, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};

pub use fallback::substring_scan;
pub use indexer::SearchDocument;
pub use types::{SearchHit, SearchOutcome};

/// Schema version for the Tantivy index. Bump when the schema changes;
/// a mismatch triggers auto-rebuild.
pub const SEARCH_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("Query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    Regex(#[from] grep_regex::Error),

    #[error("grep matcher error: {0}")]
    GrepMatcher(#[from] grep_matcher::NoError),

    #[error("index not ready")]
    NotReady,
}

/// Build the Tantivy schema for indexing command events.
///
/// Fields:
/// - `session_id`: STRING | STORED — exact match, delete-by-session
/// - `repo_key`: STRING | STORED — qualifier filter (`repo:clai/suggestd`)
/// - `branch`: STRING | STORED — qualifier filter (`branch:main`)
/// - `cmd_raw`: TEXT | STORED — full-text BM25 search, returned verbatim
/// - `cmd_norm`: TEXT | STORED — tokenized search over the slotted form
/// - `ts_ms`: i64, FAST | STORED — recency sort, range queries
/// - `exit_code`: i64, FAST | STORED — qualifier filter (`exit:0`)
pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();

    schema_builder.add_text_field("session_id", STRING | STORED);
    schema_builder.add_text_field("repo_key", STRING | STORED);
    schema_builder.add_text_field("branch", STRING | STORED);
    schema_builder.add_text_field("cmd_raw", TEXT | STORED);
    schema_builder.add_text_field("cmd_norm", TEXT | STORED);
    schema_builder.add_i64_field("ts_ms", FAST | STORED);
    schema_builder.add_i64_field("exit_code", FAST | STORED);

    schema_builder.build()
}

/// The main search index, holding a Tantivy index, reader, writer, and
/// pre-resolved field handles.
pub struct SearchIndex {
    pub index: Index,
    pub reader: IndexReader,
    /// Wrapped in `Mutex` because `IndexWriter` requires `&mut self` but
    /// is shared across the daemon's async handlers.
    pub writer: Mutex<IndexWriter>,
    pub schema: Schema,

    pub(crate) session_id_field: Field,
    pub(crate) repo_key_field: Field,
    pub(crate) branch_field: Field,
    pub(crate) cmd_raw_field: Field,
    pub(crate) cmd_norm_field: Field,
    pub(crate) ts_ms_field: Field,
    pub(crate) exit_code_field: Field,
}

impl SearchIndex {
    /// Open or create a Tantivy index at the given directory path.
    ///
    /// Schema versioning: if a `schema_version` file exists in the index
    /// directory and its value does not match `SEARCH_SCHEMA_VERSION`,
    /// the index is wiped and rebuilt from scratch.
    pub fn open(path: &Path) -> Result<Self, SearchError> {
        std::fs::create_dir_all(path)?;

        let version_path = path.join("schema_version");
        let needs_rebuild = match std::fs::read_to_string(&version_path) {
            Ok(v) => v.trim().parse::<u32>().unwrap_or(0) != SEARCH_SCHEMA_VERSION,
            Err(_) => false,
        };

        if needs_rebuild {
            tracing::info!(path = %path.display(), "search schema version mismatch, rebuilding index");
            if let Ok(entries) = std::fs::read_dir(path) {
                for entry in entries.flatten() {
                    let p = entry.path();
                    if p.file_name().map(|n| n != "schema_version").unwrap_or(false) {
                        if p.is_dir() {
                            let _ = std::fs::remove_dir_all(&p);
                        } else {
                            let _ = std::fs::remove_file(&p);
                        }
                    }
                }
            }
        }

        let schema = build_schema();

        let index = match Index::open_in_dir(path) {
            Ok(idx) => {
                tracing::info!(path = %path.display(), "opened existing search index");
                idx
            }
            Err(_) => {
                tracing::info!(path = %path.display(), "creating new search index");
                Index::create_in_dir(path, schema.clone())?
            }
        };

        let _ = std::fs::write(&version_path, format!("{}", SEARCH_SCHEMA_VERSION));

        Self::from_index(index, schema)
    }

    /// Create a Tantivy index entirely in RAM. Used for tests and for
    /// `suggestd --ephemeral` runs with no persistent search index.
    pub fn open_in_ram() -> Result<Self, SearchError> {
        let schema = build_schema();
        let index = Index::create_in_ram(schema.clone());
        Self::from_index(index, schema)
    }

    fn from_index(index: Index, schema: Schema) -> Result<Self, SearchError> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;

        // 15MB writer heap. Command text is short; this index is much
        // smaller than the teacher's transcript index.
        let writer = index.writer(15_000_000)?;

        let session_id_field = schema.get_field("session_id").expect("schema missing session_id");
        let repo_key_field = schema.get_field("repo_key").expect("schema missing repo_key");
        let branch_field = schema.get_field("branch").expect("schema missing branch");
        let cmd_raw_field = schema.get_field("cmd_raw").expect("schema missing cmd_raw");
        let cmd_norm_field = schema.get_field("cmd_norm").expect("schema missing cmd_norm");
        let ts_ms_field = schema.get_field("ts_ms").expect("schema missing ts_ms");
        let exit_code_field = schema.get_field("exit_code").expect("schema missing exit_code");

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            schema,
            session_id_field,
            repo_key_field,
            branch_field,
            cmd_raw_field,
            cmd_norm_field,
            ts_ms_field,
            exit_code_field,
        })
    }
}
