// crates/store/src/lib.rs
//! The Store (spec.md §4.C): a transactional, indexed, crash-safe
//! SQLite-backed store. Single write connection with a bounded
//! busy-wait budget; readers share a pool and never mutate.

pub mod aggregates;
pub mod maintenance;
mod migrations;

pub use aggregates::*;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("store busy beyond budget")]
    Busy,

    #[error("store corrupt: {0}")]
    Corrupt(String),

    #[error("failed to determine cache directory")]
    NoCacheDir,

    #[error("failed to create database directory: {0}")]
    CreateDir(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Default busy-wait budget for the single write connection (spec.md §4.C).
pub const WRITE_BUSY_BUDGET_MS: u64 = 50;

/// Default retention window (spec.md §4.C maintenance loop).
pub const RETENTION_DAYS_DEFAULT: u32 = 90;
pub const RETENTION_MAX_EVENTS_DEFAULT: u64 = 500_000;

/// Main store handle wrapping a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl Store {
    /// Open (or create) the store at the given path, recovering from
    /// corruption if the file is unreadable as SQLite (spec.md §4.C
    /// "Corruption recovery").
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match Self::connect(path).await {
            Ok(store) => {
                info!("store opened at {}", path.display());
                Ok(store)
            }
            Err(e) if is_corruption_error(&e) => {
                warn!(error = %e, "store reported corruption on open; rotating and reinitializing");
                rotate_corrupt_store(path)?;
                let store = Self::connect(path).await?;
                Ok(store)
            }
            Err(e) => Err(e),
        }
    }

    async fn connect(path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(WRITE_BUSY_BUDGET_MS))
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            db_path: path.to_owned(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory store for tests. `shared_cache(true)` so all pooled
    /// connections see the same database (teacher's `new_in_memory`
    /// precedent — without it each connection gets its own empty DB).
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .shared_cache(true)
            .busy_timeout(Duration::from_millis(WRITE_BUSY_BUDGET_MS));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self {
            pool,
            db_path: PathBuf::new(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn open_default() -> StoreResult<Self> {
        let path = default_db_path()?;
        Self::open(&path).await
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY)")
            .execute(&self.pool)
            .await?;

        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await?;
        let current_version = row.0 as usize;

        for (i, migration) in migrations::MIGRATIONS.iter().enumerate() {
            let version = i + 1;
            if version > current_version {
                let is_multi_statement =
                    migration.contains("BEGIN;") || migration.contains("BEGIN\n");
                let result = if is_multi_statement {
                    sqlx::raw_sql(migration).execute(&self.pool).await.map(|_| ())
                } else {
                    sqlx::query(migration).execute(&self.pool).await.map(|_| ())
                };
                match result {
                    Ok(_) => {}
                    Err(e) if e.to_string().contains("duplicate column name") => {}
                    Err(e) => return Err(e.into()),
                }
                sqlx::query("INSERT INTO schema_migrations (version) VALUES (?)")
                    .bind(version as i64)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn is_corruption_error(e: &StoreError) -> bool {
    match e {
        StoreError::Sqlx(sqlx::Error::Database(db_err)) => {
            let msg = db_err.message().to_lowercase();
            msg.contains("malformed") || msg.contains("corrupt") || msg.contains("not a database")
        }
        _ => false,
    }
}

/// Rename the database file and its WAL/SHM siblings to
/// `.corrupt.<unix_ms>`, leaving a clean path for reinitialization.
fn rotate_corrupt_store(path: &Path) -> StoreResult<()> {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    for suffix in ["", "-wal", "-shm"] {
        let candidate = PathBuf::from(format!("{}{}", path.display(), suffix));
        if candidate.exists() {
            let renamed = PathBuf::from(format!("{}.corrupt.{}", candidate.display(), ts));
            std::fs::rename(&candidate, &renamed)?;
            warn!(from = %candidate.display(), to = %renamed.display(), "rotated corrupt store file");
        }
    }
    Ok(())
}

/// Default path: `$XDG_DATA_HOME/clai/suggestd.db`, falling back to
/// the platform data-dir equivalent via `dirs`.
pub fn default_db_path() -> StoreResult<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join("clai").join("suggestd.db"))
        .ok_or(StoreError::NoCacheDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_in_memory_store_with_schema() {
        let store = Store::open_in_memory().await.expect("open in-memory store");
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM command_event")
            .fetch_one(store.pool())
            .await
            .expect("command_event table should exist");
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = Store::open_in_memory().await.expect("open store");
        store.run_migrations().await.expect("second run should succeed");
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM session")
            .fetch_one(store.pool())
            .await
            .expect("session table should still exist");
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn opens_file_based_store() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let db_path = tmp.path().join("suggestd.db");
        let store = Store::open(&db_path).await.expect("open file-based store");
        assert!(db_path.exists());
        assert_eq!(store.db_path(), db_path);
    }

    #[tokio::test]
    async fn rotates_corrupt_database_file_on_open() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let db_path = tmp.path().join("suggestd.db");
        std::fs::write(&db_path, b"not a sqlite file at all, just garbage bytes")
            .expect("write garbage");

        let store = Store::open(&db_path).await.expect("should recover from corruption");
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM command_event")
            .fetch_one(store.pool())
            .await
            .expect("fresh schema should exist after rotation");
        assert_eq!(count.0, 0);

        let corrupt_files: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt."))
            .collect();
        assert!(!corrupt_files.is_empty(), "expected a rotated .corrupt.<ts> file");
    }

    #[test]
    fn default_db_path_ends_in_suggestd_db() {
        let path = default_db_path().expect("should resolve default path");
        assert!(path.to_string_lossy().ends_with("suggestd.db"));
    }
}
