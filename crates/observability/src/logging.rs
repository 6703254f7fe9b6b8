//! `RUST_LOG`-driven structured logging, mirroring the teacher's
//! `FmtSubscriber` setup in `main.rs`, plus a rotated file appender
//! (the teacher lists `tracing-appender` as a dependency but never
//! wires it up).

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory the rotated daemon log lives in. `None` disables the
    /// file appender entirely (stderr only).
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
    /// Default filter directive when `RUST_LOG` is unset.
    pub default_directive: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            file_prefix: "suggestd".to_string(),
            default_directive: "warn".to_string(),
        }
    }
}

/// Install the global `tracing` subscriber. Returns a `WorkerGuard` that
/// must be held for the process lifetime — dropping it stops flushing
/// the non-blocking file writer.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive.clone()));

    match &config.log_dir {
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).compact().try_init().map_err(|e| anyhow::anyhow!(e))?;
            Ok(None)
        }
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, &config.file_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .json()
                .try_init()
                .map_err(|e| anyhow::anyhow!(e))?;
            Ok(Some(guard))
        }
    }
}
