//! suggestd binary: parses the CLI, loads config, opens the store and
//! search index, wires the ingestion pipeline and cache, and serves
//! the Unix-socket RPC loop until a shutdown signal arrives.
//!
//! Grounded in the teacher's `main.rs` startup sequence (tracing init
//! → background indexing → serve), reworked around a socket accept
//! loop instead of an Axum HTTP server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use suggestd_cache::SuggestionCache;
use suggestd_daemon::cli::{Cli, Command};
use suggestd_daemon::{ipc, lock, state::AppState, Config};
use suggestd_ingest::{run_writer_loop, Pipeline, PipelineConfig};
use suggestd_observability::{LogConfig, MetricsConfig};
use suggestd_search::SearchIndex;
use suggestd_store::maintenance::RetentionPolicy;
use suggestd_store::Store;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(db_path) = &cli.db_path {
        config.db_path = Some(db_path.clone());
    }
    if let Some(socket_path) = &cli.socket_path {
        config.socket_path = Some(socket_path.clone());
    }

    let _log_guard = suggestd_observability::init_logging(&LogConfig {
        log_dir: config.log_dir.clone(),
        ..Default::default()
    })?;

    match cli.command() {
        Command::Doctor => run_doctor(&config).await,
        Command::Stop => run_stop(&config).await,
        Command::Run => run_daemon(config).await,
    }
}

async fn run_doctor(config: &Config) -> Result<()> {
    let db_path = match &config.db_path {
        Some(p) => p.clone(),
        None => suggestd_store::default_db_path()?,
    };
    println!("db_path: {}", db_path.display());

    match Store::open(&db_path).await {
        Ok(store) => {
            let version: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations").fetch_one(store.pool()).await?;
            let sessions: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM session").fetch_one(store.pool()).await?;
            let events: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM command_event").fetch_one(store.pool()).await?;
            println!("schema_version: {}", version.0);
            println!("sessions: {}", sessions.0);
            println!("command_events: {}", events.0);
        }
        Err(e) => {
            println!("store: UNREADABLE ({e})");
        }
    }

    let socket_path = ipc::resolve_socket_path(config.socket_path.as_deref());
    println!("socket_path: {}", socket_path.display());
    match tokio::net::UnixStream::connect(&socket_path).await {
        Ok(_) => println!("socket: reachable (a daemon is listening)"),
        Err(_) => println!("socket: not reachable (no daemon listening)"),
    }

    match lock::acquire(&socket_path) {
        Ok(_) => println!("lock: free (no live owner)"),
        Err(_) => println!("lock: held by another process"),
    }

    Ok(())
}

async fn run_stop(config: &Config) -> Result<()> {
    use suggestd_types::{Envelope, Request};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let socket_path = ipc::resolve_socket_path(config.socket_path.as_deref());
    let mut stream = tokio::net::UnixStream::connect(&socket_path).await?;
    let request = serde_json::to_string(&Request::DebugStats)?;
    stream.write_all(request.as_bytes()).await?;
    stream.write_all(b"\n").await?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let _envelope: Envelope<suggestd_types::DebugStatsResponse> = serde_json::from_str(&line)?;
    println!("daemon reachable; send SIGTERM to its pid to stop it");
    Ok(())
}

async fn run_daemon(config: Config) -> Result<()> {
    suggestd_observability::init_metrics();
    let metrics_config = MetricsConfig { enabled: config.metrics_port.is_some(), bind_addr: metrics_bind_addr(&config) };
    tokio::spawn(async move {
        if let Err(e) = suggestd_observability::serve_metrics_text(&metrics_config).await {
            tracing::warn!(error = %e, "metrics endpoint failed");
        }
    });

    let db_path = match &config.db_path {
        Some(p) => p.clone(),
        None => suggestd_store::default_db_path()?,
    };
    let store = Arc::new(Store::open(&db_path).await?);

    let search_index = match SearchIndex::open(&search_index_dir()) {
        Ok(idx) => Some(Arc::new(idx)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to open search index, search falls back to substring scan only");
            None
        }
    };

    let cache = Arc::new(SuggestionCache::new(suggestd_cache::CACHE_TTL_MS_DEFAULT, suggestd_cache::CACHE_MEMORY_BUDGET_MB_DEFAULT));
    let invalidator = AppState::cache_invalidator(cache.clone());

    let pipeline_config = PipelineConfig { half_life_hours: config.half_life_hours, ..Default::default() };
    let pipeline = Arc::new(Pipeline::new(store.clone(), search_index.clone(), Some(invalidator), pipeline_config));

    let state = AppState::new(store.clone(), pipeline.clone(), cache, search_index, config.clone());

    tokio::spawn(run_writer_loop(pipeline.clone(), IDLE_BACKOFF));

    let maintenance_store = store.clone();
    let half_life_hours = config.half_life_hours;
    let retention_days = config.retention_days;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(MAINTENANCE_INTERVAL).await;
            let policy = RetentionPolicy { retention_days, retention_max_events: suggestd_store::RETENTION_MAX_EVENTS_DEFAULT };
            if let Err(e) = maintenance_store.run_maintenance_pass(policy, half_life_hours, now_ms()).await {
                tracing::error!(error = %e, "maintenance pass failed");
            }
        }
    });

    let socket_path = ipc::resolve_socket_path(config.socket_path.as_deref());
    let instance_lock = lock::acquire(&socket_path).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let listener = ipc::bind(&socket_path).await?;
    tracing::info!(socket = %socket_path.display(), lock = %instance_lock.path().display(), "suggestd listening");

    let serve_state = state.clone();
    let serve_task = tokio::spawn(async move {
        ipc::serve(serve_state, listener).await;
    });

    match wait_for_shutdown_signal(&state).await {
        ShutdownKind::Terminate => {
            tracing::info!("shutdown signal received, stopping");
        }
        ShutdownKind::Upgrade => {
            tracing::info!("upgrade signal received, draining for handoff");
            state.begin_draining();
            drain_pipeline(&pipeline).await;
        }
    }
    serve_task.abort();
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Waits for the in-flight write queue to empty, bounded so a stuck
/// writer can't block the handoff forever (spec.md §5 "Upgrade signal").
async fn drain_pipeline(pipeline: &Pipeline) {
    let deadline = Duration::from_secs(5);
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while pipeline.queue_len() > 0 && waited < deadline {
        tokio::time::sleep(step).await;
        waited += step;
    }
}

fn metrics_bind_addr(config: &Config) -> std::net::SocketAddr {
    let port = config.metrics_port.unwrap_or(9477);
    std::net::SocketAddr::from(([127, 0, 0, 1], port))
}

fn search_index_dir() -> std::path::PathBuf {
    dirs::data_dir().unwrap_or_else(std::env::temp_dir).join("clai").join("search-index")
}

enum ShutdownKind {
    Terminate,
    Upgrade,
}

/// Multiplexes the daemon's three signals (spec.md §5): `SIGTERM`/`SIGINT`
/// stop the process outright, `SIGHUP` re-reads config weights/timeouts
/// in place without returning, and `SIGUSR1` is the upgrade signal that
/// hands the socket off to a freshly-started process.
#[cfg(unix)]
async fn wait_for_shutdown_signal(state: &Arc<AppState>) -> ShutdownKind {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
    let mut sigusr1 = signal(SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");

    loop {
        tokio::select! {
            _ = sigterm.recv() => return ShutdownKind::Terminate,
            _ = sigint.recv() => return ShutdownKind::Terminate,
            _ = sigusr1.recv() => return ShutdownKind::Upgrade,
            _ = sighup.recv() => {
                match Config::load() {
                    Ok(fresh) => {
                        state.reload_config(fresh);
                        tracing::info!("reloaded configuration weights/timeouts");
                    }
                    Err(e) => tracing::warn!(error = %e, "config reload failed, keeping previous values"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal(_state: &Arc<AppState>) -> ShutdownKind {
    let _ = tokio::signal::ctrl_c().await;
    ShutdownKind::Terminate
}
