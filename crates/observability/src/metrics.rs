//! Prometheus metrics recorder and a minimal loopback-only text
//! endpoint, grounded on the teacher's `crates/server/src/metrics.rs`
//! (`PrometheusBuilder` + `OnceLock<PrometheusHandle>` pattern) with the
//! Axum route replaced by a raw socket write, since this crate graph
//! carries no HTTP framework.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, bind_addr: "127.0.0.1:9477".parse().unwrap() }
    }
}

/// Install the global Prometheus recorder. Idempotent: returns `false`
/// if a recorder is already installed.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("failed to install metrics recorder, already set");
        return false;
    }
    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("failed to store prometheus handle, already set");
    }

    describe_metrics();
    tracing::info!("metrics recorder initialized");
    true
}

fn describe_metrics() {
    describe_counter!("suggestd_ingest_drop_total", "Events dropped by the bounded ingestion queue");
    describe_counter!("suggestd_ingest_error_total", "Ingestion pipeline transaction failures");
    describe_gauge!("suggestd_ingest_queue_len", "Current depth of the ingestion event queue");
    describe_histogram!("suggestd_suggest_latency_seconds", "End-to-end latency of the Suggest operation");
    describe_histogram!("suggestd_ranking_latency_seconds", "Time spent scoring the candidate pool in the ranker");
    describe_counter!("suggestd_ranking_deadline_exceeded_total", "Ranking passes that hit the soft deadline and truncated early");
    describe_counter!("suggestd_cache_hit_total", "Suggestion cache lookups served from L1 or L2");
    describe_counter!("suggestd_cache_miss_total", "Suggestion cache lookups that required a full retrieval + rank pass");
    describe_counter!("suggestd_burst_mode_entered_total", "Transitions into burst-mode ingestion throttling");
}

/// Render the current metrics snapshot in Prometheus text format, or
/// `None` if the recorder hasn't been installed yet.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Serve the rendered metrics text over a loopback TCP listener. Any
/// bytes received on a connection are ignored; the response is always
/// the current snapshot. Runs until the process exits or the bound
/// listener is dropped — intended to be spawned as a background task.
pub async fn serve_metrics_text(config: &MetricsConfig) -> anyhow::Result<()> {
    if !config.enabled {
        return Ok(());
    }
    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "metrics endpoint listening");
    loop {
        let (mut stream, _) = listener.accept().await?;
        let body = render_metrics().unwrap_or_default();
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/plain; version=0.0.4\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        if let Err(e) = stream.write_all(response.as_bytes()).await {
            tracing::debug!(error = %e, "metrics connection write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_before_init_is_none() {
        // Global recorder state is process-wide; only assert the shape,
        // not the exact None/Some since other tests in this binary may
        // have already called init_metrics().
        let _ = render_metrics();
    }

    #[test]
    fn default_config_is_disabled() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
    }
}
