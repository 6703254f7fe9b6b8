//! The Unix-socket RPC server (spec.md §6): NDJSON framing in both
//! directions, one `Request` in and one `Envelope<T>` out per line.
//! Grounded in the teacher's `routes::api_routes` accept-and-dispatch
//! shape, reworked from axum's per-route handlers onto a raw
//! `UnixListener` accept loop since this workspace carries no HTTP
//! framework.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use suggestd_types::{Envelope, ErrorCode, ErrorPayload, Request};

use crate::error::DaemonError;
use crate::ops;
use crate::state::AppState;

/// Resolve the socket path in spec order: `$XDG_RUNTIME_DIR/clai/...`,
/// then the platform user-cache dir, then `$TMPDIR/clai-<user>/...`,
/// then `/tmp/clai-<user>/...`. No `getuid(2)` binding is in this
/// workspace's dependency stack, so the per-user tmp qualifier is the
/// `USER`/`LOGNAME` environment variable rather than a numeric uid.
pub fn resolve_socket_path(override_path: Option<&Path>) -> PathBuf {
    if let Some(p) = override_path {
        return p.to_path_buf();
    }

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir).join("clai").join("suggestd.sock");
        }
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join("clai").join("suggestd.sock");
    }

    let user = std::env::var("USER").or_else(|_| std::env::var("LOGNAME")).unwrap_or_else(|_| "unknown".to_string());
    let base = std::env::var("TMPDIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/tmp"));
    base.join(format!("clai-{user}")).join("suggestd.sock")
}

/// Bind the listener, creating the parent directory at mode `0700` and
/// removing a stale socket file left by a prior process.
pub async fn bind(socket_path: &Path) -> anyhow::Result<UnixListener> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
        }
    }
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    Ok(UnixListener::bind(socket_path)?)
}

/// Accept connections forever, spawning one task per client. Returns
/// only if `bind`'s listener itself errors out.
pub async fn serve(state: Arc<AppState>, listener: UnixListener) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    handle_connection(state, stream).await;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept ipc connection");
            }
        }
    }
}

async fn handle_connection(state: Arc<AppState>, stream: UnixStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "ipc read error");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        state.record_request();
        let response_json = dispatch_line(&state, &line).await;
        if write_half.write_all(response_json.as_bytes()).await.is_err() {
            return;
        }
        if write_half.write_all(b"\n").await.is_err() {
            return;
        }
    }
}

async fn dispatch_line(state: &AppState, line: &str) -> String {
    let request: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            let payload = ErrorPayload::new(ErrorCode::EInvalidArgument, format!("malformed request: {e}"));
            return envelope_json(Envelope::<()>::err(payload));
        }
    };

    dispatch(state, request).await
}

async fn dispatch(state: &AppState, request: Request) -> String {
    let now_ms = chrono::Utc::now().timestamp_millis();
    match request {
        Request::IngestEvent(event) => {
            ops::ingest_event(state, event);
            envelope_json(Envelope::ok(suggestd_types::OkTrue))
        }
        Request::Suggest(req) => respond(ops::suggest(state, req, now_ms).await),
        Request::Search(req) => respond(ops::search(state, req).await),
        Request::RecordFeedback(req) => match ops::record_feedback(state, req, now_ms).await {
            Ok(()) => envelope_json(Envelope::ok(suggestd_types::OkTrue)),
            Err(e) => envelope_json(Envelope::<()>::err(e.into_payload())),
        },
        Request::DebugStats => envelope_json(Envelope::ok(ops::debug_stats(state).await)),
    }
}

fn respond<T: Serialize>(result: Result<T, DaemonError>) -> String {
    match result {
        Ok(payload) => envelope_json(Envelope::ok(payload)),
        Err(e) => envelope_json(Envelope::<()>::err(e.into_payload())),
    }
}

fn envelope_json<T: Serialize>(envelope: Envelope<T>) -> String {
    serde_json::to_string(&envelope).unwrap_or_else(|_| {
        r#"{"ok":false,"error":{"code":"E_INTERNAL","message":"failed to serialize response","retryable":false}}"#.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_dir_takes_priority_when_set() {
        std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        let path = resolve_socket_path(None);
        std::env::remove_var("XDG_RUNTIME_DIR");
        assert_eq!(path, PathBuf::from("/run/user/1000/clai/suggestd.sock"));
    }

    #[test]
    fn explicit_override_wins_over_everything() {
        let path = resolve_socket_path(Some(Path::new("/custom/suggestd.sock")));
        assert_eq!(path, PathBuf::from("/custom/suggestd.sock"));
    }
}
