//! Wire types for the daemon's IPC protocol (spec.md §6). Every
//! operation's response is wrapped in `Envelope<T>`; every error uses
//! the six codes `ErrorCode` lists.

use serde::{Deserialize, Serialize};

/// One request frame sent by a shell helper to the daemon. Each
/// variant corresponds to one of the five daemon operations spec.md
/// §6 names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    IngestEvent(IngestEventRequest),
    Suggest(SuggestRequest),
    Search(SearchRequest),
    RecordFeedback(RecordFeedbackRequest),
    DebugStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    SessionEnd,
    CommandStart,
    CommandEnd,
    SuggestRequest,
    SuggestFeedback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEventRequest {
    pub event_type: EventType,
    pub session_id: String,
    pub shell: String,
    pub ts_ms: i64,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd_truncated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestRequest {
    pub session_id: String,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_key: Option<String>,
    #[serde(default)]
    pub prefix: String,
    pub cursor_pos: u32,
    pub limit: u32,
    #[serde(default)]
    pub include_low_confidence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cmd_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cmd_norm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cmd_ts_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_seq: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Hit,
    Miss,
    DeadlineFallback,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionDto {
    pub text: String,
    pub cmd_norm: String,
    pub source: String,
    pub score: f64,
    pub confidence: f64,
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestResponse {
    pub suggestions: Vec<SuggestionDto>,
    pub cache_status: CacheStatus,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Fts,
    Substring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub scope: String,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub mode: SearchMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchBackend {
    Fts,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultDto {
    pub cmd_raw: String,
    pub cmd_norm: String,
    pub ts_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_key: Option<String>,
    pub rank_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultDto>,
    pub latency_ms: u64,
    pub backend: SearchBackend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackActionDto {
    Accepted,
    Dismissed,
    EditedThenRun,
    IgnoredTimeout,
    Never,
    Unblock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordFeedbackRequest {
    pub session_id: String,
    pub action: FeedbackActionDto,
    pub suggested_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugStatsResponse {
    pub ingest_queue_len: u64,
    pub ingest_drop_count: u64,
    pub cache_l1_entries: u64,
    pub cache_l2_entries: u64,
    pub burst_mode_sessions: u64,
    pub uptime_secs: u64,
}

/// The six error codes spec.md §6 lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    EInvalidArgument,
    EDaemonUnavailable,
    EStorageBusy,
    EStorageCorrupt,
    ETimeout,
    EUnsupportedTty,
    EInternal,
}

impl ErrorCode {
    /// Whether a client may usefully retry the same request unchanged.
    pub fn retryable_by_default(self) -> bool {
        matches!(self, ErrorCode::EStorageBusy | ErrorCode::ETimeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            retryable: code.retryable_by_default(),
            code,
            message: message.into(),
        }
    }
}

/// The single wire envelope every daemon operation replies with:
/// `{ok: true, payload}` or `{ok: false, error: {code, message, retryable}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope<T> {
    Ok { ok: OkTrue, payload: T },
    Err { ok: OkFalse, error: ErrorPayload },
}

/// Helper unit types so `ok` serializes as the literal booleans `true`/
/// `false` while still letting `#[serde(untagged)]` discriminate on
/// shape during deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OkTrue;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OkFalse;

impl Serialize for OkTrue {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bool(true)
    }
}
impl<'de> Deserialize<'de> for OkTrue {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let b = bool::deserialize(d)?;
        if b {
            Ok(OkTrue)
        } else {
            Err(serde::de::Error::custom("expected `ok: true`"))
        }
    }
}
impl Serialize for OkFalse {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bool(false)
    }
}
impl<'de> Deserialize<'de> for OkFalse {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let b = bool::deserialize(d)?;
        if !b {
            Ok(OkFalse)
        } else {
            Err(serde::de::Error::custom("expected `ok: false`"))
        }
    }
}

impl<T> Envelope<T> {
    pub fn ok(payload: T) -> Self {
        Envelope::Ok {
            ok: OkTrue,
            payload,
        }
    }

    pub fn err(error: ErrorPayload) -> Self {
        Envelope::Err {
            ok: OkFalse,
            error,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Envelope::Ok { .. })
    }
}
