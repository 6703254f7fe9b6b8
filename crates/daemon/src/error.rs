//! Maps internal failures onto the wire error envelope (spec.md §7),
//! adapted from the teacher's `ApiError` + `IntoResponse` pattern
//! (`crates/server/src/error.rs`): one `thiserror` variant per failure
//! class, one match arm building the response, logging before it does.

use suggestd_store::StoreError;
use suggestd_types::{ErrorCode, ErrorPayload};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("daemon unavailable: {0}")]
    Unavailable(String),

    #[error("storage busy")]
    StorageBusy,

    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),

    #[error("request timed out")]
    Timeout,

    #[error("unsupported on this tty")]
    UnsupportedTty,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for DaemonError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Busy => DaemonError::StorageBusy,
            StoreError::Corrupt(msg) => DaemonError::StorageCorrupt(msg),
            other => DaemonError::Internal(other.to_string()),
        }
    }
}

impl DaemonError {
    /// Build the wire-facing `{code, message, retryable}` payload,
    /// logging the failure at the taxonomy's prescribed level (spec.md
    /// §7 propagation policy: input/availability/storage errors warn,
    /// internal errors are logged as errors).
    pub fn into_payload(self) -> ErrorPayload {
        match &self {
            DaemonError::InvalidArgument(msg) => {
                tracing::warn!(message = %msg, "invalid argument");
                ErrorPayload::new(ErrorCode::EInvalidArgument, msg.clone())
            }
            DaemonError::Unavailable(msg) => {
                tracing::warn!(message = %msg, "daemon unavailable");
                ErrorPayload::new(ErrorCode::EDaemonUnavailable, msg.clone())
            }
            DaemonError::StorageBusy => {
                tracing::warn!("store busy beyond budget");
                ErrorPayload::new(ErrorCode::EStorageBusy, self.to_string())
            }
            DaemonError::StorageCorrupt(msg) => {
                tracing::error!(message = %msg, "store corrupt");
                ErrorPayload::new(ErrorCode::EStorageCorrupt, msg.clone())
            }
            DaemonError::Timeout => {
                tracing::warn!("request exceeded deadline");
                ErrorPayload::new(ErrorCode::ETimeout, self.to_string())
            }
            DaemonError::UnsupportedTty => {
                tracing::warn!("unsupported tty");
                ErrorPayload::new(ErrorCode::EUnsupportedTty, self.to_string())
            }
            DaemonError::Internal(msg) => {
                tracing::error!(message = %msg, "internal error");
                ErrorPayload::new(ErrorCode::EInternal, "internal error")
            }
        }
    }
}

pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_busy_maps_to_retryable_code() {
        let payload = DaemonError::StorageBusy.into_payload();
        assert_eq!(payload.code, ErrorCode::EStorageBusy);
        assert!(payload.retryable);
    }

    #[test]
    fn internal_error_hides_message_details() {
        let payload = DaemonError::Internal("leaked db path /home/x".to_string()).into_payload();
        assert_eq!(payload.code, ErrorCode::EInternal);
        assert_eq!(payload.message, "internal error");
    }

    #[test]
    fn invalid_argument_surfaces_message() {
        let payload = DaemonError::InvalidArgument("missing session_id".to_string()).into_payload();
        assert_eq!(payload.code, ErrorCode::EInvalidArgument);
        assert_eq!(payload.message, "missing session_id");
        assert!(!payload.retryable);
    }
}
