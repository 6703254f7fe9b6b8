// crates/core/src/error.rs
use thiserror::Error;

/// Errors surfaced by the normalizer. Lex failures are recovered
/// internally (spec.md §4.A rule 3 falls back to whitespace split), so
/// this enum only covers cases the caller must see.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("command exceeds configured byte limit before truncation support: {len} bytes")]
    OversizeInput { len: usize },
}

/// Errors surfaced by the classifier/safety layer.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("unknown exit code class: {0}")]
    UnknownExitClass(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_error_display() {
        let err = NormalizeError::OversizeInput { len: 99999 };
        assert!(err.to_string().contains("99999"));
    }

    #[test]
    fn classify_error_display() {
        let err = ClassifyError::UnknownExitClass("bogus".into());
        assert!(err.to_string().contains("bogus"));
    }
}
