//! Error types for the run overlay

use thiserror::Error;

/// Result type alias using OverlayError
pub type Result<T> = std::result::Result<T, OverlayError>;

/// Errors that can occur while reconciling a run overlay
///
/// Event ingestion never produces these: malformed or unknown events are
/// dropped and counted instead. Only whole-snapshot operations fail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OverlayError {
    /// A tree snapshot was produced for a different root run
    #[error("Run mismatch: state watches '{expected}', snapshot is for '{actual}'")]
    RunMismatch { expected: String, actual: String },

    /// A tree snapshot could not be decoded
    #[error("Invalid tree snapshot: {0}")]
    InvalidSnapshot(String),
}

impl OverlayError {
    /// Create a run mismatch error
    pub fn run_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::RunMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<serde_json::Error> for OverlayError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidSnapshot(err.to_string())
    }
}
