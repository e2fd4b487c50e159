//! Error types for the watch service

use run_overlay::OverlayError;
use thiserror::Error;

/// Result type alias using WatchError
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors surfaced to callers of the watch handle
#[derive(Debug, Error)]
pub enum WatchError {
    /// The run-tree endpoint could not be read; the overlay is unchanged
    #[error("Tree fetch failed: {message}")]
    TreeFetch { message: String, retryable: bool },

    /// No tree source was configured
    #[error("No tree source configured")]
    NoTreeSource,

    /// No run is currently watched
    #[error("Not watching any run")]
    NotWatching,

    /// The watched run changed while the request was in flight
    #[error("Run '{0}' is no longer watched")]
    Superseded(String),

    /// A snapshot fetched later has already been applied
    #[error("Tree for run '{0}' is older than the one already applied")]
    Outdated(String),

    /// Snapshot rejected by the reconciler
    #[error(transparent)]
    Overlay(#[from] OverlayError),

    /// The watcher task has stopped
    #[error("Watcher closed")]
    Closed,
}

impl WatchError {
    pub fn tree_fetch(message: impl Into<String>, retryable: bool) -> Self {
        Self::TreeFetch {
            message: message.into(),
            retryable,
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TreeFetch { retryable, .. } => *retryable,
            Self::Superseded(_) => true,
            _ => false,
        }
    }
}

/// Errors loading or saving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(serde_json::Error),

    #[error("Serialize error: {0}")]
    Serialize(serde_json::Error),
}
