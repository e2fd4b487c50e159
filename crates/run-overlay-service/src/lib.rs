//! Run Overlay Service - owns a live run overlay on behalf of a view
//!
//! Wraps the pure reconciliation core from `run-overlay` with:
//!
//! - `RunWatcher`: a single-writer task that serializes stream batches and
//!   tree snapshots for one watched root run and publishes render updates
//! - `TreeSource`: the seam for fetching authoritative run-tree snapshots,
//!   with an HTTP implementation
//! - `WatchConfig`: JSON configuration loaded from a config directory

pub mod config;
pub mod constants;
pub mod error;
pub mod tree_source;
pub mod watcher;

pub use config::WatchConfig;
pub use error::{ConfigError, Result, WatchError};
pub use tree_source::{HttpTreeSource, TreeSource};
pub use watcher::{RenderUpdate, RunWatcher, WatchStats};
