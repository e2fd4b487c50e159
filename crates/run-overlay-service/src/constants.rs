//! Service-wide constants
//!
//! Single source of truth for configuration defaults and endpoint layout.

/// Default values for watch configuration
pub mod defaults {
    /// Interval between tree polls while a run is watched (0 disables polling)
    pub const TREE_POLL_INTERVAL_MS: u64 = 5_000;
    /// Timeout for a single tree request
    pub const TREE_REQUEST_TIMEOUT_MS: u64 = 10_000;
    /// Capacity of the watcher's command queue
    pub const COMMAND_QUEUE_CAPACITY: usize = 256;
}

/// File names
pub mod files {
    /// Configuration file inside the config directory
    pub const CONFIG: &str = "overlay.json";
}

/// Run-tree endpoint layout: `{base}/runs/{root_run_id}/tree`
pub mod endpoints {
    pub const RUNS_SEGMENT: &str = "runs";
    pub const TREE_SEGMENT: &str = "tree";
}
