//! Run-tree sources
//!
//! The watcher never talks to the network directly; it asks a `TreeSource`
//! for the authoritative snapshot of a root run.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use run_overlay::TreeSnapshot;

use crate::config::WatchConfig;
use crate::constants::endpoints;
use crate::error::{Result, WatchError};

/// Anything that can produce a run-tree snapshot
#[async_trait]
pub trait TreeSource: Send + Sync {
    /// Fetch the current tree for `root_run_id`
    async fn fetch_tree(&self, root_run_id: &str) -> Result<TreeSnapshot>;
}

/// Tree source backed by `GET {base}/runs/{root_run_id}/tree`
#[derive(Debug, Clone)]
pub struct HttpTreeSource {
    client: Client,
    base_url: Url,
}

impl HttpTreeSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            WatchError::tree_fetch(format!("invalid tree base URL '{}': {}", base_url, e), false)
        })?;
        if base_url.cannot_be_a_base() {
            return Err(WatchError::tree_fetch(
                format!("tree base URL '{}' cannot carry a path", base_url),
                false,
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                WatchError::tree_fetch(format!("failed to build HTTP client: {}", e), false)
            })?;
        Ok(Self { client, base_url })
    }

    /// Build from configuration, or `None` when no base URL is set
    pub fn from_config(config: &WatchConfig) -> Option<Result<Self>> {
        config
            .tree_base_url
            .as_deref()
            .map(|url| Self::new(url, config.tree_request_timeout()))
    }

    pub fn tree_url(&self, root_run_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend([endpoints::RUNS_SEGMENT, root_run_id, endpoints::TREE_SEGMENT]);
        }
        url
    }
}

/// Server errors and throttling are worth retrying; other statuses are not
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

#[async_trait]
impl TreeSource for HttpTreeSource {
    async fn fetch_tree(&self, root_run_id: &str) -> Result<TreeSnapshot> {
        let url = self.tree_url(root_run_id);
        log::debug!("Fetching run tree from {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| {
                WatchError::tree_fetch(format!("request to {} failed: {}", url, e), true)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WatchError::tree_fetch(
                format!("{} returned {}", url, status),
                is_retryable_status(status),
            ));
        }

        response
            .json::<TreeSnapshot>()
            .await
            .map_err(|e| WatchError::tree_fetch(format!("invalid tree from {}: {}", url, e), false))
    }
}
