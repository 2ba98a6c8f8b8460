//! Error types for crawl operations

use crate::config::ConfigError;
use crate::fetcher::FetchError;
use thiserror::Error;

/// Error type for a crawl or content pass.
///
/// Per-page navigation failures never show up here; the crawler recovers
/// them and reports them through progress events instead.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The crawl configuration cannot be run
    #[error("invalid crawl configuration: {0}")]
    Config(#[from] ConfigError),

    /// Stopped by the caller's cancellation token
    #[error("crawl cancelled")]
    Cancelled,

    /// A fetch failed in a way that is not specific to one page
    #[error("crawl failed: {0}")]
    Fetch(#[from] FetchError),
}

impl CrawlError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CrawlError::Cancelled)
    }
}
