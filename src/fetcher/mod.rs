pub mod dom;
pub mod webdriver;

pub use webdriver::WebDriverFetcher;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Error type for page fetch operations
#[derive(Debug, Error)]
pub enum FetchError {
    /// Navigation or DOM extraction failed for this page
    #[error("failed to load {url}: {reason}")]
    Navigation { url: String, reason: String },

    /// The page did not reach DOM-content-loaded in time
    #[error("timed out after {}s loading {url}", timeout.as_secs())]
    Timeout { url: String, timeout: Duration },

    /// No browser session could be opened at all
    #[error("browser session unavailable: {0}")]
    Session(String),
}

impl FetchError {
    /// Navigation failures and timeouts concern a single page and are
    /// recovered by the crawler. Session failures are not.
    pub fn is_navigation(&self) -> bool {
        matches!(self, FetchError::Navigation { .. } | FetchError::Timeout { .. })
    }
}

/// Capability to load a page in a browser and read its rendered DOM.
///
/// Every call owns its browser session for exactly its own duration: the
/// session is released when the call returns, fails, or its future is
/// dropped.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Plain text of the page body, truncated to `max_chars` characters
    async fn fetch_text(&self, url: &str, max_chars: usize) -> Result<String, FetchError>;

    /// Raw `href` attribute of every anchor, in document order
    async fn fetch_links(&self, url: &str) -> Result<Vec<String>, FetchError>;
}
