use crate::frontier::VisitedSet;
use serde::Serialize;
use std::collections::BTreeSet;

/// Outcome of a completed traversal
#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    /// Every URL discovered, lowercased, in discovery order
    pub visited: VisitedSet,

    /// URLs whose domain was over quota when they were discovered
    pub flagged: BTreeSet<String>,

    /// Pages whose links could not be read
    pub navigation_errors: usize,
}

impl CrawlResult {
    /// Whether `url` should be left out of deeper analysis
    pub fn is_flagged(&self, url: &str) -> bool {
        self.flagged.contains(&url.to_lowercase())
    }
}

/// Body text retrieved for one visited URL
#[derive(Debug, Clone, Serialize)]
pub struct PageContent {
    pub url: String,

    /// `None` when the page could not be loaded
    pub content: Option<String>,
}

impl PageContent {
    pub fn new(url: String, content: Option<String>) -> Self {
        Self { url, content }
    }
}
