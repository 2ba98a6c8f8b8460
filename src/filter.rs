use regex::Regex;
use serde::{Deserialize, Serialize};

/// Prefixes that never lead to a navigable page
const REJECTED_PREFIXES: [&str; 2] = ["javascript:", "#"];

/// Schemes that are rejected wherever they appear in the href
const REJECTED_MARKERS: [&str; 2] = ["mailto:", "tel:"];

/// Configuration for link filtering in the crawler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkFilterConfig {
    /// Regex patterns for hrefs to exclude on top of the built-in rules
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// Decides which raw hrefs found on a page are worth following
#[derive(Debug, Default)]
pub struct LinkFilter {
    exclude_regexes: Vec<Regex>,
}

impl LinkFilter {
    /// Create a new link filter from configuration
    pub fn new(config: &LinkFilterConfig) -> Result<Self, regex::Error> {
        let mut exclude_regexes = Vec::with_capacity(config.exclude_patterns.len());
        for pattern in &config.exclude_patterns {
            exclude_regexes.push(Regex::new(pattern)?);
        }

        Ok(Self { exclude_regexes })
    }

    /// Built-in rule: rejects script, fragment, mail and phone hrefs.
    ///
    /// Everything else, absolute or relative, is a candidate.
    pub fn is_navigable(href: &str) -> bool {
        if REJECTED_PREFIXES
            .iter()
            .any(|prefix| href.starts_with(prefix))
        {
            return false;
        }

        !REJECTED_MARKERS.iter().any(|marker| href.contains(marker))
    }

    /// Apply the built-in rule followed by the configured exclude patterns
    pub fn accepts(&self, href: &str) -> bool {
        if !Self::is_navigable(href) {
            return false;
        }

        // Exclude patterns take effect only after the built-in rule passes
        !self.exclude_regexes.iter().any(|regex| regex.is_match(href))
    }

    /// Keep the accepted hrefs, preserving their order
    pub fn retain<'a, I>(&self, hrefs: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        hrefs.into_iter().filter(|href| self.accepts(href)).collect()
    }
}
