use crate::filter::LinkFilterConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Error type for loading and validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid exclude pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What happens to a newly discovered link whose domain is over quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaPolicy {
    /// Still visited; only flagged so later analysis skips it
    #[default]
    FlagOnly,
    /// Flagged and never visited
    Block,
}

/// Limits for a single crawl
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// URL to start crawling from
    pub seed_url: String,

    /// Deepest BFS level whose links are still followed
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Upper bound on the number of discovered URLs
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Pages per host[:port] admitted for analysis
    #[serde(default = "default_max_pages_per_domain")]
    pub max_pages_per_domain: usize,

    /// Characters of body text kept per page
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    #[serde(default)]
    pub quota_policy: QuotaPolicy,

    #[serde(flatten)]
    pub link_filter: LinkFilterConfig,
}

fn default_max_depth() -> usize {
    1
}

fn default_max_pages() -> usize {
    100
}

fn default_max_pages_per_domain() -> usize {
    100
}

fn default_max_chars() -> usize {
    5000
}

impl CrawlConfig {
    /// Create a new configuration with default limits
    pub fn new(seed_url: &str) -> Self {
        Self {
            seed_url: seed_url.to_string(),
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            max_pages_per_domain: default_max_pages_per_domain(),
            max_chars: default_max_chars(),
            quota_policy: QuotaPolicy::default(),
            link_filter: LinkFilterConfig::default(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_max_pages_per_domain(mut self, max_pages_per_domain: usize) -> Self {
        self.max_pages_per_domain = max_pages_per_domain;
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn with_quota_policy(mut self, quota_policy: QuotaPolicy) -> Self {
        self.quota_policy = quota_policy;
        self
    }

    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.link_filter.exclude_patterns = patterns;
        self
    }

    /// Reject configurations the crawler cannot run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seed_url.trim().is_empty() {
            return Err(ConfigError::Invalid("seed URL is empty".to_string()));
        }
        Url::parse(&self.seed_url).map_err(|e| {
            ConfigError::Invalid(format!("seed URL {:?} is not absolute: {}", self.seed_url, e))
        })?;
        if self.max_pages == 0 {
            return Err(ConfigError::Invalid("max_pages must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// How to reach and drive the browser behind the WebDriver endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// URL for the WebDriver instance
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Per-navigation timeout
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    /// Extra command-line arguments passed to the browser
    #[serde(default)]
    pub browser_args: Vec<String>,
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_headless() -> bool {
    true
}

fn default_navigation_timeout_secs() -> u64 {
    60
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            headless: default_headless(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            browser_args: Vec::new(),
        }
    }
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    /// WebDriver capabilities for a new session.
    ///
    /// `pageLoadStrategy: eager` makes navigation return at DOMContentLoaded,
    /// and the driver abandons a navigation after the same timeout we wait.
    pub fn capabilities(&self) -> Map<String, Value> {
        let mut chrome_args = self.browser_args.clone();
        let mut firefox_args = self.browser_args.clone();
        if self.headless {
            chrome_args.push("--headless=new".to_string());
            chrome_args.push("--disable-gpu".to_string());
            firefox_args.push("-headless".to_string());
        }

        let mut caps = Map::new();
        caps.insert("pageLoadStrategy".to_string(), json!("eager"));
        caps.insert(
            "timeouts".to_string(),
            json!({ "pageLoad": self.navigation_timeout().as_millis() as u64 }),
        );
        caps.insert("goog:chromeOptions".to_string(), json!({ "args": chrome_args }));
        caps.insert("moz:firefoxOptions".to_string(), json!({ "args": firefox_args }));
        caps
    }
}

/// Where and how to ask questions about page text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatorConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_annotator_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_annotator_model")]
    pub model: String,

    /// Environment variable holding the API key; unset means no auth header
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_annotator_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_annotator_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_annotator_endpoint(),
            model: default_annotator_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AnnotatorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Everything a batch run needs, as loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub crawl: CrawlConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    /// Questions asked about every analysed page
    #[serde(default)]
    pub prompts: Vec<String>,

    #[serde(default)]
    pub annotator: AnnotatorConfig,
}

impl BatchConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.crawl.validate()?;
        Ok(config)
    }
}
