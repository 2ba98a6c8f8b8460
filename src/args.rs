use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use site_batch::config::ConfigError;
use site_batch::{AnnotatorConfig, BatchConfig, BrowserConfig, CrawlConfig, QuotaPolicy};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "site-batch")]
#[command(about = "Crawl a site breadth-first, store every page and ask questions about it")]
#[command(version)]
pub struct Args {
    /// SQLite database holding past and new batches
    #[arg(long, global = true, default_value = "site-batch.sqlite")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl a site and store the batch
    Run(RunArgs),

    /// List stored batches
    List,

    /// Print one stored batch as JSON
    Show {
        /// Batch id as printed by `list`
        id: i64,

        /// Write the batch here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ClapArgs, Debug)]
pub struct RunArgs {
    /// URL to start crawling from
    #[arg(required_unless_present = "config")]
    pub seed: Option<String>,

    /// JSON batch configuration; command-line values override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Deepest level whose links are still followed
    #[arg(short, long)]
    pub depth: Option<usize>,

    /// Upper bound on the number of URLs discovered
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Pages per domain admitted for analysis
    #[arg(long)]
    pub max_pages_per_domain: Option<usize>,

    /// Characters of text kept per page
    #[arg(long)]
    pub max_chars: Option<usize>,

    /// What to do with links whose domain is over quota
    #[arg(long, value_enum)]
    pub quota_policy: Option<QuotaPolicyArg>,

    /// Skip links matching this regex (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Question to ask about every analysed page (repeatable)
    #[arg(long = "prompt")]
    pub prompts: Vec<String>,

    /// Chat model used to answer prompts
    #[arg(long)]
    pub model: Option<String>,

    /// WebDriver endpoint (falls back to WEBDRIVER_URL)
    #[arg(long)]
    pub webdriver_url: Option<String>,

    /// Also write the finished batch as JSON here
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum QuotaPolicyArg {
    FlagOnly,
    Block,
}

impl From<QuotaPolicyArg> for QuotaPolicy {
    fn from(arg: QuotaPolicyArg) -> Self {
        match arg {
            QuotaPolicyArg::FlagOnly => QuotaPolicy::FlagOnly,
            QuotaPolicyArg::Block => QuotaPolicy::Block,
        }
    }
}

impl RunArgs {
    /// Merge the config file (if any), the command line and `WEBDRIVER_URL`
    pub fn batch_config(&self) -> Result<BatchConfig, ConfigError> {
        let mut config = match (&self.config, &self.seed) {
            (Some(path), _) => BatchConfig::from_file(path)?,
            (None, Some(seed)) => BatchConfig {
                crawl: CrawlConfig::new(seed),
                browser: BrowserConfig::default(),
                prompts: Vec::new(),
                annotator: AnnotatorConfig::default(),
            },
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "a seed URL or --config is required".to_string(),
                ));
            }
        };

        let crawl = &mut config.crawl;
        if let Some(seed) = &self.seed {
            crawl.seed_url = seed.clone();
        }
        if let Some(depth) = self.depth {
            crawl.max_depth = depth;
        }
        if let Some(max_pages) = self.max_pages {
            crawl.max_pages = max_pages;
        }
        if let Some(max_pages_per_domain) = self.max_pages_per_domain {
            crawl.max_pages_per_domain = max_pages_per_domain;
        }
        if let Some(max_chars) = self.max_chars {
            crawl.max_chars = max_chars;
        }
        if let Some(policy) = self.quota_policy {
            crawl.quota_policy = policy.into();
        }
        crawl.link_filter.exclude_patterns.extend(self.exclude.iter().cloned());

        config.prompts.extend(self.prompts.iter().cloned());
        if let Some(model) = &self.model {
            config.annotator.model = model.clone();
        }

        // Flag beats environment beats file
        if let Some(url) = &self.webdriver_url {
            config.browser.webdriver_url = url.clone();
        } else if let Ok(url) = std::env::var("WEBDRIVER_URL") {
            if !url.is_empty() {
                config.browser.webdriver_url = url;
            }
        }

        config.crawl.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(args: &[&str]) -> RunArgs {
        let parsed = Args::parse_from(["site-batch", "run"].iter().chain(args));
        match parsed.command {
            Command::Run(run) => run,
            other => panic!("expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_seed_with_overrides() {
        let args = run_args(&[
            "https://example.com",
            "--depth",
            "2",
            "--max-pages-per-domain",
            "3",
            "--quota-policy",
            "block",
            "--exclude",
            r"\.pdf$",
            "--exclude",
            "/login",
            "--prompt",
            "Purpose?",
            "--model",
            "llama3",
            "--webdriver-url",
            "http://localhost:9515",
        ]);
        let config = args.batch_config().unwrap();

        assert_eq!(config.crawl.seed_url, "https://example.com");
        assert_eq!(config.crawl.max_depth, 2);
        assert_eq!(config.crawl.max_pages, 100);
        assert_eq!(config.crawl.max_pages_per_domain, 3);
        assert_eq!(config.crawl.quota_policy, QuotaPolicy::Block);
        assert_eq!(config.crawl.link_filter.exclude_patterns, vec![r"\.pdf$", "/login"]);
        assert_eq!(config.prompts, vec!["Purpose?"]);
        assert_eq!(config.annotator.model, "llama3");
        assert_eq!(config.browser.webdriver_url, "http://localhost:9515");
    }

    #[test]
    fn test_seed_or_config_is_required() {
        assert!(Args::try_parse_from(["site-batch", "run"]).is_err());
        assert!(Args::try_parse_from(["site-batch", "run", "--config", "batch.json"]).is_ok());
    }

    #[test]
    fn test_invalid_seed_is_rejected() {
        let args = run_args(&["not a url", "--webdriver-url", "http://x"]);
        assert!(args.batch_config().is_err());
    }

    #[test]
    fn test_history_commands() {
        let args = Args::parse_from(["site-batch", "list", "--db", "history.sqlite"]);
        assert!(matches!(args.command, Command::List));
        assert_eq!(args.db, PathBuf::from("history.sqlite"));

        let args = Args::parse_from(["site-batch", "show", "7"]);
        assert!(matches!(args.command, Command::Show { id: 7, output: None }));
        assert_eq!(args.db, PathBuf::from("site-batch.sqlite"));
    }
}
