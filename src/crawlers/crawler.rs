use crate::config::{ConfigError, CrawlConfig, QuotaPolicy};
use crate::error::CrawlError;
use crate::fetcher::PageFetcher;
use crate::filter::LinkFilter;
use crate::frontier::{Frontier, QueueEntry, VisitedSet};
use crate::progress::{ProgressNotifier, ProgressSink, SubscriptionId};
use crate::quota::DomainQuota;
use crate::results::{CrawlResult, PageContent};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Lifecycle of a crawler. A new `crawl` always starts again from `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Bounded breadth-first crawler.
///
/// Link discovery (`crawl`) and content retrieval (`fetch_contents`) are two
/// separate passes over the same [`PageFetcher`]. Fetches are issued one at a
/// time; the traversal state is owned here and never shared.
pub struct Crawler {
    config: CrawlConfig,
    fetcher: Arc<dyn PageFetcher>,
    link_filter: LinkFilter,
    progress: Arc<ProgressNotifier>,
    state: CrawlState,
    frontier: Frontier,
    visited: VisitedSet,
    quota: DomainQuota,
    flagged: BTreeSet<String>,
    navigation_errors: usize,
}

impl Crawler {
    pub fn new(config: CrawlConfig, fetcher: Arc<dyn PageFetcher>) -> Result<Self, CrawlError> {
        config.validate()?;
        let link_filter = LinkFilter::new(&config.link_filter).map_err(ConfigError::from)?;
        let quota = DomainQuota::new(config.max_pages_per_domain);

        Ok(Self {
            config,
            fetcher,
            link_filter,
            progress: Arc::new(ProgressNotifier::new()),
            state: CrawlState::Idle,
            frontier: Frontier::new(),
            visited: VisitedSet::new(),
            quota,
            flagged: BTreeSet::new(),
            navigation_errors: 0,
        })
    }

    /// Report through an existing notifier instead of a private one
    pub fn with_progress(mut self, progress: Arc<ProgressNotifier>) -> Self {
        self.progress = progress;
        self
    }

    pub fn subscribe(&self, sink: Arc<dyn ProgressSink>) -> SubscriptionId {
        self.progress.subscribe(sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.progress.unsubscribe(id)
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    /// URLs discovered by the latest crawl, including a cancelled one
    pub fn visited(&self) -> &VisitedSet {
        &self.visited
    }

    pub fn flagged(&self) -> &BTreeSet<String> {
        &self.flagged
    }

    /// Discover pages breadth-first from the seed URL.
    ///
    /// Stops when the frontier runs dry, the next page lies beyond
    /// `max_depth`, or `max_pages` URLs have been discovered.
    pub async fn crawl(&mut self, cancel: &CancellationToken) -> Result<CrawlResult, CrawlError> {
        self.reset();
        self.state = CrawlState::Running;
        self.progress
            .notify(format!("Starting crawl of {}", self.config.seed_url));

        // The seed counts against its own domain like any other page
        let seed = self.config.seed_url.to_lowercase();
        if !self.quota.admit(&seed).is_admitted() {
            self.flagged.insert(seed.clone());
        }
        self.visited.add(&seed);
        self.frontier.push(QueueEntry::new(seed, 0));

        let traversal = self.traverse(cancel).await;
        if let Err(e) = traversal {
            return Err(self.fail(e));
        }

        self.state = CrawlState::Completed;
        if self.navigation_errors > 0 {
            self.progress.notify(format!(
                "Crawl finished with degraded results: {} URLs found, {} pages could not be read",
                self.visited.len(),
                self.navigation_errors
            ));
        } else {
            self.progress
                .notify(format!("Crawl finished: {} URLs found", self.visited.len()));
        }

        Ok(CrawlResult {
            visited: self.visited.clone(),
            flagged: self.flagged.clone(),
            navigation_errors: self.navigation_errors,
        })
    }

    /// Retrieve the body text of every URL found by the latest crawl
    pub async fn fetch_contents(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageContent>, CrawlError> {
        self.state = CrawlState::Running;
        let urls = self.visited.to_vec();
        let total = urls.len();
        self.progress
            .notify(format!("{} sites found. Fetching content...", total));

        let mut pages = Vec::with_capacity(total);
        for (index, url) in urls.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(self.fail(CrawlError::Cancelled));
            }

            self.progress
                .notify(format!("Fetching content of {} ({}/{})", url, index + 1, total));
            let fetched = self.fetch_content(&url, cancel).await;
            let content = match fetched {
                Ok(content) => content,
                Err(e) => return Err(self.fail(e)),
            };
            pages.push(PageContent::new(url, content));
        }

        self.state = CrawlState::Completed;
        let missing = pages.iter().filter(|page| page.content.is_none()).count();
        if missing > 0 {
            self.progress.notify(format!(
                "Content retrieved for {} of {} sites; {} could not be loaded",
                total - missing,
                total,
                missing
            ));
        } else {
            self.progress
                .notify(format!("Content retrieved for {} sites", total));
        }
        Ok(pages)
    }

    /// Body text of a single page, or `None` if it could not be loaded
    pub async fn fetch_content(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CrawlError> {
        let outcome = until_cancelled(
            cancel,
            self.fetcher.fetch_text(url, self.config.max_chars),
        )
        .await?;

        match outcome {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.is_navigation() => {
                self.progress
                    .notify(format!("Could not get content of {}: {}", url, e));
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reset(&mut self) {
        self.frontier = Frontier::new();
        self.visited = VisitedSet::new();
        self.quota = DomainQuota::new(self.config.max_pages_per_domain);
        self.flagged.clear();
        self.navigation_errors = 0;
    }

    async fn traverse(&mut self, cancel: &CancellationToken) -> Result<(), CrawlError> {
        loop {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }
            let Some(entry) = self.next_entry() else {
                break;
            };

            self.progress.notify(format!(
                "Extracting links from {} - found {} of {} - depth {}",
                entry.url,
                self.visited.len(),
                self.config.max_pages,
                entry.depth
            ));

            let fetched = until_cancelled(cancel, self.fetcher.fetch_links(&entry.url)).await?;
            let links = match fetched {
                Ok(links) => links,
                Err(e) if e.is_navigation() => {
                    self.navigation_errors += 1;
                    self.progress
                        .notify(format!("Error extracting links from {}: {}", entry.url, e));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if !self.enqueue_links(&entry, &links) {
                break;
            }
        }

        Ok(())
    }

    /// Pops the next entry unless a depth or page limit ends the traversal
    fn next_entry(&mut self) -> Option<QueueEntry> {
        let next = self.frontier.peek()?;
        if next.depth > self.config.max_depth {
            ::log::debug!("Next entry {} is beyond max depth", next.url);
            return None;
        }
        if self.visited.len() >= self.config.max_pages {
            return None;
        }
        self.frontier.pop()
    }

    /// Queues the new links found on `entry`.
    ///
    /// Returns `false` once the page limit is reached.
    fn enqueue_links(&mut self, entry: &QueueEntry, links: &[String]) -> bool {
        let mut on_page = HashSet::new();
        let accepted = self.link_filter.retain(links.iter().map(String::as_str));
        ::log::trace!(
            "Link filter kept {} of {} links on {}",
            accepted.len(),
            links.len(),
            entry.url
        );

        for href in accepted {
            let url = resolve_href(&entry.url, href).to_lowercase();
            if !on_page.insert(url.clone()) {
                continue;
            }
            // Under Block, rejected links are remembered in `flagged` only
            if self.visited.contains(&url) || self.flagged.contains(&url) {
                continue;
            }

            if !self.quota.admit(&url).is_admitted() {
                self.flagged.insert(url.clone());
                if self.config.quota_policy == QuotaPolicy::Block {
                    self.progress
                        .notify(format!("Skipping {}: domain quota reached", url));
                    continue;
                }
            }

            let depth = entry.depth + 1;
            self.visited.add(&url);
            self.progress.notify(format!(
                "Will visit {} ({}/{}) depth {}",
                url,
                self.visited.len(),
                self.config.max_pages,
                depth
            ));
            self.frontier.push(QueueEntry::new(url, depth));

            if self.visited.len() >= self.config.max_pages {
                self.progress.notify(format!(
                    "Reached the limit of {} pages",
                    self.config.max_pages
                ));
                return false;
            }
        }

        true
    }

    fn fail(&mut self, error: CrawlError) -> CrawlError {
        if error.is_cancelled() {
            self.state = CrawlState::Cancelled;
            self.progress.notify("Crawl cancelled");
        } else {
            self.state = CrawlState::Failed;
            self.progress.notify(format!("Crawl failed: {}", error));
        }
        error
    }
}

/// Races `future` against the token. The future is dropped on cancellation,
/// which releases whatever browser session it holds.
async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, CrawlError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CrawlError::Cancelled),
        output = future => Ok(output),
    }
}

/// Absolute hrefs are kept verbatim; relative ones are joined onto the page URL
fn resolve_href(page_url: &str, href: &str) -> String {
    let href = href.trim();
    if Url::parse(href).is_ok() {
        return href.to_string();
    }

    match Url::parse(page_url).and_then(|base| base.join(href)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => href.to_string(),
    }
}
