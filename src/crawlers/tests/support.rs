use crate::fetcher::{FetchError, PageFetcher, dom};
use crate::progress::{ProgressEvent, ProgressNotifier, ProgressSink};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// In-memory stand-in for a browser.
///
/// Pages are keyed by the exact URL the crawler asks for. Each call holds a
/// counted "session" for its whole duration so tests can check release.
#[derive(Default)]
pub struct FakeFetcher {
    links: HashMap<String, Vec<String>>,
    texts: HashMap<String, String>,
    failing: HashSet<String>,
    broken_session: HashSet<String>,
    hanging: HashSet<String>,
    cancel_on: Option<(String, CancellationToken)>,
    open_sessions: Arc<AtomicUsize>,
    link_calls: Mutex<Vec<String>>,
    text_calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, links: &[&str]) -> Self {
        self.links
            .insert(url.to_string(), links.iter().map(|l| l.to_string()).collect());
        self
    }

    pub fn text(mut self, url: &str, text: &str) -> Self {
        self.texts.insert(url.to_string(), text.to_string());
        self
    }

    /// Every fetch of `url` fails with a navigation error
    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    /// Every fetch of `url` fails to open a browser session
    pub fn broken_session(mut self, url: &str) -> Self {
        self.broken_session.insert(url.to_string());
        self
    }

    /// Every fetch of `url` never completes
    pub fn hanging(mut self, url: &str) -> Self {
        self.hanging.insert(url.to_string());
        self
    }

    /// Cancel `token` as soon as `url` starts loading
    pub fn cancel_on(mut self, url: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((url.to_string(), token));
        self
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn link_calls(&self) -> Vec<String> {
        self.link_calls.lock().unwrap().clone()
    }

    pub fn text_calls(&self) -> Vec<String> {
        self.text_calls.lock().unwrap().clone()
    }

    async fn load(&self, url: &str) -> Result<(), FetchError> {
        if let Some((trigger, token)) = &self.cancel_on {
            if trigger == url {
                token.cancel();
            }
        }
        if self.hanging.contains(url) {
            std::future::pending::<()>().await;
        }
        if self.broken_session.contains(url) {
            return Err(FetchError::Session("webdriver refused connection".to_string()));
        }
        if self.failing.contains(url) {
            return Err(FetchError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch_text(&self, url: &str, max_chars: usize) -> Result<String, FetchError> {
        let _session = SessionGuard::open(&self.open_sessions);
        self.text_calls.lock().unwrap().push(url.to_string());
        self.load(url).await?;
        let text = self.texts.get(url).cloned().unwrap_or_default();
        Ok(dom::truncate_chars(&text, max_chars))
    }

    async fn fetch_links(&self, url: &str) -> Result<Vec<String>, FetchError> {
        let _session = SessionGuard::open(&self.open_sessions);
        self.link_calls.lock().unwrap().push(url.to_string());
        self.load(url).await?;
        Ok(self.links.get(url).cloned().unwrap_or_default())
    }
}

struct SessionGuard(Arc<AtomicUsize>);

impl SessionGuard {
    fn open(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Collects every progress message emitted on a notifier
#[derive(Default)]
pub struct MessageLog(Mutex<Vec<String>>);

impl MessageLog {
    pub fn attach(notifier: &ProgressNotifier) -> Arc<Self> {
        let log = Arc::new(Self::default());
        notifier.subscribe(log.clone());
        log
    }

    pub fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

impl ProgressSink for MessageLog {
    fn notify(&self, event: &ProgressEvent) {
        self.0.lock().unwrap().push(event.message.clone());
    }
}

/// Crawler over `fetcher` whose progress messages are recorded
pub fn crawler_with_log(
    config: crate::config::CrawlConfig,
    fetcher: &Arc<FakeFetcher>,
) -> (crate::crawlers::Crawler, Arc<MessageLog>) {
    let progress = Arc::new(ProgressNotifier::new());
    let log = MessageLog::attach(&progress);
    let crawler = crate::crawlers::Crawler::new(config, fetcher.clone())
        .unwrap()
        .with_progress(progress);
    (crawler, log)
}
