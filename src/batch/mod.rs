//! Batch orchestration: crawl a site, store what was found, and ask the
//! annotator every prompt about every page that qualifies for analysis.

pub mod chat;
pub mod sqlite;
pub mod store;

pub use chat::ChatAnnotator;
pub use sqlite::SqliteBatchStore;
pub use store::{
    Batch, BatchExport, BatchPrompt, BatchPromptResponse, BatchSite, BatchStore,
    MemoryBatchStore, NewBatch, StoreError,
};

use crate::config::CrawlConfig;
use crate::crawlers::Crawler;
use crate::error::CrawlError;
use crate::fetcher::PageFetcher;
use crate::progress::{ProgressNotifier, ProgressSink, SubscriptionId};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure reported by an [`Annotator`]
#[derive(Debug, Error)]
#[error("annotation failed: {0}")]
pub struct AnnotateError(pub String);

/// Question-answering service applied to page text
#[async_trait]
pub trait Annotator: Send + Sync {
    async fn answer(&self, text: &str, prompt: &str) -> Result<String, AnnotateError>;
}

/// Error type for batch runs
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Crawl(#[from] CrawlError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("prompts were given but no annotator is configured")]
    NoAnnotator,
}

impl BatchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BatchError::Crawl(e) if e.is_cancelled())
    }
}

/// Summary of a finished batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch: Batch,
    pub sites: Vec<BatchSite>,
    /// Sites left out of analysis because their domain was over quota
    pub flagged: BTreeSet<String>,
    pub responses: usize,
}

/// Runs batches against a store, a page fetcher and an optional annotator
pub struct BatchRunner {
    store: Arc<dyn BatchStore>,
    fetcher: Arc<dyn PageFetcher>,
    annotator: Option<Arc<dyn Annotator>>,
    progress: Arc<ProgressNotifier>,
}

impl BatchRunner {
    pub fn new(store: Arc<dyn BatchStore>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            store,
            fetcher,
            annotator: None,
            progress: Arc::new(ProgressNotifier::new()),
        }
    }

    pub fn with_annotator(mut self, annotator: Arc<dyn Annotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    /// Observers see both batch-level and crawler progress
    pub fn subscribe(&self, sink: Arc<dyn ProgressSink>) -> SubscriptionId {
        self.progress.subscribe(sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.progress.unsubscribe(id)
    }

    pub fn store(&self) -> &Arc<dyn BatchStore> {
        &self.store
    }

    /// Create, crawl, store and analyse one batch.
    ///
    /// Cancellation is honoured during the crawl, the content pass and
    /// between annotator calls.
    pub async fn run(
        &self,
        config: CrawlConfig,
        prompts: &[String],
        cancel: &CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        let outcome = self.execute(config, prompts, cancel).await;
        match &outcome {
            Err(e) if e.is_cancelled() => self.progress.notify("Batch cancelled."),
            Err(e) => self.progress.notify(format!("Error: {}", e)),
            Ok(_) => {}
        }
        outcome
    }

    async fn execute(
        &self,
        config: CrawlConfig,
        prompts: &[String],
        cancel: &CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        if !prompts.is_empty() && self.annotator.is_none() {
            return Err(BatchError::NoAnnotator);
        }

        self.progress.notify("Starting batch...");
        let new_batch = NewBatch::from(&config);
        let mut crawler = Crawler::new(config, Arc::clone(&self.fetcher))?
            .with_progress(Arc::clone(&self.progress));

        let batch = self.store.create_batch(new_batch).await?;
        for prompt in prompts {
            self.store.create_prompt(batch.id, prompt).await?;
        }
        self.progress
            .notify(format!("Batch #{} saved. Starting crawler...", batch.id));

        let crawl = crawler.crawl(cancel).await?;
        let pages = crawler.fetch_contents(cancel).await?;

        let total = pages.len();
        let mut sites = Vec::with_capacity(total);
        for (index, page) in pages.iter().enumerate() {
            let site = self
                .store
                .create_site(batch.id, &page.url, page.content.as_deref())
                .await?;
            self.progress.notify(format!(
                "{} content saved ({}/{})",
                page.url,
                index + 1,
                total
            ));
            sites.push(site);
        }

        let responses = match &self.annotator {
            Some(annotator) if !prompts.is_empty() => {
                let stored_prompts = self.store.prompts(batch.id).await?;
                self.analyse(annotator.as_ref(), &sites, &stored_prompts, &crawl.flagged, cancel)
                    .await?
            }
            _ => 0,
        };

        let batch = self.store.finish_batch(batch.id, Utc::now()).await?;
        self.progress
            .notify(format!("Batch #{} finished!", batch.id));

        Ok(BatchReport {
            batch,
            sites,
            flagged: crawl.flagged,
            responses,
        })
    }

    /// Ask every prompt about every analysable site; returns answers stored
    async fn analyse(
        &self,
        annotator: &dyn Annotator,
        sites: &[BatchSite],
        prompts: &[BatchPrompt],
        flagged: &BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> Result<usize, BatchError> {
        let mut stored = 0;

        for (index, site) in sites.iter().enumerate() {
            if flagged.contains(&site.url) {
                self.progress
                    .notify(format!("{} skipped: domain quota reached", site.url));
                continue;
            }
            let Some(content) = site.content.as_deref() else {
                self.progress
                    .notify(format!("{} skipped: no content", site.url));
                continue;
            };

            self.progress.notify(format!(
                "{} analysing ({}/{})...",
                site.url,
                index + 1,
                sites.len()
            ));

            for prompt in prompts {
                let answer = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CrawlError::Cancelled.into()),
                    answer = annotator.answer(content, &prompt.prompt) => answer,
                };

                match answer {
                    Ok(answer) => {
                        self.store
                            .create_response(site.batch_id, site.id, prompt.id, &answer)
                            .await?;
                        stored += 1;
                        self.progress
                            .notify(format!("P: {}\nR: {}", prompt.prompt, answer));
                    }
                    Err(e) => {
                        self.progress
                            .notify(format!("{} / {:?}: {}", site.url, prompt.prompt, e));
                    }
                }
            }
        }

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawlers::tests::support::{FakeFetcher, MessageLog};
    use std::sync::Mutex;

    /// Answers with the prompt and the first word of the text
    #[derive(Default)]
    struct EchoAnnotator {
        calls: Mutex<Vec<(String, String)>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl Annotator for EchoAnnotator {
        async fn answer(&self, text: &str, prompt: &str) -> Result<String, AnnotateError> {
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), prompt.to_string()));
            if self.fail_on.as_deref() == Some(text) {
                return Err(AnnotateError("model unavailable".to_string()));
            }
            let first_word = text.split_whitespace().next().unwrap_or("");
            Ok(format!("{} -> {}", prompt, first_word))
        }
    }

    fn site() -> FakeFetcher {
        FakeFetcher::new()
            .page(
                "http://a.com",
                &["http://a.com/x", "http://b.com/1", "http://b.com/2", "http://c.com/dead"],
            )
            .text("http://a.com", "Home page")
            .text("http://a.com/x", "Xylophones for sale")
            .text("http://b.com/1", "Bee keeping")
            .text("http://b.com/2", "Bonus page")
            .failing("http://c.com/dead")
    }

    fn config() -> CrawlConfig {
        CrawlConfig::new("http://a.com")
            .with_max_depth(0)
            .with_max_pages_per_domain(1)
    }

    fn prompts() -> Vec<String> {
        vec!["Purpose?".to_string(), "Typos?".to_string()]
    }

    #[tokio::test]
    async fn test_full_batch() {
        let store = Arc::new(MemoryBatchStore::new());
        let annotator = Arc::new(EchoAnnotator::default());
        let runner = BatchRunner::new(store.clone(), Arc::new(site()))
            .with_annotator(annotator.clone());
        let log = MessageLog::attach(&runner.progress);

        let report = runner
            .run(config(), &prompts(), &CancellationToken::new())
            .await
            .unwrap();

        // One stored site per discovered URL, including the unreadable one
        let urls: Vec<&str> = report.sites.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["http://a.com", "http://a.com/x", "http://b.com/1", "http://b.com/2", "http://c.com/dead"]
        );
        // The seed used up a.com's single slot
        assert_eq!(
            report.flagged.iter().collect::<Vec<_>>(),
            vec!["http://a.com/x", "http://b.com/2"]
        );

        // Only a.com and b.com/1 are analysed; c.com/dead has no content
        assert_eq!(report.responses, 4);
        let analysed: BTreeSet<String> = annotator
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect();
        assert_eq!(
            analysed.into_iter().collect::<Vec<_>>(),
            vec!["Bee keeping", "Home page"]
        );
        assert!(report.batch.finished_at.is_some());

        let export = BatchExport::load(store.as_ref(), report.batch.id).await.unwrap();
        assert_eq!(export.prompts.len(), 2);
        assert_eq!(export.responses.len(), 4);
        assert_eq!(export.responses[0].answer, "Purpose? -> Home");

        assert_eq!(log.messages()[0], "Starting batch...");
        assert!(log.contains("Starting crawl of http://a.com"));
        assert!(log.contains("http://a.com/x skipped: domain quota reached"));
        assert!(log.contains("http://b.com/2 skipped: domain quota reached"));
        assert!(log.contains("http://c.com/dead skipped: no content"));
        assert_eq!(
            log.messages().last().unwrap(),
            &format!("Batch #{} finished!", report.batch.id)
        );
    }

    #[tokio::test]
    async fn test_batch_without_prompts() {
        let store = Arc::new(MemoryBatchStore::new());
        let runner = BatchRunner::new(store.clone(), Arc::new(site()));

        let report = runner
            .run(config(), &[], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.sites.len(), 5);
        assert_eq!(report.responses, 0);
        assert_eq!(store.batches().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prompts_need_an_annotator() {
        let store = Arc::new(MemoryBatchStore::new());
        let runner = BatchRunner::new(store.clone(), Arc::new(site()));

        let error = runner
            .run(config(), &prompts(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, BatchError::NoAnnotator));
        assert!(store.batches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_annotator_errors_are_skipped() {
        let store = Arc::new(MemoryBatchStore::new());
        let annotator = Arc::new(EchoAnnotator {
            fail_on: Some("Home page".to_string()),
            ..EchoAnnotator::default()
        });
        let runner =
            BatchRunner::new(store.clone(), Arc::new(site())).with_annotator(annotator);
        let log = MessageLog::attach(&runner.progress);

        let report = runner
            .run(config(), &prompts(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.responses, 2);
        assert!(log.contains("annotation failed: model unavailable"));
    }

    #[tokio::test]
    async fn test_cancelled_batch_is_left_unfinished() {
        let cancel = CancellationToken::new();
        let fetcher = site()
            .hanging("http://a.com/x")
            .cancel_on("http://a.com/x", cancel.clone());
        let store = Arc::new(MemoryBatchStore::new());
        let runner = BatchRunner::new(store.clone(), Arc::new(fetcher));
        let log = MessageLog::attach(&runner.progress);

        let error = runner.run(config(), &[], &cancel).await.unwrap_err();

        assert!(error.is_cancelled());
        assert_eq!(log.messages().last().unwrap(), "Batch cancelled.");
        let batches = store.batches().await.unwrap();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].finished_at.is_none());
        assert!(store.sites(batches[0].id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_stores_nothing() {
        let store = Arc::new(MemoryBatchStore::new());
        let runner = BatchRunner::new(store.clone(), Arc::new(site()));

        let error = runner
            .run(CrawlConfig::new(""), &[], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, BatchError::Crawl(CrawlError::Config(_))));
        assert!(store.batches().await.unwrap().is_empty());
    }
}
