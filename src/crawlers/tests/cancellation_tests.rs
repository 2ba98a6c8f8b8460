use super::support::{FakeFetcher, crawler_with_log};
use crate::config::CrawlConfig;
use crate::crawlers::CrawlState;
use crate::error::CrawlError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_cancel_during_fetch_releases_session() {
    let cancel = CancellationToken::new();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .page("http://a.com", &["http://a.com/1", "http://a.com/2"])
            .page("http://a.com/2", &["http://a.com/never"])
            .hanging("http://a.com/1")
            .cancel_on("http://a.com/1", cancel.clone()),
    );
    let config = CrawlConfig::new("http://a.com").with_max_depth(3);
    let (mut crawler, log) = crawler_with_log(config, &fetcher);

    let error = crawler.crawl(&cancel).await.unwrap_err();

    assert!(error.is_cancelled());
    assert_eq!(crawler.state(), CrawlState::Cancelled);
    assert_eq!(
        crawler.visited().to_vec(),
        vec!["http://a.com", "http://a.com/1", "http://a.com/2"]
    );
    assert_eq!(fetcher.open_sessions(), 0);
    assert_eq!(log.messages().last().unwrap(), "Crawl cancelled");
}

#[tokio::test]
async fn test_cancel_from_another_task() {
    let cancel = CancellationToken::new();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .page("http://a.com", &["http://a.com/slow"])
            .hanging("http://a.com/slow"),
    );
    let (mut crawler, _log) = crawler_with_log(CrawlConfig::new("http://a.com"), &fetcher);

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), crawler.crawl(&cancel))
        .await
        .expect("cancellation should interrupt the hanging fetch");

    assert!(matches!(outcome, Err(CrawlError::Cancelled)));
    assert_eq!(fetcher.open_sessions(), 0);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let fetcher = Arc::new(FakeFetcher::new().page("http://a.com", &["http://a.com/x"]));
    let (mut crawler, _log) = crawler_with_log(CrawlConfig::new("http://a.com"), &fetcher);

    let error = crawler.crawl(&cancel).await.unwrap_err();

    assert!(error.is_cancelled());
    assert!(fetcher.link_calls().is_empty());
    assert_eq!(crawler.visited().to_vec(), vec!["http://a.com"]);
}

#[tokio::test]
async fn test_cancel_during_content_pass() {
    let cancel = CancellationToken::new();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .page("http://a.com", &["http://a.com/1", "http://a.com/2"])
            .text("http://a.com", "home")
            .hanging("http://a.com/1")
            .cancel_on("http://a.com/1", cancel.clone()),
    );
    // Depth 0: the depth-1 pages are discovered but never loaded while crawling
    let config = CrawlConfig::new("http://a.com").with_max_depth(0);
    let (mut crawler, log) = crawler_with_log(config, &fetcher);
    crawler.crawl(&CancellationToken::new()).await.unwrap();

    let error = crawler.fetch_contents(&cancel).await.unwrap_err();

    assert!(error.is_cancelled());
    assert_eq!(crawler.state(), CrawlState::Cancelled);
    assert_eq!(fetcher.text_calls(), vec!["http://a.com", "http://a.com/1"]);
    assert_eq!(fetcher.open_sessions(), 0);
    assert_eq!(log.messages().last().unwrap(), "Crawl cancelled");
}

#[tokio::test]
async fn test_cancel_during_last_fetch_is_not_completed() {
    let cancel = CancellationToken::new();
    // The fetch of the seed finishes, but the token fires while it runs
    let fetcher = Arc::new(
        FakeFetcher::new()
            .page("http://a.com", &["http://a.com/x"])
            .cancel_on("http://a.com", cancel.clone()),
    );
    let config = CrawlConfig::new("http://a.com").with_max_depth(0);
    let (mut crawler, log) = crawler_with_log(config, &fetcher);

    let error = crawler.crawl(&cancel).await.unwrap_err();

    assert!(error.is_cancelled());
    assert_eq!(crawler.state(), CrawlState::Cancelled);
    assert!(!log.contains("Crawl finished"));
}
