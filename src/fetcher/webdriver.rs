use crate::config::BrowserConfig;
use crate::fetcher::{FetchError, PageFetcher, dom};
use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder};
use std::time::Duration;
use tokio::time::timeout;

/// [`PageFetcher`] backed by a WebDriver server (ChromeDriver, geckodriver, ...).
///
/// Every fetch opens a fresh session, so no cookies or page state leak
/// between pages, and closes it before returning.
#[derive(Debug, Clone)]
pub struct WebDriverFetcher {
    config: BrowserConfig,
}

impl WebDriverFetcher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Connects to the WebDriver instance
    async fn open_session(&self) -> Result<PageSession, FetchError> {
        let mut builder = ClientBuilder::native();
        builder.capabilities(self.config.capabilities());

        let limit = self.config.navigation_timeout();
        let Ok(connected) = timeout(limit, builder.connect(&self.config.webdriver_url)).await
        else {
            ::log::error!(
                "Timed out connecting to WebDriver at {}",
                self.config.webdriver_url
            );
            return Err(FetchError::Session(format!(
                "no session from {} within {}s",
                self.config.webdriver_url,
                limit.as_secs()
            )));
        };

        match connected {
            Ok(client) => {
                ::log::trace!("Opened WebDriver session at {}", self.config.webdriver_url);
                Ok(PageSession {
                    client: Some(client),
                })
            }
            Err(e) => {
                ::log::error!(
                    "Failed to connect to WebDriver at {}: {}",
                    self.config.webdriver_url,
                    e
                );
                Err(FetchError::Session(format!(
                    "{} ({})",
                    e, self.config.webdriver_url
                )))
            }
        }
    }

    /// Navigates in a fresh session and returns the rendered DOM as HTML
    async fn rendered_source(&self, url: &str) -> Result<String, FetchError> {
        let started = std::time::Instant::now();
        let session = self.open_session().await?;
        let limit = self.config.navigation_timeout();

        let outcome = match timeout(limit, session.load(url)).await {
            Ok(result) => result,
            Err(_) => {
                ::log::error!("Timeout loading: {}", url);
                Err(FetchError::Timeout {
                    url: url.to_string(),
                    timeout: limit,
                })
            }
        };

        session.release(limit).await;

        ::log::debug!(
            "Loaded {} in {:.2} seconds",
            url,
            started.elapsed().as_secs_f64()
        );
        outcome
    }
}

#[async_trait]
impl PageFetcher for WebDriverFetcher {
    async fn fetch_text(&self, url: &str, max_chars: usize) -> Result<String, FetchError> {
        let html = self.rendered_source(url).await?;
        Ok(dom::truncate_chars(&dom::extract_text(&html), max_chars))
    }

    async fn fetch_links(&self, url: &str) -> Result<Vec<String>, FetchError> {
        let html = self.rendered_source(url).await?;
        let links = dom::extract_links(&html);
        ::log::info!("Found {} links in {}", links.len(), url);
        Ok(links)
    }
}

/// One WebDriver session, alive for a single fetch.
///
/// `release` closes it explicitly. If the owning future is dropped first,
/// fantoccini ends the session when its last client handle goes away.
struct PageSession {
    client: Option<Client>,
}

impl PageSession {
    async fn load(&self, url: &str) -> Result<String, FetchError> {
        let Some(client) = self.client.as_ref() else {
            return Err(FetchError::Session("session already released".to_string()));
        };

        // With the eager load strategy this returns at DOMContentLoaded
        client
            .goto(url)
            .await
            .map_err(|e| navigation_error(e, "navigate to", url))?;

        client
            .source()
            .await
            .map_err(|e| navigation_error(e, "read the DOM of", url))
    }

    /// Closes the session, giving up after `limit`
    async fn release(mut self, limit: Duration) {
        let Some(client) = self.client.take() else {
            return;
        };
        match timeout(limit, client.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => ::log::warn!("Failed to close WebDriver session: {}", e),
            Err(_) => ::log::warn!("Timed out closing WebDriver session"),
        }
    }
}

/// Maps a WebDriver command failure onto a per-page navigation error
fn navigation_error(error: fantoccini::error::CmdError, context: &str, url: &str) -> FetchError {
    let reason = error.to_string();
    if reason.contains("Unable to find session") {
        ::log::warn!("Lost session while trying to {} {}", context, url);
    } else {
        ::log::error!("Failed to {} {}: {}", context, url, reason);
    }

    FetchError::Navigation {
        url: url.to_string(),
        reason: format!("could not {}: {}", context, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_unresponsive_webdriver_times_out() {
        // Accepts connections but never answers the new-session request
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let fetcher = WebDriverFetcher::new(BrowserConfig {
            webdriver_url: format!("http://{}", address),
            navigation_timeout_secs: 1,
            ..BrowserConfig::default()
        });

        let started = Instant::now();
        let error = fetcher.fetch_links("http://a.com").await.unwrap_err();

        assert!(matches!(error, FetchError::Session(_)));
        assert!(!error.is_navigation());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
