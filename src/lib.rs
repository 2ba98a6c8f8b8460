pub mod batch;
pub mod config;
pub mod crawlers;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod frontier;
pub mod progress;
pub mod quota;
pub mod results;

// Re-export commonly used types for convenience
pub use batch::{
    Annotator, BatchRunner, BatchStore, ChatAnnotator, MemoryBatchStore, SqliteBatchStore,
};
pub use config::{AnnotatorConfig, BatchConfig, BrowserConfig, CrawlConfig, QuotaPolicy};
pub use crawlers::{CrawlState, Crawler};
pub use error::CrawlError;
pub use fetcher::{FetchError, PageFetcher, WebDriverFetcher};
pub use progress::{ProgressEvent, ProgressNotifier, ProgressSink};
pub use results::{CrawlResult, PageContent};
