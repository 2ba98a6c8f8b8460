//! Persistence contract for batches, and an in-memory implementation.

use crate::config::CrawlConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

/// Error type for storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} #{id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One crawl-and-analyse job
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: i64,
    pub seed_url: String,
    pub max_depth: usize,
    pub max_pages: usize,
    pub max_chars: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Parameters of a batch before it is stored
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub seed_url: String,
    pub max_depth: usize,
    pub max_pages: usize,
    pub max_chars: usize,
}

impl From<&CrawlConfig> for NewBatch {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            seed_url: config.seed_url.clone(),
            max_depth: config.max_depth,
            max_pages: config.max_pages,
            max_chars: config.max_chars,
        }
    }
}

/// Stored content of one crawled URL
#[derive(Debug, Clone, Serialize)]
pub struct BatchSite {
    pub id: i64,
    pub batch_id: i64,
    pub url: String,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchPrompt {
    pub id: i64,
    pub batch_id: i64,
    pub prompt: String,
}

/// Answer to one prompt for one site
#[derive(Debug, Clone, Serialize)]
pub struct BatchPromptResponse {
    pub id: i64,
    pub batch_id: i64,
    pub site_id: i64,
    pub prompt_id: i64,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn create_batch(&self, batch: NewBatch) -> Result<Batch, StoreError>;

    async fn create_site(
        &self,
        batch_id: i64,
        url: &str,
        content: Option<&str>,
    ) -> Result<BatchSite, StoreError>;

    async fn create_prompt(&self, batch_id: i64, prompt: &str) -> Result<BatchPrompt, StoreError>;

    async fn create_response(
        &self,
        batch_id: i64,
        site_id: i64,
        prompt_id: i64,
        answer: &str,
    ) -> Result<BatchPromptResponse, StoreError>;

    /// Stamp the batch as finished
    async fn finish_batch(
        &self,
        batch_id: i64,
        finished_at: DateTime<Utc>,
    ) -> Result<Batch, StoreError>;

    async fn batches(&self) -> Result<Vec<Batch>, StoreError>;

    async fn batch(&self, batch_id: i64) -> Result<Option<Batch>, StoreError>;

    async fn sites(&self, batch_id: i64) -> Result<Vec<BatchSite>, StoreError>;

    async fn prompts(&self, batch_id: i64) -> Result<Vec<BatchPrompt>, StoreError>;

    async fn responses(&self, batch_id: i64) -> Result<Vec<BatchPromptResponse>, StoreError>;
}

/// Everything stored for one batch, ready to serialize
#[derive(Debug, Clone, Serialize)]
pub struct BatchExport {
    pub batch: Batch,
    pub prompts: Vec<BatchPrompt>,
    pub sites: Vec<BatchSite>,
    pub responses: Vec<BatchPromptResponse>,
}

impl BatchExport {
    pub async fn load(store: &dyn BatchStore, batch_id: i64) -> Result<Self, StoreError> {
        let batch = store.batch(batch_id).await?.ok_or(StoreError::NotFound {
            kind: "batch",
            id: batch_id,
        })?;

        Ok(Self {
            batch,
            prompts: store.prompts(batch_id).await?,
            sites: store.sites(batch_id).await?,
            responses: store.responses(batch_id).await?,
        })
    }
}

#[derive(Debug, Default)]
struct Tables {
    last_id: i64,
    batches: Vec<Batch>,
    sites: Vec<BatchSite>,
    prompts: Vec<BatchPrompt>,
    responses: Vec<BatchPromptResponse>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn require_batch(&self, batch_id: i64) -> Result<(), StoreError> {
        if self.batches.iter().any(|b| b.id == batch_id) {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                kind: "batch",
                id: batch_id,
            })
        }
    }
}

/// Process-local store; contents are lost when it is dropped
#[derive(Debug, Default)]
pub struct MemoryBatchStore {
    tables: Mutex<Tables>,
}

impl MemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchStore for MemoryBatchStore {
    async fn create_batch(&self, batch: NewBatch) -> Result<Batch, StoreError> {
        let mut tables = self.tables.lock().await;
        let stored = Batch {
            id: tables.next_id(),
            seed_url: batch.seed_url,
            max_depth: batch.max_depth,
            max_pages: batch.max_pages,
            max_chars: batch.max_chars,
            created_at: Utc::now(),
            finished_at: None,
        };
        tables.batches.push(stored.clone());
        Ok(stored)
    }

    async fn create_site(
        &self,
        batch_id: i64,
        url: &str,
        content: Option<&str>,
    ) -> Result<BatchSite, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.require_batch(batch_id)?;
        let site = BatchSite {
            id: tables.next_id(),
            batch_id,
            url: url.to_string(),
            content: content.map(str::to_string),
            created_at: Utc::now(),
        };
        tables.sites.push(site.clone());
        Ok(site)
    }

    async fn create_prompt(&self, batch_id: i64, prompt: &str) -> Result<BatchPrompt, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.require_batch(batch_id)?;
        let stored = BatchPrompt {
            id: tables.next_id(),
            batch_id,
            prompt: prompt.to_string(),
        };
        tables.prompts.push(stored.clone());
        Ok(stored)
    }

    async fn create_response(
        &self,
        batch_id: i64,
        site_id: i64,
        prompt_id: i64,
        answer: &str,
    ) -> Result<BatchPromptResponse, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.require_batch(batch_id)?;
        if !tables.sites.iter().any(|s| s.id == site_id) {
            return Err(StoreError::NotFound {
                kind: "site",
                id: site_id,
            });
        }
        if !tables.prompts.iter().any(|p| p.id == prompt_id) {
            return Err(StoreError::NotFound {
                kind: "prompt",
                id: prompt_id,
            });
        }

        let response = BatchPromptResponse {
            id: tables.next_id(),
            batch_id,
            site_id,
            prompt_id,
            answer: answer.to_string(),
            created_at: Utc::now(),
        };
        tables.responses.push(response.clone());
        Ok(response)
    }

    async fn finish_batch(
        &self,
        batch_id: i64,
        finished_at: DateTime<Utc>,
    ) -> Result<Batch, StoreError> {
        let mut tables = self.tables.lock().await;
        let batch = tables
            .batches
            .iter_mut()
            .find(|b| b.id == batch_id)
            .ok_or(StoreError::NotFound {
                kind: "batch",
                id: batch_id,
            })?;
        batch.finished_at = Some(finished_at);
        Ok(batch.clone())
    }

    async fn batches(&self) -> Result<Vec<Batch>, StoreError> {
        Ok(self.tables.lock().await.batches.clone())
    }

    async fn batch(&self, batch_id: i64) -> Result<Option<Batch>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.batches.iter().find(|b| b.id == batch_id).cloned())
    }

    async fn sites(&self, batch_id: i64) -> Result<Vec<BatchSite>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sites
            .iter()
            .filter(|s| s.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn prompts(&self, batch_id: i64) -> Result<Vec<BatchPrompt>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .prompts
            .iter()
            .filter(|p| p.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn responses(&self, batch_id: i64) -> Result<Vec<BatchPromptResponse>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .responses
            .iter()
            .filter(|r| r.batch_id == batch_id)
            .cloned()
            .collect())
    }
}
