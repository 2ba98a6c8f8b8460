//! Durable [`BatchStore`] backed by SQLite.

use super::store::{
    Batch, BatchPrompt, BatchPromptResponse, BatchSite, BatchStore, NewBatch, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS batches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    seed_url TEXT NOT NULL,
    max_depth INTEGER NOT NULL,
    max_pages INTEGER NOT NULL,
    max_chars INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    finished_at INTEGER
);

CREATE TABLE IF NOT EXISTS sites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES batches(id),
    url TEXT NOT NULL,
    content TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sites_batch ON sites(batch_id);

CREATE TABLE IF NOT EXISTS prompts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES batches(id),
    prompt TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_prompts_batch ON prompts(batch_id);

CREATE TABLE IF NOT EXISTS responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES batches(id),
    site_id INTEGER NOT NULL REFERENCES sites(id),
    prompt_id INTEGER NOT NULL REFERENCES prompts(id),
    answer TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_responses_batch ON responses(batch_id);
"#;

type BatchRow = (i64, String, i64, i64, i64, i64, Option<i64>);
type SiteRow = (i64, i64, String, Option<String>, i64);
type ResponseRow = (i64, i64, i64, i64, String, i64);

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        StoreError::Backend(error.to_string())
    }
}

/// Batches, sites, prompts and responses kept in a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteBatchStore {
    pool: SqlitePool,
}

impl SqliteBatchStore {
    /// Open the database at `path`, creating it and its tables if needed
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        ::log::debug!("Opened batch database at {}", path.display());
        Self::with_pool(pool).await
    }

    /// A private database that lives as long as the store
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Every connection to :memory: is a separate database, so keep exactly one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn require(&self, kind: &'static str, id: i64) -> Result<(), StoreError> {
        let sql = match kind {
            "batch" => "SELECT id FROM batches WHERE id = ?",
            "site" => "SELECT id FROM sites WHERE id = ?",
            _ => "SELECT id FROM prompts WHERE id = ?",
        };
        let found: Option<(i64,)> = sqlx::query_as(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound { kind, id }),
        }
    }
}

fn to_timestamp(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_timestamp(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Backend(format!("invalid timestamp {}", millis)))
}

fn to_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_count(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

fn batch_from_row(row: BatchRow) -> Result<Batch, StoreError> {
    let (id, seed_url, max_depth, max_pages, max_chars, created_at, finished_at) = row;
    Ok(Batch {
        id,
        seed_url,
        max_depth: from_count(max_depth),
        max_pages: from_count(max_pages),
        max_chars: from_count(max_chars),
        created_at: from_timestamp(created_at)?,
        finished_at: finished_at.map(from_timestamp).transpose()?,
    })
}

fn site_from_row(row: SiteRow) -> Result<BatchSite, StoreError> {
    let (id, batch_id, url, content, created_at) = row;
    Ok(BatchSite {
        id,
        batch_id,
        url,
        content,
        created_at: from_timestamp(created_at)?,
    })
}

fn response_from_row(row: ResponseRow) -> Result<BatchPromptResponse, StoreError> {
    let (id, batch_id, site_id, prompt_id, answer, created_at) = row;
    Ok(BatchPromptResponse {
        id,
        batch_id,
        site_id,
        prompt_id,
        answer,
        created_at: from_timestamp(created_at)?,
    })
}

const BATCH_COLUMNS: &str =
    "SELECT id, seed_url, max_depth, max_pages, max_chars, created_at, finished_at FROM batches";

#[async_trait]
impl BatchStore for SqliteBatchStore {
    async fn create_batch(&self, batch: NewBatch) -> Result<Batch, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO batches (seed_url, max_depth, max_pages, max_chars, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&batch.seed_url)
        .bind(to_count(batch.max_depth))
        .bind(to_count(batch.max_pages))
        .bind(to_count(batch.max_chars))
        .bind(to_timestamp(created_at))
        .execute(&self.pool)
        .await?;

        // Read back so timestamps carry the stored precision
        let id = result.last_insert_rowid();
        self.batch(id)
            .await?
            .ok_or(StoreError::NotFound { kind: "batch", id })
    }

    async fn create_site(
        &self,
        batch_id: i64,
        url: &str,
        content: Option<&str>,
    ) -> Result<BatchSite, StoreError> {
        self.require("batch", batch_id).await?;
        let created_at = to_timestamp(Utc::now());
        let result = sqlx::query(
            "INSERT INTO sites (batch_id, url, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(batch_id)
        .bind(url)
        .bind(content)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        site_from_row((
            result.last_insert_rowid(),
            batch_id,
            url.to_string(),
            content.map(str::to_string),
            created_at,
        ))
    }

    async fn create_prompt(&self, batch_id: i64, prompt: &str) -> Result<BatchPrompt, StoreError> {
        self.require("batch", batch_id).await?;
        let result = sqlx::query("INSERT INTO prompts (batch_id, prompt) VALUES (?, ?)")
            .bind(batch_id)
            .bind(prompt)
            .execute(&self.pool)
            .await?;

        Ok(BatchPrompt {
            id: result.last_insert_rowid(),
            batch_id,
            prompt: prompt.to_string(),
        })
    }

    async fn create_response(
        &self,
        batch_id: i64,
        site_id: i64,
        prompt_id: i64,
        answer: &str,
    ) -> Result<BatchPromptResponse, StoreError> {
        self.require("batch", batch_id).await?;
        self.require("site", site_id).await?;
        self.require("prompt", prompt_id).await?;

        let created_at = to_timestamp(Utc::now());
        let result = sqlx::query(
            "INSERT INTO responses (batch_id, site_id, prompt_id, answer, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(batch_id)
        .bind(site_id)
        .bind(prompt_id)
        .bind(answer)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        response_from_row((
            result.last_insert_rowid(),
            batch_id,
            site_id,
            prompt_id,
            answer.to_string(),
            created_at,
        ))
    }

    async fn finish_batch(
        &self,
        batch_id: i64,
        finished_at: DateTime<Utc>,
    ) -> Result<Batch, StoreError> {
        let result = sqlx::query("UPDATE batches SET finished_at = ? WHERE id = ?")
            .bind(to_timestamp(finished_at))
            .bind(batch_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "batch",
                id: batch_id,
            });
        }

        self.batch(batch_id).await?.ok_or(StoreError::NotFound {
            kind: "batch",
            id: batch_id,
        })
    }

    async fn batches(&self) -> Result<Vec<Batch>, StoreError> {
        let rows: Vec<BatchRow> = sqlx::query_as(&format!("{} ORDER BY id", BATCH_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(batch_from_row).collect()
    }

    async fn batch(&self, batch_id: i64) -> Result<Option<Batch>, StoreError> {
        let row: Option<BatchRow> = sqlx::query_as(&format!("{} WHERE id = ?", BATCH_COLUMNS))
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(batch_from_row).transpose()
    }

    async fn sites(&self, batch_id: i64) -> Result<Vec<BatchSite>, StoreError> {
        let rows: Vec<SiteRow> = sqlx::query_as(
            "SELECT id, batch_id, url, content, created_at FROM sites \
             WHERE batch_id = ? ORDER BY id",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(site_from_row).collect()
    }

    async fn prompts(&self, batch_id: i64) -> Result<Vec<BatchPrompt>, StoreError> {
        let rows: Vec<(i64, i64, String)> = sqlx::query_as(
            "SELECT id, batch_id, prompt FROM prompts WHERE batch_id = ? ORDER BY id",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, batch_id, prompt)| BatchPrompt {
                id,
                batch_id,
                prompt,
            })
            .collect())
    }

    async fn responses(&self, batch_id: i64) -> Result<Vec<BatchPromptResponse>, StoreError> {
        let rows: Vec<ResponseRow> = sqlx::query_as(
            "SELECT id, batch_id, site_id, prompt_id, answer, created_at FROM responses \
             WHERE batch_id = ? ORDER BY id",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(response_from_row).collect()
    }
}
