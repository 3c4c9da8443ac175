//! Durable per-document ingestion state, backed by SQLite.
//!
//! One database file per document type. A document's row is claimed with a
//! single compare-and-swap UPDATE, so concurrent workers racing on the same
//! id see exactly one winner, and a crash leaves rows in `processing` that
//! become reclaimable once they pass the stale threshold.

use std::path::Path;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("progress database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Lifecycle state of one document.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Full row for one document.
#[derive(Debug, Clone)]
pub struct ProgressRecord {
    pub document_id: String,
    pub status: ProgressStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Builder)]
pub struct ProgressStoreOptions {
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    #[builder(default = DEFAULT_STALE_AFTER)]
    pub stale_after: Duration,
}

impl Default for ProgressStoreOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressStore {
    pool: SqlitePool,
    options: ProgressStoreOptions,
}

impl ProgressStore {
    /// Open (creating if needed) the progress database at `path`.
    pub async fn open(
        path: impl AsRef<Path>,
        options: ProgressStoreOptions,
    ) -> Result<Self, ProgressError> {
        let connect = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(connect)
            .await?;
        let store = Self { pool, options };
        store.initialize().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self, ProgressError> {
        let connect = SqliteConnectOptions::new()
            .in_memory(true)
            .shared_cache(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect)
            .await?;
        let store = Self {
            pool,
            options: ProgressStoreOptions::default(),
        };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<(), ProgressError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS document_progress (
                document_id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INT NOT NULL DEFAULT 0,
                error TEXT,
                duration_ms INT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_progress_status ON document_progress(status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ingestion_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT NOT NULL DEFAULT (datetime('now')),
                ended_at TEXT,
                args TEXT,
                status TEXT NOT NULL DEFAULT 'running'
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Register a discovered document as pending. Existing rows keep their
    /// state.
    pub async fn register(&self, document_id: &str) -> Result<(), ProgressError> {
        sqlx::query(
            "INSERT INTO document_progress (document_id, status, attempts, updated_at)
             VALUES (?1, 'pending', 0, datetime('now'))
             ON CONFLICT(document_id) DO NOTHING",
        )
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically claim a document for processing.
    ///
    /// Eligible rows: absent (registered on the fly), `pending`, `failed`
    /// with retry budget remaining, and `processing` entries older than the
    /// stale threshold. Exactly one of any set of racing callers wins; the
    /// rest get `false`.
    pub async fn claim(&self, document_id: &str) -> Result<bool, ProgressError> {
        self.register(document_id).await?;
        let stale_modifier = format!("-{} seconds", self.options.stale_after.as_secs());
        let result = sqlx::query(
            "UPDATE document_progress
             SET status = 'processing', attempts = attempts + 1, updated_at = datetime('now')
             WHERE document_id = ?1 AND (
                 status = 'pending'
                 OR (status = 'failed' AND attempts < ?2)
                 OR (status = 'processing' AND updated_at <= datetime('now', ?3))
             )",
        )
        .bind(document_id)
        .bind(self.options.max_attempts)
        .bind(&stale_modifier)
        .execute(&self.pool)
        .await?;
        let claimed = result.rows_affected() == 1;
        debug!(document_id, claimed, "claim attempt");
        Ok(claimed)
    }

    pub async fn complete(
        &self,
        document_id: &str,
        duration: Duration,
    ) -> Result<(), ProgressError> {
        sqlx::query(
            "UPDATE document_progress
             SET status = 'completed', duration_ms = ?2, error = NULL, updated_at = datetime('now')
             WHERE document_id = ?1",
        )
        .bind(document_id)
        .bind(duration.as_millis() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail(&self, document_id: &str, error: &str) -> Result<(), ProgressError> {
        sqlx::query(
            "UPDATE document_progress
             SET status = 'failed', error = ?2, updated_at = datetime('now')
             WHERE document_id = ?1",
        )
        .bind(document_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Attach a warning to a row without changing its status, e.g. chunks
    /// stored with zero vectors that need re-embedding.
    pub async fn annotate(&self, document_id: &str, note: &str) -> Result<(), ProgressError> {
        sqlx::query(
            "UPDATE document_progress SET error = ?2, updated_at = datetime('now')
             WHERE document_id = ?1",
        )
        .bind(document_id)
        .bind(note)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn is_completed(&self, document_id: &str) -> Result<bool, ProgressError> {
        let row = sqlx::query(
            "SELECT 1 FROM document_progress WHERE document_id = ?1 AND status = 'completed'",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn get(&self, document_id: &str) -> Result<Option<ProgressRecord>, ProgressError> {
        let row = sqlx::query(
            "SELECT document_id, status, attempts, error, duration_ms, updated_at
             FROM document_progress WHERE document_id = ?1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| record_from_row(&row)))
    }

    pub async fn stats(&self) -> Result<ProgressStats, ProgressError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM document_progress GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut stats = ProgressStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            let count = count.max(0) as u64;
            match status.as_str() {
                "pending" => stats.pending = count,
                "processing" => stats.processing = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                other => debug!(status = other, "unrecognized status in progress table"),
            }
        }
        Ok(stats)
    }

    pub async fn ids_with_status(
        &self,
        status: ProgressStatus,
    ) -> Result<Vec<String>, ProgressError> {
        let rows = sqlx::query(
            "SELECT document_id FROM document_progress WHERE status = ?1 ORDER BY document_id",
        )
        .bind(status.as_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.get("document_id")).collect())
    }

    pub async fn start_run(&self, args: &str) -> Result<i64, ProgressError> {
        let result = sqlx::query("INSERT INTO ingestion_runs (args) VALUES (?1)")
            .bind(args)
            .execute(&self.pool)
            .await?;
        let run_id = result.last_insert_rowid();
        info!(run_id, "started ingestion run");
        Ok(run_id)
    }

    pub async fn end_run(&self, run_id: i64, status: &str) -> Result<(), ProgressError> {
        sqlx::query(
            "UPDATE ingestion_runs SET ended_at = datetime('now'), status = ?2 WHERE id = ?1",
        )
        .bind(run_id)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> ProgressRecord {
    let status: String = row.get("status");
    ProgressRecord {
        document_id: row.get("document_id"),
        status: status.parse().unwrap_or(ProgressStatus::Failed),
        attempts: row.get::<i64, _>("attempts").max(0) as u32,
        error: row.get("error"),
        duration_ms: row.get("duration_ms"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn file_store(options: ProgressStoreOptions) -> (TempDir, ProgressStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = ProgressStore::open(dir.path().join("progress.db"), options)
            .await
            .expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn claim_transitions_pending_to_processing() {
        let (_dir, store) = file_store(ProgressStoreOptions::default()).await;
        assert!(store.claim("doc-1").await.expect("claim"));
        let record = store.get("doc-1").await.expect("get").expect("row");
        assert_eq!(record.status, ProgressStatus::Processing);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn processing_rows_are_not_reclaimable_before_staleness() {
        let (_dir, store) = file_store(ProgressStoreOptions::default()).await;
        assert!(store.claim("doc-1").await.expect("claim"));
        assert!(!store.claim("doc-1").await.expect("second claim"));
    }

    #[tokio::test]
    async fn stale_processing_rows_are_reclaimed() {
        let options = ProgressStoreOptions::builder()
            .stale_after(Duration::ZERO)
            .build();
        let (_dir, store) = file_store(options).await;
        assert!(store.claim("doc-1").await.expect("claim"));
        assert!(store.claim("doc-1").await.expect("stale reclaim"));
    }

    #[tokio::test]
    async fn failed_rows_respect_the_retry_budget() {
        let options = ProgressStoreOptions::builder().max_attempts(2).build();
        let (_dir, store) = file_store(options).await;

        assert!(store.claim("doc-1").await.expect("claim"));
        store.fail("doc-1", "fetch exploded").await.expect("fail");
        assert!(store.claim("doc-1").await.expect("retry claim"));
        store.fail("doc-1", "fetch exploded again").await.expect("fail");
        assert!(!store.claim("doc-1").await.expect("budget exhausted"));
    }

    #[tokio::test]
    async fn completed_rows_are_never_reclaimed() {
        let (_dir, store) = file_store(ProgressStoreOptions::default()).await;
        assert!(store.claim("doc-1").await.expect("claim"));
        store
            .complete("doc-1", Duration::from_millis(1500))
            .await
            .expect("complete");
        assert!(!store.claim("doc-1").await.expect("claim completed"));
        assert!(store.is_completed("doc-1").await.expect("is_completed"));
        let record = store.get("doc-1").await.expect("get").expect("row");
        assert_eq!(record.duration_ms, Some(1500));
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_have_exactly_one_winner() {
        let (_dir, store) = file_store(ProgressStoreOptions::default()).await;
        store.register("doc-race").await.expect("register");

        let mut join_set = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let store = store.clone();
            join_set.spawn(async move { store.claim("doc-race").await.expect("claim") });
        }
        let mut winners = 0;
        while let Some(result) = join_set.join_next().await {
            if result.expect("task") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn stats_and_iteration_track_statuses() {
        let (_dir, store) = file_store(ProgressStoreOptions::default()).await;
        store.register("doc-a").await.expect("register");
        store.register("doc-b").await.expect("register");
        assert!(store.claim("doc-b").await.expect("claim"));
        store.fail("doc-b", "boom").await.expect("fail");
        assert!(store.claim("doc-c").await.expect("claim"));
        store
            .complete("doc-c", Duration::from_millis(10))
            .await
            .expect("complete");

        let stats = store.stats().await.expect("stats");
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.processing, 0);

        assert_eq!(
            store
                .ids_with_status(ProgressStatus::Failed)
                .await
                .expect("iterate"),
            vec!["doc-b".to_string()]
        );
    }

    #[tokio::test]
    async fn runs_are_recorded() {
        let (_dir, store) = file_store(ProgressStoreOptions::default()).await;
        let run_id = store.start_run("{\"batch_size\":50}").await.expect("start");
        store.end_run(run_id, "completed").await.expect("end");
    }
}
