//! Run history for Crosspost
//!
//! Every run is stored with one row per destination. The row keeps the
//! serialized queue item, so a later retry can rebuild exactly the items that
//! did not succeed.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::queue::{EntryStatus, LogEntry, RunnerState};
use crate::types::QueueItemData;

/// A stored run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub finished_at: Option<i64>,
    pub state: RunnerState,
    /// The run this one retried, if any
    pub retry_of: Option<String>,
}

/// A stored destination of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunItemRecord {
    pub run_id: String,
    pub index: usize,
    pub subreddit: String,
    pub status: EntryStatus,
    pub url: Option<String>,
    pub error: Option<String>,
    pub item: QueueItemData,
}

/// A run with its per-status counts, for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run: RunRecord,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the file on first use
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Insert a new run
    pub async fn create_run(&self, run: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (id, title, created_at, finished_at, state, retry_of)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.title)
        .bind(run.created_at)
        .bind(run.finished_at)
        .bind(run.state.as_str())
        .bind(&run.retry_of)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Store the items of a run together with their logged outcome
    ///
    /// `log` is matched to `items` by index; items without a log entry are
    /// stored as queued. Existing rows for the same index are replaced.
    pub async fn record_items(
        &self,
        run_id: &str,
        items: &[QueueItemData],
        log: &[LogEntry],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        for (index, item) in items.iter().enumerate() {
            let entry = log.iter().find(|e| e.index == index);
            let payload = serde_json::to_string(item).map_err(DbError::PayloadError)?;

            sqlx::query(
                r#"
                INSERT OR REPLACE INTO run_items
                    (run_id, idx, subreddit, kind, status, url, error, payload)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(index as i64)
            .bind(&item.subreddit)
            .bind(item.kind.as_str())
            .bind(entry.map_or(EntryStatus::Queued, |e| e.status).as_str())
            .bind(entry.and_then(|e| e.url.as_deref()))
            .bind(entry.and_then(|e| e.error.as_deref()))
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    /// Mark a run as finished with its final state
    pub async fn finish_run(&self, run_id: &str, state: RunnerState) -> Result<()> {
        sqlx::query("UPDATE runs SET state = ?, finished_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(chrono::Utc::now().timestamp())
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get a run by ID
    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, created_at, finished_at, state, retry_of
            FROM runs WHERE id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| run_from_row(&r)))
    }

    /// Most recent runs first, with item counts
    ///
    /// `since` keeps only runs created at or after that Unix timestamp.
    pub async fn list_runs(&self, since: Option<i64>, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.title, r.created_at, r.finished_at, r.state, r.retry_of,
                   COUNT(i.idx) AS total,
                   COALESCE(SUM(CASE WHEN i.status = 'success' THEN 1 ELSE 0 END), 0) AS succeeded,
                   COALESCE(SUM(CASE WHEN i.status = 'error' THEN 1 ELSE 0 END), 0) AS failed
            FROM runs r
            LEFT JOIN run_items i ON i.run_id = r.id
            WHERE r.created_at >= ?
            GROUP BY r.id
            ORDER BY r.created_at DESC, r.rowid DESC
            LIMIT ?
            "#,
        )
        .bind(since.unwrap_or(i64::MIN))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| RunSummary {
                run: run_from_row(r),
                total: r.get::<i64, _>("total") as usize,
                succeeded: r.get::<i64, _>("succeeded") as usize,
                failed: r.get::<i64, _>("failed") as usize,
            })
            .collect())
    }

    /// Newest run started as a retry of `run_id`
    pub async fn latest_retry(&self, run_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT id FROM runs
            WHERE retry_of = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| r.get("id")))
    }

    /// Items of a run in queue order
    pub async fn get_run_items(&self, run_id: &str) -> Result<Vec<RunItemRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, idx, subreddit, status, url, error, payload
            FROM run_items
            WHERE run_id = ?
            ORDER BY idx ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| -> Result<RunItemRecord> {
                let payload: String = r.get("payload");
                let item: QueueItemData =
                    serde_json::from_str(&payload).map_err(DbError::PayloadError)?;
                Ok(RunItemRecord {
                    run_id: r.get("run_id"),
                    index: r.get::<i64, _>("idx") as usize,
                    subreddit: r.get("subreddit"),
                    status: EntryStatus::parse(&r.get::<String, _>("status"))
                        .unwrap_or(EntryStatus::Queued),
                    url: r.get("url"),
                    error: r.get("error"),
                    item,
                })
            })
            .collect()
    }

    /// Queue items of a run that did not succeed, in queue order
    pub async fn retry_items(&self, run_id: &str) -> Result<Vec<QueueItemData>> {
        Ok(self
            .get_run_items(run_id)
            .await?
            .into_iter()
            .filter(|r| r.status != EntryStatus::Success)
            .map(|r| r.item)
            .collect())
    }
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> RunRecord {
    RunRecord {
        id: row.get("id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        finished_at: row.get("finished_at"),
        state: RunnerState::parse(&row.get::<String, _>("state")).unwrap_or(RunnerState::Running),
        retry_of: row.get("retry_of"),
    }
}
