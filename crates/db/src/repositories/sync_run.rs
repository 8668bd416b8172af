use chrono::{Duration, Utc};
use sqlx::Row;
use uuid::Uuid;

use freightdesk_core::{RunCounters, SyncRunStatus};

use super::RepositoryError;
use crate::DbPool;

/// One row of the append-only sync history.
#[derive(Clone, Debug)]
pub struct SyncRunRow {
    pub id: String,
    pub user_id: String,
    pub sync_type: String,
    pub status: SyncRunStatus,
    pub records_processed: i64,
    pub records_success: i64,
    pub records_failed: i64,
    pub error_details: Vec<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

pub struct SyncRunRepository {
    pool: DbPool,
}

impl SyncRunRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Guard against double-invocation: a user has at most one run in flight.
    pub async fn has_running(&self, user_id: &str) -> Result<bool, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_run WHERE user_id = ? AND status = 'running'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Fails over `running` rows older than the cutoff. A row that old was
    /// left behind by a process that died mid-run and would otherwise lock
    /// the user out of new invocations forever.
    pub async fn fail_stale(
        &self,
        user_id: &str,
        cutoff: Duration,
    ) -> Result<u64, RepositoryError> {
        let error_details = serde_json::to_string(&["run interrupted before completion"])
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let result = sqlx::query(
            "UPDATE sync_run
             SET status = 'failed', error_details = ?, completed_at = ?
             WHERE user_id = ? AND status = 'running' AND started_at < ?",
        )
        .bind(error_details)
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .bind((Utc::now() - cutoff).to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn start(&self, user_id: &str, sync_type: &str) -> Result<String, RepositoryError> {
        let run_id = format!("SR-{}", Uuid::new_v4().simple());
        sqlx::query(
            "INSERT INTO sync_run (id, user_id, sync_type, status, started_at)
             VALUES (?, ?, ?, 'running', ?)",
        )
        .bind(&run_id)
        .bind(user_id)
        .bind(sync_type)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(run_id)
    }

    /// Writes the terminal state. Guarded on `status = 'running'` so a
    /// finalized run is never edited retroactively.
    pub async fn finalize(
        &self,
        run_id: &str,
        status: SyncRunStatus,
        counters: RunCounters,
        errors: &[String],
    ) -> Result<(), RepositoryError> {
        let error_details = if errors.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(errors)
                    .map_err(|error| RepositoryError::Decode(error.to_string()))?,
            )
        };

        sqlx::query(
            "UPDATE sync_run
             SET status = ?, records_processed = ?, records_success = ?, records_failed = ?,
                 error_details = ?, completed_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(counters.processed)
        .bind(counters.success)
        .bind(counters.failed)
        .bind(error_details)
        .bind(Utc::now().to_rfc3339())
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, run_id: &str) -> Result<Option<SyncRunRow>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, user_id, sync_type, status, records_processed, records_success,
                    records_failed, error_details, started_at, completed_at
             FROM sync_run WHERE id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_run(&row)).transpose()
    }

    pub async fn list_recent(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<SyncRunRow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, sync_type, status, records_processed, records_success,
                    records_failed, error_details, started_at, completed_at
             FROM sync_run
             WHERE user_id = ?
             ORDER BY started_at DESC
             LIMIT ?",
        )
        .bind(user_id)
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_run).collect()
    }
}

fn decode_run(row: &sqlx::sqlite::SqliteRow) -> Result<SyncRunRow, RepositoryError> {
    let raw_status: String = row.try_get("status")?;
    let status = SyncRunStatus::parse(&raw_status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown sync run status `{raw_status}`")))?;

    let error_details = match row.try_get::<Option<String>, _>("error_details")? {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|error| RepositoryError::Decode(format!("invalid error_details: {error}")))?,
        None => Vec::new(),
    };

    Ok(SyncRunRow {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        sync_type: row.try_get("sync_type")?,
        status,
        records_processed: row.try_get("records_processed")?,
        records_success: row.try_get("records_success")?,
        records_failed: row.try_get("records_failed")?,
        error_details,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}
