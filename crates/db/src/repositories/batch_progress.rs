use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use freightdesk_core::{BatchStatus, SyncEntityType};

use super::RepositoryError;
use crate::DbPool;

/// The resumable cursor for one (user, entity type) import.
/// `last_imported_page` always covers a contiguous prefix of pages, which is
/// what makes resumption at `last_imported_page + 1` safe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchProgress {
    pub entity_type: SyncEntityType,
    pub total_estimated: i64,
    pub total_imported: i64,
    pub last_imported_page: i64,
    pub status: BatchStatus,
    pub error_details: Option<String>,
}

pub struct BatchProgressRepository {
    pool: DbPool,
}

impl BatchProgressRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(
        &self,
        user_id: &str,
        entity: SyncEntityType,
    ) -> Result<Option<BatchProgress>, RepositoryError> {
        let row = sqlx::query(
            "SELECT entity_type, total_estimated, total_imported, last_imported_page, status, error_details
             FROM batch_progress
             WHERE user_id = ? AND entity_type = ?",
        )
        .bind(user_id)
        .bind(entity.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_progress(&row)).transpose()
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<BatchProgress>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT entity_type, total_estimated, total_imported, last_imported_page, status, error_details
             FROM batch_progress
             WHERE user_id = ?
             ORDER BY entity_type",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_progress).collect()
    }

    /// Marks an entity loop as running, creating the cursor row on first use.
    pub async fn mark_active(
        &self,
        user_id: &str,
        entity: SyncEntityType,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO batch_progress (id, user_id, entity_type, status, updated_at)
             VALUES (?, ?, ?, 'active', ?)
             ON CONFLICT(user_id, entity_type) DO UPDATE SET
                status = 'active',
                error_details = NULL,
                updated_at = excluded.updated_at",
        )
        .bind(format!("BP-{}", Uuid::new_v4().simple()))
        .bind(user_id)
        .bind(entity.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Advances the cursor after one fully processed page. Written after
    /// every page so progress survives a process crash mid-run.
    pub async fn record_page(
        &self,
        user_id: &str,
        entity: SyncEntityType,
        page: i64,
        imported_delta: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE batch_progress
             SET last_imported_page = ?,
                 total_imported = total_imported + ?,
                 total_estimated = MAX(total_estimated, total_imported + ?),
                 updated_at = ?
             WHERE user_id = ? AND entity_type = ?",
        )
        .bind(page)
        .bind(imported_delta)
        .bind(imported_delta)
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .bind(entity.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records how the entity loop ended. A completed loop pins the estimate
    /// to the imported total; an interrupted one keeps it open.
    pub async fn finish(
        &self,
        user_id: &str,
        entity: SyncEntityType,
        status: BatchStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE batch_progress
             SET status = ?,
                 error_details = ?,
                 total_estimated = CASE WHEN ? = 'completed' THEN total_imported ELSE total_estimated END,
                 updated_at = ?
             WHERE user_id = ? AND entity_type = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .bind(entity.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rewinds the cursor for a full import.
    pub async fn reset(
        &self,
        user_id: &str,
        entity: SyncEntityType,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO batch_progress (id, user_id, entity_type, status, updated_at)
             VALUES (?, ?, ?, 'pending', ?)
             ON CONFLICT(user_id, entity_type) DO UPDATE SET
                total_estimated = 0,
                total_imported = 0,
                last_imported_page = 0,
                status = 'pending',
                error_details = NULL,
                updated_at = excluded.updated_at",
        )
        .bind(format!("BP-{}", Uuid::new_v4().simple()))
        .bind(user_id)
        .bind(entity.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn decode_progress(row: &sqlx::sqlite::SqliteRow) -> Result<BatchProgress, RepositoryError> {
    let raw_entity: String = row.try_get("entity_type")?;
    let entity_type = SyncEntityType::parse(&raw_entity)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown entity type `{raw_entity}`")))?;
    let raw_status: String = row.try_get("status")?;
    let status = BatchStatus::parse(&raw_status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown batch status `{raw_status}`")))?;

    Ok(BatchProgress {
        entity_type,
        total_estimated: row.try_get("total_estimated")?,
        total_imported: row.try_get("total_imported")?,
        last_imported_page: row.try_get("last_imported_page")?,
        status,
        error_details: row.try_get("error_details")?,
    })
}
