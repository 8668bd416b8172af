use chrono::Utc;
use sqlx::Row;

use freightdesk_core::{ConflictResolution, LocalField, SyncEntityType};

use super::RepositoryError;
use crate::DbPool;

/// A stored conflict, pending or resolved.
#[derive(Clone, Debug)]
pub struct ConflictRow {
    pub id: String,
    pub record_type: SyncEntityType,
    pub record_id: String,
    pub field: String,
    pub local_value: String,
    pub external_value: String,
    pub resolution: ConflictResolution,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

/// A divergence detected during reconciliation, not yet persisted.
/// Insertion happens inside `RecordRepository::apply_page` so the conflict
/// lands in the same transaction as the page's record writes.
#[derive(Clone, Debug)]
pub struct NewConflict {
    pub record_type: SyncEntityType,
    pub record_id: String,
    pub field: LocalField,
    pub local_value: String,
    pub external_value: String,
}

pub struct ConflictRepository {
    pool: DbPool,
}

impl ConflictRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list_pending(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ConflictRow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, record_type, record_id, field, local_value, external_value,
                    resolution, created_at, resolved_at
             FROM crm_conflict
             WHERE user_id = ? AND resolution = 'pending'
             ORDER BY created_at, id
             LIMIT ?",
        )
        .bind(user_id)
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_conflict).collect()
    }

    pub async fn find(
        &self,
        user_id: &str,
        conflict_id: &str,
    ) -> Result<Option<ConflictRow>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, record_type, record_id, field, local_value, external_value,
                    resolution, created_at, resolved_at
             FROM crm_conflict
             WHERE id = ? AND user_id = ?",
        )
        .bind(conflict_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_conflict(&row)).transpose()
    }

    /// Moves a pending conflict to a terminal resolution. Returns the updated
    /// row, or `None` when the conflict does not exist, belongs to another
    /// user, or was already resolved; a resolution decision is never
    /// overwritten.
    pub async fn resolve(
        &self,
        user_id: &str,
        conflict_id: &str,
        resolution: ConflictResolution,
    ) -> Result<Option<ConflictRow>, RepositoryError> {
        let updated = sqlx::query(
            "UPDATE crm_conflict
             SET resolution = ?, resolved_at = ?
             WHERE id = ? AND user_id = ? AND resolution = 'pending'",
        )
        .bind(resolution.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(conflict_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.find(user_id, conflict_id).await
    }

    pub async fn count_pending_for(
        &self,
        record_type: SyncEntityType,
        record_id: &str,
    ) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM crm_conflict
             WHERE record_type = ? AND record_id = ? AND resolution = 'pending'",
        )
        .bind(record_type.as_str())
        .bind(record_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

fn decode_conflict(row: &sqlx::sqlite::SqliteRow) -> Result<ConflictRow, RepositoryError> {
    let raw_type: String = row.try_get("record_type")?;
    let record_type = SyncEntityType::parse(&raw_type)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown record type `{raw_type}`")))?;
    let raw_resolution: String = row.try_get("resolution")?;
    let resolution = ConflictResolution::parse(&raw_resolution)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown resolution `{raw_resolution}`")))?;

    Ok(ConflictRow {
        id: row.try_get("id")?,
        record_type,
        record_id: row.try_get("record_id")?,
        field: row.try_get("field")?,
        local_value: row.try_get("local_value")?,
        external_value: row.try_get("external_value")?,
        resolution,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}
