use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use freightdesk_core::SyncEntityType;

use super::conflict::NewConflict;
use super::RepositoryError;
use crate::DbPool;

/// A local record as the reconciler sees it: the mapped field set plus the
/// internal and external keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: String,
    pub external_id: String,
    pub display_name: String,
    pub fields: BTreeMap<String, String>,
}

/// One record write in a page batch.
#[derive(Clone, Debug)]
pub struct RecordWrite {
    pub external_id: String,
    pub display_name: String,
    pub fields: BTreeMap<String, String>,
}

pub struct RecordRepository {
    pool: DbPool,
}

impl RecordRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Loads the existing rows for one page's external ids in a single query.
    pub async fn load_by_external_ids(
        &self,
        user_id: &str,
        entity: SyncEntityType,
        external_ids: &[String],
    ) -> Result<HashMap<String, StoredRecord>, RepositoryError> {
        if external_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; external_ids.len()].join(", ");
        let statement = format!(
            "SELECT id, external_id, display_name, fields_json
             FROM crm_record
             WHERE user_id = ? AND entity_type = ? AND external_id IN ({placeholders})"
        );

        let mut query = sqlx::query(&statement).bind(user_id).bind(entity.as_str());
        for external_id in external_ids {
            query = query.bind(external_id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut records = HashMap::with_capacity(rows.len());
        for row in rows {
            let record = decode_record(&row)?;
            records.insert(record.external_id.clone(), record);
        }
        Ok(records)
    }

    /// Writes one reconciled page in a single transaction: record upserts
    /// keyed on external_id plus the page's new conflicts. Either the whole
    /// page lands or none of it does.
    pub async fn apply_page(
        &self,
        user_id: &str,
        entity: SyncEntityType,
        writes: &[RecordWrite],
        conflicts: &[NewConflict],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        for write in writes {
            let fields_json = serde_json::to_string(&write.fields)
                .map_err(|error| RepositoryError::Decode(error.to_string()))?;
            sqlx::query(
                "INSERT INTO crm_record
                    (id, user_id, entity_type, external_id, display_name, fields_json, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(user_id, entity_type, external_id) DO UPDATE SET
                    display_name = excluded.display_name,
                    fields_json = excluded.fields_json,
                    updated_at = excluded.updated_at",
            )
            .bind(format!("REC-{}", Uuid::new_v4().simple()))
            .bind(user_id)
            .bind(entity.as_str())
            .bind(&write.external_id)
            .bind(&write.display_name)
            .bind(fields_json)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        for conflict in conflicts {
            sqlx::query(
                "INSERT INTO crm_conflict
                    (id, user_id, record_type, record_id, field, local_value, external_value, resolution, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?)
                 ON CONFLICT(record_type, record_id, field) WHERE resolution = 'pending'
                 DO NOTHING",
            )
            .bind(format!("CFL-{}", Uuid::new_v4().simple()))
            .bind(user_id)
            .bind(conflict.record_type.as_str())
            .bind(&conflict.record_id)
            .bind(conflict.field.as_str())
            .bind(&conflict.local_value)
            .bind(&conflict.external_value)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Overwrites a single field value, used when a conflict is resolved in
    /// favor of the external side.
    pub async fn apply_field(
        &self,
        record_type: SyncEntityType,
        record_id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT display_name, fields_json FROM crm_record WHERE id = ? AND entity_type = ?",
        )
        .bind(record_id)
        .bind(record_type.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(());
        };

        let mut record = decode_fields(&row.try_get::<String, _>("fields_json")?)?;
        record.insert(field.to_string(), value.to_string());
        let display_name = if field == "name" {
            value.to_string()
        } else {
            row.try_get::<String, _>("display_name")?
        };

        sqlx::query(
            "UPDATE crm_record SET fields_json = ?, display_name = ?, updated_at = ? WHERE id = ?",
        )
        .bind(
            serde_json::to_string(&record)
                .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        )
        .bind(display_name)
        .bind(Utc::now().to_rfc3339())
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn find_by_external_id(
        &self,
        user_id: &str,
        entity: SyncEntityType,
        external_id: &str,
    ) -> Result<Option<StoredRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, external_id, display_name, fields_json
             FROM crm_record
             WHERE user_id = ? AND entity_type = ? AND external_id = ?",
        )
        .bind(user_id)
        .bind(entity.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_record(&row)).transpose()
    }

    pub async fn count(
        &self,
        user_id: &str,
        entity: SyncEntityType,
    ) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM crm_record WHERE user_id = ? AND entity_type = ?",
        )
        .bind(user_id)
        .bind(entity.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

fn decode_record(row: &sqlx::sqlite::SqliteRow) -> Result<StoredRecord, RepositoryError> {
    Ok(StoredRecord {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        display_name: row.try_get("display_name")?,
        fields: decode_fields(&row.try_get::<String, _>("fields_json")?)?,
    })
}

fn decode_fields(raw: &str) -> Result<BTreeMap<String, String>, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid fields_json: {error}")))
}
