use chrono::Utc;
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

use freightdesk_core::{
    default_mappings, ExternalField, FieldMapping, LocalField, MappingDirection, SyncEntityType,
};

use super::RepositoryError;
use crate::DbPool;

pub struct FieldMappingRepository {
    pool: DbPool,
}

impl FieldMappingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Seeds the default mapping set for an entity type the first time a user
    /// syncs it. Existing rows, including user edits, are left untouched.
    pub async fn ensure_defaults(
        &self,
        user_id: &str,
        entity: SyncEntityType,
    ) -> Result<(), RepositoryError> {
        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM crm_field_mapping WHERE user_id = ? AND entity_type = ?",
        )
        .bind(user_id)
        .bind(entity.as_str())
        .fetch_one(&self.pool)
        .await?;
        if existing > 0 {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        for (external_field, local_field) in default_mappings(entity) {
            sqlx::query(
                "INSERT INTO crm_field_mapping
                    (id, user_id, entity_type, local_field, external_field, direction, enabled, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, 1, ?)",
            )
            .bind(format!("FM-{}", Uuid::new_v4().simple()))
            .bind(user_id)
            .bind(entity.as_str())
            .bind(local_field.as_str())
            .bind(external_field.key())
            .bind(MappingDirection::FromExternal.as_str())
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Enabled mappings for one entity type, parsed into the dispatch enums.
    /// Rows whose fields fall outside the entity's supported set are skipped.
    pub async fn list_enabled(
        &self,
        user_id: &str,
        entity: SyncEntityType,
    ) -> Result<Vec<FieldMapping>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, local_field, external_field, direction, enabled
             FROM crm_field_mapping
             WHERE user_id = ? AND entity_type = ? AND enabled = 1
             ORDER BY local_field",
        )
        .bind(user_id)
        .bind(entity.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut mappings = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(mapping) = decode_mapping(entity, &row) {
                mappings.push(mapping);
            }
        }
        Ok(mappings)
    }

    /// All mappings for a user across entity types, for the configuration API.
    pub async fn list(&self, user_id: &str) -> Result<Vec<FieldMapping>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, entity_type, local_field, external_field, direction, enabled
             FROM crm_field_mapping
             WHERE user_id = ?
             ORDER BY entity_type, local_field",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut mappings = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_entity: String = row.try_get("entity_type")?;
            let Some(entity) = SyncEntityType::parse(&raw_entity) else {
                warn!(entity = %raw_entity, "skipping field mapping with unknown entity type");
                continue;
            };
            if let Some(mapping) = decode_mapping(entity, &row) {
                mappings.push(mapping);
            }
        }
        Ok(mappings)
    }

    /// Creates or updates the mapping for one local field of an entity type.
    pub async fn upsert(
        &self,
        user_id: &str,
        entity: SyncEntityType,
        local_field: LocalField,
        external_field: ExternalField,
        direction: MappingDirection,
        enabled: bool,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let updated = sqlx::query(
            "UPDATE crm_field_mapping
             SET external_field = ?, direction = ?, enabled = ?, updated_at = ?
             WHERE user_id = ? AND entity_type = ? AND local_field = ?",
        )
        .bind(external_field.key())
        .bind(direction.as_str())
        .bind(if enabled { 1 } else { 0 })
        .bind(&now)
        .bind(user_id)
        .bind(entity.as_str())
        .bind(local_field.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO crm_field_mapping
                    (id, user_id, entity_type, local_field, external_field, direction, enabled, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(format!("FM-{}", Uuid::new_v4().simple()))
            .bind(user_id)
            .bind(entity.as_str())
            .bind(local_field.as_str())
            .bind(external_field.key())
            .bind(direction.as_str())
            .bind(if enabled { 1 } else { 0 })
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

fn decode_mapping(entity: SyncEntityType, row: &sqlx::sqlite::SqliteRow) -> Option<FieldMapping> {
    let id: String = row.try_get("id").ok()?;
    let raw_local: String = row.try_get("local_field").ok()?;
    let raw_external: String = row.try_get("external_field").ok()?;
    let raw_direction: String = row.try_get("direction").ok()?;

    let Some(local_field) = LocalField::parse(entity, &raw_local) else {
        warn!(id, entity = %entity, field = %raw_local, "skipping mapping with unsupported local field");
        return None;
    };
    let Some(external_field) = ExternalField::parse(entity, &raw_external) else {
        warn!(id, entity = %entity, field = %raw_external, "skipping mapping with unsupported external field");
        return None;
    };
    let Some(direction) = MappingDirection::parse(&raw_direction) else {
        warn!(id, entity = %entity, direction = %raw_direction, "skipping mapping with unknown direction");
        return None;
    };

    Some(FieldMapping {
        id,
        entity_type: entity,
        local_field,
        external_field,
        direction,
        enabled: row.try_get::<i64, _>("enabled").unwrap_or(0) != 0,
    })
}
