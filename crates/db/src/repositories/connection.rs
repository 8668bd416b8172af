use chrono::{DateTime, Utc};
use sqlx::Row;

use freightdesk_core::Connection;

use super::RepositoryError;
use crate::DbPool;

/// Access to the per-user OAuth connection row. Token fields are written
/// only through `save_tokens`/`deactivate`; the consent flow that creates the
/// row lives outside this system.
pub struct ConnectionRepository {
    pool: DbPool,
}

impl ConnectionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_active(&self, user_id: &str) -> Result<Option<Connection>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, user_id, access_token, refresh_token, token_expires_at, active
             FROM crm_connection
             WHERE user_id = ? AND active = 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_raw: String = row.try_get("token_expires_at")?;
        let token_expires_at = parse_timestamp(&expires_raw)?;

        Ok(Some(Connection {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            access_token: row.try_get("access_token")?,
            refresh_token: row.try_get("refresh_token")?,
            token_expires_at,
            active: row.try_get::<i64, _>("active")? != 0,
        }))
    }

    /// Persists a rotated token pair after a successful refresh grant.
    pub async fn save_tokens(
        &self,
        connection_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE crm_connection
             SET access_token = ?, refresh_token = ?, token_expires_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(connection_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks the connection unusable after a rejected refresh grant; the user
    /// must re-authorize before the next run.
    pub async fn deactivate(&self, connection_id: &str) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE crm_connection SET active = 0, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(connection_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {error}")))
}
