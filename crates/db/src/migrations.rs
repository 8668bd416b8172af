use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::connect_with_settings;

    const MANAGED_TABLES: &[&str] = &[
        "crm_connection",
        "crm_field_mapping",
        "sync_run",
        "batch_progress",
        "crm_record",
        "crm_conflict",
        "user_session",
    ];

    #[tokio::test]
    async fn migrations_create_the_sync_schema() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");
        run_pending(&pool).await.expect("migrations should apply");

        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&pool)
            .await
            .expect("schema query should succeed");
        let names: Vec<String> =
            rows.iter().filter_map(|row| row.try_get::<String, _>("name").ok()).collect();

        for table in MANAGED_TABLES {
            assert!(names.iter().any(|name| name == table), "missing table {table}");
        }

        pool.close().await;
    }
}
