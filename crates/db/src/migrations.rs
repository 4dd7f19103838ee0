use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Embedded migrations not yet recorded as applied in `_sqlx_migrations`.
pub async fn pending_count(pool: &DbPool) -> Result<usize, sqlx::Error> {
    let tracked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    let applied: Vec<i64> = if tracked == 0 {
        Vec::new()
    } else {
        sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?
    };

    Ok(MIGRATOR
        .iter()
        .filter(|migration| !migration.migration_type.is_down_migration())
        .filter(|migration| !applied.contains(&migration.version))
        .count())
}

#[cfg(test)]
mod tests {
    use super::{pending_count, run_pending, MIGRATOR};
    use crate::{connect_with_settings, DbPool};

    const EXPECTED_OBJECTS: &[&str] = &[
        "buyer",
        "idx_message_buyer_inbox",
        "idx_message_external_id",
        "idx_message_thread_timestamp",
        "idx_provisioning_task_buyer_id",
        "idx_provisioning_task_state_available",
        "idx_provisioning_transition_task_id",
        "idx_thread_active_phone",
        "idx_thread_buyer_status",
        "idx_tracked_offer_buyer_tracked_at",
        "idx_tracked_offer_thread_id",
        "message",
        "provisioning_task",
        "provisioning_transition",
        "thread",
        "tracked_offer",
    ];

    async fn migrated_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        pool
    }

    /// Name and DDL of every schema object the migrations own, sorted by name.
    async fn schema(pool: &DbPool) -> Vec<(String, String)> {
        sqlx::query_as(
            "SELECT name, IFNULL(sql, '') FROM sqlite_master \
             WHERE type IN ('table', 'index') \
               AND name NOT LIKE 'sqlite_%' AND name <> '_sqlx_migrations' \
             ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .expect("read schema")
    }

    async fn insert_buyer(pool: &DbPool) {
        sqlx::query(
            "INSERT INTO buyer (id, email, inbox_email, created_at, updated_at) \
             VALUES ('B-1', 'b1@example.com', 'b1@inbox.haggle.test', '2026-03-01T09:00:00Z', '2026-03-01T09:00:00Z')",
        )
        .execute(pool)
        .await
        .expect("insert buyer");
    }

    async fn insert_message(pool: &DbPool, id: &str, external_id: Option<&str>) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO message (id, buyer_id, sender, channel, content, external_message_id, timestamp) \
             VALUES (?, 'B-1', 'seller', 'email', 'hello', ?, '2026-03-01T09:05:00Z')",
        )
        .bind(id)
        .bind(external_id)
        .execute(pool)
        .await
        .map(|_| ())
    }

    async fn insert_thread(pool: &DbPool, id: &str, status: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO thread (id, buyer_id, seller_name, seller_type, phone, status, created_at, updated_at) \
             VALUES (?, 'B-1', '+15551234567', 'other', '+15551234567', ?, '2026-03-01T09:00:00Z', '2026-03-01T09:00:00Z')",
        )
        .bind(id)
        .bind(status)
        .execute(pool)
        .await
        .map(|_| ())
    }

    #[tokio::test]
    async fn fresh_database_gets_every_table_and_index() {
        let pool = migrated_pool().await;

        let names: Vec<String> = schema(&pool).await.into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, EXPECTED_OBJECTS);

        pool.close().await;
    }

    #[tokio::test]
    async fn undo_then_redo_restores_the_same_schema() {
        let pool = migrated_pool().await;
        let before = schema(&pool).await;

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert!(schema(&pool).await.is_empty(), "down migrations left objects behind");

        run_pending(&pool).await.expect("redo migrations");
        assert_eq!(schema(&pool).await, before);

        pool.close().await;
    }

    #[tokio::test]
    async fn external_ids_are_unique_only_when_present() {
        let pool = migrated_pool().await;
        insert_buyer(&pool).await;

        insert_message(&pool, "M-1", Some("<abc@mail>")).await.expect("first delivery");
        let duplicate = insert_message(&pool, "M-2", Some("<abc@mail>")).await;
        assert!(matches!(duplicate, Err(sqlx::Error::Database(ref db)) if db.is_unique_violation()));

        insert_message(&pool, "M-3", None).await.expect("no id");
        insert_message(&pool, "M-4", None).await.expect("second message without id");
        insert_message(&pool, "M-5", Some("")).await.expect("blank id");
        insert_message(&pool, "M-6", Some("")).await.expect("second blank id");

        pool.close().await;
    }

    #[tokio::test]
    async fn archived_threads_free_their_phone_binding() {
        let pool = migrated_pool().await;
        insert_buyer(&pool).await;

        insert_thread(&pool, "T-1", "active").await.expect("first active thread");
        let second = insert_thread(&pool, "T-2", "active").await;
        assert!(matches!(second, Err(sqlx::Error::Database(ref db)) if db.is_unique_violation()));

        sqlx::query("UPDATE thread SET status = 'archived' WHERE id = 'T-1'")
            .execute(&pool)
            .await
            .expect("archive");
        insert_thread(&pool, "T-3", "active").await.expect("phone reusable after archive");

        pool.close().await;
    }

    #[tokio::test]
    async fn pending_count_drops_to_zero_after_running() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        assert!(pending_count(&pool).await.expect("count before") > 0);

        run_pending(&pool).await.expect("run migrations");
        assert_eq!(pending_count(&pool).await.expect("count after"), 0);

        pool.close().await;
    }
}
