use std::str::FromStr;
use std::time::Duration;

use haggle_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// Opens the store, creating the database file on first use. Every
/// connection enforces foreign keys and waits on the write lock instead of
/// failing immediately when another writer holds it. An in-memory database
/// lives and dies with its connection, so it gets exactly one that is never
/// recycled.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)));
    if database_url.contains(":memory:") {
        pool_options =
            pool_options.max_connections(1).min_connections(1).idle_timeout(None).max_lifetime(None);
    }

    pool_options.connect_with(options).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::connect_with_settings;

    #[tokio::test]
    async fn connections_enforce_foreign_keys() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");

        let enabled = sqlx::query("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("read pragma")
            .get::<i64, _>(0);
        assert_eq!(enabled, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn in_memory_pools_keep_a_single_connection() {
        let pool = connect_with_settings("sqlite::memory:", 5, 30).await.expect("connect");

        sqlx::query("CREATE TABLE probe (id INTEGER)").execute(&pool).await.expect("create");
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM probe")
            .fetch_one(&pool)
            .await
            .expect("table visible on the pooled connection");
        assert_eq!(count, 0);
        assert_eq!(pool.options().get_max_connections(), 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn file_database_is_created_on_first_connect() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("haggle.db");
        let url = format!("sqlite://{}", path.display());

        let pool = connect_with_settings(&url, 1, 30).await.expect("connect");
        assert!(path.exists());

        pool.close().await;
    }
}
