use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use haggle_core::domain::buyer::BuyerId;
use haggle_core::domain::thread::{message_preview, SellerType, Thread, ThreadId, ThreadSummary};
use haggle_core::domain::RecordStatus;

use super::{
    active_only, format_optional_timestamp, format_timestamp, parse_enum,
    parse_optional_timestamp, parse_timestamp, parse_u32, RepositoryError, ThreadRepository,
    ARCHIVED,
};
use crate::DbPool;

pub(crate) const THREAD_COLUMNS: &str = "t.id, t.buyer_id, t.seller_name, t.seller_type, t.phone,
    t.status, t.message_count, t.last_message_at, t.last_read_at, t.archived_at, t.created_at,
    t.updated_at";

pub struct SqlThreadRepository {
    pool: DbPool,
}

impl SqlThreadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ThreadRepository for SqlThreadRepository {
    async fn create(&self, thread: Thread) -> Result<(), RepositoryError> {
        insert_thread(&self.pool, &thread)
            .await
            .map_err(|error| RepositoryError::from_write(error, "active thread for this phone"))?;
        Ok(())
    }

    async fn find_active(
        &self,
        buyer_id: &BuyerId,
        id: &ThreadId,
    ) -> Result<Option<Thread>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {THREAD_COLUMNS} FROM thread t
             WHERE t.id = ? AND t.buyer_id = ? AND {}",
            active_only("t")
        ))
        .bind(&id.0)
        .bind(&buyer_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(thread_from_row).transpose()
    }

    async fn find_active_by_phone(
        &self,
        buyer_id: &BuyerId,
        phone: &str,
    ) -> Result<Option<Thread>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {THREAD_COLUMNS} FROM thread t
             WHERE t.buyer_id = ? AND t.phone = ? AND {}",
            active_only("t")
        ))
        .bind(&buyer_id.0)
        .bind(phone.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.map(thread_from_row).transpose()
    }

    async fn list_summaries(
        &self,
        buyer_id: &BuyerId,
    ) -> Result<Vec<ThreadSummary>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {THREAD_COLUMNS},
                (SELECT COUNT(*) FROM message m
                  WHERE m.thread_id = t.id AND {active_message}
                    AND (t.last_read_at IS NULL OR m.timestamp > t.last_read_at)) AS unread_count,
                (SELECT m.content FROM message m
                  WHERE m.thread_id = t.id AND {active_message}
                  ORDER BY m.timestamp DESC, m.rowid DESC
                  LIMIT 1) AS last_content
             FROM thread t
             WHERE t.buyer_id = ? AND {active_thread}
             ORDER BY COALESCE(t.last_message_at, t.created_at) DESC, t.id ASC",
            active_message = active_only("m"),
            active_thread = active_only("t"),
        ))
        .bind(&buyer_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let unread_count = parse_u32("unread_count", row.try_get("unread_count")?)?;
                let last_content: Option<String> = row.try_get("last_content")?;
                Ok(ThreadSummary {
                    thread: thread_from_row(row)?,
                    unread_count,
                    last_message_preview: last_content.as_deref().map(message_preview),
                })
            })
            .collect()
    }

    async fn update_details(
        &self,
        thread: &Thread,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let updated = sqlx::query(&format!(
            "UPDATE thread SET seller_name = ?, seller_type = ?, phone = ?, updated_at = ?
             WHERE id = ? AND buyer_id = ? AND {}",
            active_only("thread")
        ))
        .bind(&thread.seller_name)
        .bind(thread.seller_type.as_str())
        .bind(thread.phone.as_deref())
        .bind(format_timestamp(now))
        .bind(&thread.id.0)
        .bind(&thread.buyer_id.0)
        .execute(&self.pool)
        .await
        .map_err(|error| RepositoryError::from_write(error, "active thread for this phone"))?
        .rows_affected();

        Ok(updated > 0)
    }

    async fn archive(
        &self,
        buyer_id: &BuyerId,
        id: &ThreadId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let now = format_timestamp(now);
        let updated = sqlx::query(&format!(
            "UPDATE thread SET status = '{ARCHIVED}', archived_at = ?, updated_at = ?
             WHERE id = ? AND buyer_id = ? AND {}",
            active_only("thread")
        ))
        .bind(&now)
        .bind(&now)
        .bind(&id.0)
        .bind(&buyer_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }

    async fn mark_read(
        &self,
        buyer_id: &BuyerId,
        id: &ThreadId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let updated = sqlx::query(&format!(
            "UPDATE thread SET last_read_at = ? WHERE id = ? AND buyer_id = ? AND {}",
            active_only("thread")
        ))
        .bind(format_timestamp(now))
        .bind(&id.0)
        .bind(&buyer_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }
}

pub(crate) async fn insert_thread<'e, E>(executor: E, thread: &Thread) -> Result<u64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    insert_thread_with(executor, thread, "").await
}

/// `ON CONFLICT DO NOTHING` variant; zero rows means a concurrent writer created the
/// active thread for the same phone first.
pub(crate) async fn insert_thread_if_absent<'e, E>(
    executor: E,
    thread: &Thread,
) -> Result<u64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    insert_thread_with(executor, thread, " ON CONFLICT DO NOTHING").await
}

async fn insert_thread_with<'e, E>(
    executor: E,
    thread: &Thread,
    conflict_clause: &str,
) -> Result<u64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(&format!(
        "INSERT INTO thread (
            id, buyer_id, seller_name, seller_type, phone, status, message_count,
            last_message_at, last_read_at, archived_at, created_at, updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?){conflict_clause}"
    ))
    .bind(&thread.id.0)
    .bind(&thread.buyer_id.0)
    .bind(&thread.seller_name)
    .bind(thread.seller_type.as_str())
    .bind(thread.phone.as_deref())
    .bind(thread.status.as_str())
    .bind(i64::from(thread.message_count))
    .bind(format_optional_timestamp(thread.last_message_at))
    .bind(format_optional_timestamp(thread.last_read_at))
    .bind(format_optional_timestamp(thread.archived_at))
    .bind(format_timestamp(thread.created_at))
    .bind(format_timestamp(thread.updated_at))
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

pub(crate) fn thread_from_row(row: SqliteRow) -> Result<Thread, RepositoryError> {
    let seller_type: String = row.try_get("seller_type")?;
    let status: String = row.try_get("status")?;

    Ok(Thread {
        id: ThreadId(row.try_get("id")?),
        buyer_id: BuyerId(row.try_get("buyer_id")?),
        seller_name: row.try_get("seller_name")?,
        seller_type: parse_enum("seller_type", &seller_type, SellerType::parse)?,
        phone: row.try_get("phone")?,
        status: parse_enum("status", &status, RecordStatus::parse)?,
        message_count: parse_u32("message_count", row.try_get("message_count")?)?,
        last_message_at: parse_optional_timestamp("last_message_at", row.try_get("last_message_at")?)?,
        last_read_at: parse_optional_timestamp("last_read_at", row.try_get("last_read_at")?)?,
        archived_at: parse_optional_timestamp("archived_at", row.try_get("archived_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
