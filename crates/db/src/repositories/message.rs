use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use haggle_core::domain::buyer::BuyerId;
use haggle_core::domain::message::{
    Channel, ExternalMessageId, Message, MessageId, MessagePage, PageRequest, Sender,
};
use haggle_core::domain::thread::{Thread, ThreadId};
use haggle_core::domain::RecordStatus;

use super::thread::{insert_thread_if_absent, thread_from_row, THREAD_COLUMNS};
use super::{
    active_only, format_timestamp, parse_enum, parse_timestamp, Admission, AssignOutcome,
    MessageRepository, RepositoryError, ThreadBinding, ARCHIVED,
};
use crate::DbPool;

const MESSAGE_COLUMNS: &str = "m.id, m.buyer_id, m.thread_id, m.sender, m.channel, m.content,
    m.subject, m.sender_email, m.sender_phone, m.external_message_id, m.status, m.timestamp";

/// Newest-first tie-breaker for messages sharing a timestamp.
const NEWEST_FIRST: &str = "m.timestamp DESC, m.rowid DESC";
const OLDEST_FIRST: &str = "m.timestamp ASC, m.rowid ASC";

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn write_tx(&self) -> Result<Transaction<'static, Sqlite>, RepositoryError> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn admit(
        &self,
        mut message: Message,
        binding: ThreadBinding,
    ) -> Result<Admission, RepositoryError> {
        let mut tx = self.write_tx().await?;

        if let Some(external_id) = &message.external_message_id {
            if let Some(existing) = find_by_external_id(&mut tx, external_id).await? {
                tx.rollback().await?;
                return Ok(Admission::Duplicate(existing));
            }
        }

        let mut thread_created = false;
        match &binding {
            ThreadBinding::Inbox => message.thread_id = None,
            ThreadBinding::ByPhone { phone, new_thread } => {
                let thread = match find_active_by_phone(&mut tx, &message.buyer_id, phone).await? {
                    Some(thread) => thread,
                    None => {
                        thread_created = insert_thread_if_absent(&mut *tx, new_thread).await? > 0;
                        find_active_by_phone(&mut tx, &message.buyer_id, phone).await?.ok_or_else(
                            || RepositoryError::Decode(format!("active thread for `{phone}` vanished")),
                        )?
                    }
                };
                message.thread_id = Some(thread.id);
            }
        }

        if insert_message(&mut tx, &message, " ON CONFLICT DO NOTHING").await? == 0 {
            // Lost the race on the external id index.
            let existing = match &message.external_message_id {
                Some(external_id) => find_by_external_id(&mut tx, external_id).await?,
                None => None,
            };
            tx.rollback().await?;
            return existing.map(Admission::Duplicate).ok_or_else(|| {
                RepositoryError::Conflict(format!("message `{}` already exists", message.id.0))
            });
        }

        if let Some(thread_id) = &message.thread_id {
            bump_thread_counters(&mut tx, thread_id, &message.buyer_id, message.timestamp).await?;
        }

        tx.commit().await?;
        Ok(Admission::Created { message, thread_created })
    }

    async fn append(&self, message: Message) -> Result<Option<Message>, RepositoryError> {
        let Some(thread_id) = message.thread_id.clone() else {
            return Ok(None);
        };

        let mut tx = self.write_tx().await?;
        if !bump_thread_counters(&mut tx, &thread_id, &message.buyer_id, message.timestamp).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        insert_message(&mut tx, &message, "")
            .await
            .map_err(|error| RepositoryError::from_write(error, "message"))?;
        tx.commit().await?;
        Ok(Some(message))
    }

    async fn find_active(
        &self,
        buyer_id: &BuyerId,
        id: &MessageId,
    ) -> Result<Option<Message>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message m WHERE m.id = ? AND m.buyer_id = ? AND {}",
            active_only("m")
        ))
        .bind(&id.0)
        .bind(&buyer_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(message_from_row).transpose()
    }

    async fn find_by_external_id(
        &self,
        external_id: &ExternalMessageId,
    ) -> Result<Option<Message>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message m WHERE m.external_message_id = ?"
        ))
        .bind(&external_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(message_from_row).transpose()
    }

    async fn page_for_thread(
        &self,
        thread_id: &ThreadId,
        page: PageRequest,
    ) -> Result<MessagePage, RepositoryError> {
        let filter = format!("m.thread_id = ? AND {}", active_only("m"));
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM message m WHERE {filter}"))
            .bind(&thread_id.0)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message m WHERE {filter}
             ORDER BY {OLDEST_FIRST} LIMIT ? OFFSET ?"
        ))
        .bind(&thread_id.0)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await?;

        to_page(rows, total, page)
    }

    async fn recent_for_thread(
        &self,
        thread_id: &ThreadId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message m
             WHERE m.thread_id = ? AND {}
             ORDER BY {NEWEST_FIRST} LIMIT ?",
            active_only("m")
        ))
        .bind(&thread_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn inbox(
        &self,
        buyer_id: &BuyerId,
        page: PageRequest,
    ) -> Result<MessagePage, RepositoryError> {
        let filter = format!("m.buyer_id = ? AND m.thread_id IS NULL AND {}", active_only("m"));
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM message m WHERE {filter}"))
            .bind(&buyer_id.0)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message m WHERE {filter}
             ORDER BY {NEWEST_FIRST} LIMIT ? OFFSET ?"
        ))
        .bind(&buyer_id.0)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await?;

        to_page(rows, total, page)
    }

    async fn assign(
        &self,
        buyer_id: &BuyerId,
        id: &MessageId,
        thread_id: &ThreadId,
        _now: DateTime<Utc>,
    ) -> Result<AssignOutcome, RepositoryError> {
        let mut tx = self.write_tx().await?;

        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message m
             WHERE m.id = ? AND m.buyer_id = ? AND m.thread_id IS NULL AND {}",
            active_only("m")
        ))
        .bind(&id.0)
        .bind(&buyer_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(mut message) = row.map(message_from_row).transpose()? else {
            tx.rollback().await?;
            return Ok(AssignOutcome::MessageNotFound);
        };

        if !bump_thread_counters(&mut tx, thread_id, buyer_id, message.timestamp).await? {
            tx.rollback().await?;
            return Ok(AssignOutcome::ThreadNotFound);
        }

        sqlx::query("UPDATE message SET thread_id = ? WHERE id = ?")
            .bind(&thread_id.0)
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        message.thread_id = Some(thread_id.clone());
        Ok(AssignOutcome::Assigned(message))
    }

    async fn archive_inbox_item(
        &self,
        buyer_id: &BuyerId,
        id: &MessageId,
    ) -> Result<bool, RepositoryError> {
        let updated = sqlx::query(&format!(
            "UPDATE message SET status = '{ARCHIVED}'
             WHERE id = ? AND buyer_id = ? AND thread_id IS NULL AND {}",
            active_only("message")
        ))
        .bind(&id.0)
        .bind(&buyer_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }
}

async fn find_by_external_id(
    tx: &mut Transaction<'static, Sqlite>,
    external_id: &ExternalMessageId,
) -> Result<Option<Message>, RepositoryError> {
    let row = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM message m WHERE m.external_message_id = ?"
    ))
    .bind(&external_id.0)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(message_from_row).transpose()
}

async fn find_active_by_phone(
    tx: &mut Transaction<'static, Sqlite>,
    buyer_id: &BuyerId,
    phone: &str,
) -> Result<Option<Thread>, RepositoryError> {
    let row = sqlx::query(&format!(
        "SELECT {THREAD_COLUMNS} FROM thread t WHERE t.buyer_id = ? AND t.phone = ? AND {}",
        active_only("t")
    ))
    .bind(&buyer_id.0)
    .bind(phone)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(thread_from_row).transpose()
}

async fn insert_message(
    tx: &mut Transaction<'static, Sqlite>,
    message: &Message,
    conflict_clause: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(&format!(
        "INSERT INTO message (
            id, buyer_id, thread_id, sender, channel, content, subject, sender_email,
            sender_phone, external_message_id, status, timestamp
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?){conflict_clause}"
    ))
    .bind(&message.id.0)
    .bind(&message.buyer_id.0)
    .bind(message.thread_id.as_ref().map(|id| id.0.as_str()))
    .bind(message.sender.as_str())
    .bind(message.channel.as_str())
    .bind(&message.content)
    .bind(message.subject.as_deref())
    .bind(message.sender_email.as_deref())
    .bind(message.sender_phone.as_deref())
    .bind(message.external_message_id.as_ref().map(|id| id.0.as_str()))
    .bind(message.status.as_str())
    .bind(format_timestamp(message.timestamp))
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

/// `false` when the thread is not an active thread of `buyer_id`.
async fn bump_thread_counters(
    tx: &mut Transaction<'static, Sqlite>,
    thread_id: &ThreadId,
    buyer_id: &BuyerId,
    timestamp: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let timestamp = format_timestamp(timestamp);
    let updated = sqlx::query(&format!(
        "UPDATE thread SET
            message_count = message_count + 1,
            last_message_at = CASE
                WHEN last_message_at IS NULL OR last_message_at < ? THEN ?
                ELSE last_message_at
            END,
            updated_at = ?
         WHERE id = ? AND buyer_id = ? AND {}",
        active_only("thread")
    ))
    .bind(&timestamp)
    .bind(&timestamp)
    .bind(&timestamp)
    .bind(&thread_id.0)
    .bind(&buyer_id.0)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    Ok(updated > 0)
}

fn to_page(rows: Vec<SqliteRow>, total: i64, page: PageRequest) -> Result<MessagePage, RepositoryError> {
    Ok(MessagePage {
        messages: rows.into_iter().map(message_from_row).collect::<Result<_, _>>()?,
        total: u64::try_from(total)
            .map_err(|_| RepositoryError::Decode(format!("negative message count: {total}")))?,
        limit: page.limit,
        offset: page.offset,
    })
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let sender: String = row.try_get("sender")?;
    let channel: String = row.try_get("channel")?;
    let status: String = row.try_get("status")?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        buyer_id: BuyerId(row.try_get("buyer_id")?),
        thread_id: row.try_get::<Option<String>, _>("thread_id")?.map(ThreadId),
        sender: parse_enum("sender", &sender, Sender::parse)?,
        channel: parse_enum("channel", &channel, Channel::parse)?,
        content: row.try_get("content")?,
        subject: row.try_get("subject")?,
        sender_email: row.try_get("sender_email")?,
        sender_phone: row.try_get("sender_phone")?,
        external_message_id: row
            .try_get::<Option<String>, _>("external_message_id")?
            .map(ExternalMessageId),
        status: parse_enum("status", &status, RecordStatus::parse)?,
        timestamp: parse_timestamp("timestamp", row.try_get("timestamp")?)?,
    })
}
