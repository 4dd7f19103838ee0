use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use haggle_core::domain::buyer::{Buyer, BuyerId, VehiclePreferences};
use haggle_core::domain::message::{ExternalMessageId, Message, MessageId, MessagePage, PageRequest};
use haggle_core::domain::offer::{OfferId, SellerOffer, TrackedOffer};
use haggle_core::domain::provisioning::{
    IdempotencyKey, ProvisioningTask, ProvisioningTaskId, ProvisioningTransition,
};
use haggle_core::domain::thread::{Thread, ThreadId, ThreadSummary};

pub mod buyer;
pub mod message;
pub mod offer;
pub mod provisioning;
pub mod thread;

pub use buyer::SqlBuyerRepository;
pub use message::SqlMessageRepository;
pub use offer::SqlOfferRepository;
pub use provisioning::SqlProvisioningRepository;
pub use thread::SqlThreadRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Maps unique-index violations to `Conflict` so callers can report them as input errors.
    pub(crate) fn from_write(error: sqlx::Error, what: &str) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(format!("{what} already exists"))
            }
            _ => Self::Database(error),
        }
    }
}

#[async_trait]
pub trait BuyerRepository: Send + Sync {
    async fn find_by_id(&self, id: &BuyerId) -> Result<Option<Buyer>, RepositoryError>;
    async fn find_by_inbox_email(&self, inbox_email: &str)
        -> Result<Option<Buyer>, RepositoryError>;
    async fn find_by_phone_number(&self, phone_number: &str)
        -> Result<Option<Buyer>, RepositoryError>;
    async fn list(&self) -> Result<Vec<Buyer>, RepositoryError>;
    async fn save(&self, buyer: Buyer) -> Result<(), RepositoryError>;
    async fn update_preferences(
        &self,
        id: &BuyerId,
        preferences: &VehiclePreferences,
        zip_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Buyer>, RepositoryError>;
    async fn set_phone_number(
        &self,
        id: &BuyerId,
        phone_number: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

/// Every lookup is scoped to the owning buyer and only sees active threads.
#[async_trait]
pub trait ThreadRepository: Send + Sync {
    async fn create(&self, thread: Thread) -> Result<(), RepositoryError>;
    async fn find_active(
        &self,
        buyer_id: &BuyerId,
        id: &ThreadId,
    ) -> Result<Option<Thread>, RepositoryError>;
    async fn find_active_by_phone(
        &self,
        buyer_id: &BuyerId,
        phone: &str,
    ) -> Result<Option<Thread>, RepositoryError>;
    async fn list_summaries(&self, buyer_id: &BuyerId)
        -> Result<Vec<ThreadSummary>, RepositoryError>;
    /// Persists seller name, type and phone; `false` when the thread is not active for the buyer.
    async fn update_details(&self, thread: &Thread, now: DateTime<Utc>)
        -> Result<bool, RepositoryError>;
    async fn archive(
        &self,
        buyer_id: &BuyerId,
        id: &ThreadId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    async fn mark_read(
        &self,
        buyer_id: &BuyerId,
        id: &ThreadId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

/// Where an admitted inbound message lands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThreadBinding {
    /// Unthreaded inbox item awaiting triage.
    Inbox,
    /// The buyer's active thread for this seller phone, or `new_thread` if none exists yet.
    ByPhone { phone: String, new_thread: Thread },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Created { message: Message, thread_created: bool },
    /// The external id was already stored; nothing was written.
    Duplicate(Message),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned(Message),
    MessageNotFound,
    ThreadNotFound,
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Dedup check, thread resolution and insert run in one write transaction.
    async fn admit(
        &self,
        message: Message,
        binding: ThreadBinding,
    ) -> Result<Admission, RepositoryError>;
    /// Appends to a thread and bumps its counters; `None` when the thread is not an active
    /// thread of the message's buyer.
    async fn append(&self, message: Message) -> Result<Option<Message>, RepositoryError>;
    async fn find_active(
        &self,
        buyer_id: &BuyerId,
        id: &MessageId,
    ) -> Result<Option<Message>, RepositoryError>;
    async fn find_by_external_id(
        &self,
        external_id: &ExternalMessageId,
    ) -> Result<Option<Message>, RepositoryError>;
    /// Oldest first.
    async fn page_for_thread(
        &self,
        thread_id: &ThreadId,
        page: PageRequest,
    ) -> Result<MessagePage, RepositoryError>;
    /// Newest first; the history window fed to the model.
    async fn recent_for_thread(
        &self,
        thread_id: &ThreadId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;
    /// Unthreaded items, newest first.
    async fn inbox(
        &self,
        buyer_id: &BuyerId,
        page: PageRequest,
    ) -> Result<MessagePage, RepositoryError>;
    async fn assign(
        &self,
        buyer_id: &BuyerId,
        id: &MessageId,
        thread_id: &ThreadId,
        now: DateTime<Utc>,
    ) -> Result<AssignOutcome, RepositoryError>;
    async fn archive_inbox_item(
        &self,
        buyer_id: &BuyerId,
        id: &MessageId,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait OfferRepository: Send + Sync {
    async fn create(&self, buyer_id: &BuyerId, offer: TrackedOffer) -> Result<(), RepositoryError>;
    /// Newest first, joined with the owning thread's seller.
    async fn list_for_buyer(
        &self,
        buyer_id: &BuyerId,
        limit: u32,
    ) -> Result<Vec<SellerOffer>, RepositoryError>;
    async fn delete(&self, buyer_id: &BuyerId, id: &OfferId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ProvisioningRepository: Send + Sync {
    /// Inserts the task, or returns the row already holding its idempotency key.
    /// A terminally failed row is re-queued.
    async fn enqueue(&self, task: ProvisioningTask) -> Result<ProvisioningTask, RepositoryError>;
    async fn find_by_id(
        &self,
        id: &ProvisioningTaskId,
    ) -> Result<Option<ProvisioningTask>, RepositoryError>;
    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<ProvisioningTask>, RepositoryError>;
    /// Claimable tasks: queued or retryable and due, or running with a claim older than
    /// `stale_before`.
    async fn list_claimable(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ProvisioningTask>, RepositoryError>;
    async fn list_for_buyer(
        &self,
        buyer_id: &BuyerId,
    ) -> Result<Vec<ProvisioningTask>, RepositoryError>;
    /// Compare-and-set on `state_version`; `false` when another worker moved the task first.
    async fn apply_transition(
        &self,
        task: &ProvisioningTask,
        transition: &ProvisioningTransition,
    ) -> Result<bool, RepositoryError>;
    async fn list_transitions(
        &self,
        task_id: &ProvisioningTaskId,
    ) -> Result<Vec<StoredTransition>, RepositoryError>;
}

/// Audit row for a provisioning state change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredTransition {
    pub task_id: ProvisioningTaskId,
    pub from_state: String,
    pub to_state: String,
    pub reason: String,
    pub state_version: u32,
    pub occurred_at: DateTime<Utc>,
}

pub(crate) const ACTIVE: &str = "active";
pub(crate) const ARCHIVED: &str = "archived";

/// Soft-delete filter; `alias` is the table alias used in the query.
pub(crate) fn active_only(alias: &str) -> String {
    format!("{alias}.status = '{ACTIVE}'")
}

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn format_optional_timestamp(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(format_timestamp)
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_enum<T>(
    column: &str,
    value: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown value in `{column}`: `{value}`")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Utc};

    use haggle_core::domain::buyer::{Buyer, BuyerId, VehiclePreferences};
    use haggle_core::domain::thread::{SellerType, Thread, ThreadId};

    use super::{BuyerRepository, SqlBuyerRepository, SqlThreadRepository, ThreadRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    pub async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    pub fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    pub fn sample_buyer(id: &str) -> Buyer {
        let created_at = parse_ts("2026-03-01T09:00:00Z");
        Buyer {
            id: BuyerId(id.to_string()),
            email: format!("{}@example.com", id.to_ascii_lowercase()),
            inbox_email: format!("{}@inbox.haggle.test", id.to_ascii_lowercase()),
            phone_number: None,
            zip_code: Some("94107".to_string()),
            preferences: VehiclePreferences {
                year: Some(2024),
                make: Some("Toyota".to_string()),
                model: Some("Camry".to_string()),
                body_type: Some("Sedan".to_string()),
                msrp: Some(rust_decimal::Decimal::new(32_000, 0)),
            },
            created_at,
            updated_at: created_at,
        }
    }

    pub async fn insert_buyer(pool: &DbPool, id: &str) -> Buyer {
        let buyer = sample_buyer(id);
        SqlBuyerRepository::new(pool.clone()).save(buyer.clone()).await.expect("save buyer");
        buyer
    }

    pub async fn insert_thread(
        pool: &DbPool,
        buyer_id: &BuyerId,
        id: &str,
        seller_name: &str,
        phone: Option<&str>,
    ) -> Thread {
        let thread = Thread::new(
            ThreadId(id.to_string()),
            buyer_id.clone(),
            seller_name,
            SellerType::Dealership,
            phone.map(str::to_string),
            parse_ts("2026-03-01T09:30:00Z"),
        )
        .expect("thread");
        SqlThreadRepository::new(pool.clone()).create(thread.clone()).await.expect("create thread");
        thread
    }
}
