use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use haggle_core::channels::InboundMessage;
use haggle_core::domain::buyer::Buyer;
use haggle_core::domain::message::{Channel, Message, MessageId, Sender};
use haggle_core::domain::thread::{Thread, ThreadId};
use haggle_core::domain::RecordStatus;
use haggle_core::errors::DomainError;
use haggle_db::{Admission, BuyerRepository, MessageRepository, RepositoryError, ThreadBinding};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("channel `{0}` has no inbound webhook")]
    UnsupportedChannel(&'static str),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored { message: Message, thread_created: bool },
    /// Redelivery of an already stored external id.
    Duplicate(Message),
    /// No buyer owns the recipient key; the delivery is dropped.
    UnknownRecipient(String),
}

/// Attributes normalized webhook messages to a buyer and admits them.
pub struct InboundIngestor {
    buyers: Arc<dyn BuyerRepository>,
    messages: Arc<dyn MessageRepository>,
}

impl InboundIngestor {
    pub fn new(buyers: Arc<dyn BuyerRepository>, messages: Arc<dyn MessageRepository>) -> Self {
        Self { buyers, messages }
    }

    pub async fn ingest(
        &self,
        inbound: InboundMessage,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<IngestOutcome, IngestError> {
        let channel = inbound.channel.as_str();
        let Some(buyer) = self.resolve_buyer(&inbound).await? else {
            info!(
                event_name = "ingest.recipient.unknown",
                correlation_id,
                channel,
                recipient = %inbound.recipient_key,
                "dropping inbound message for unknown recipient"
            );
            return Ok(IngestOutcome::UnknownRecipient(inbound.recipient_key));
        };

        let (message, binding) = inbound_record(&buyer, inbound, now)?;
        match self.messages.admit(message, binding).await? {
            Admission::Created { message, thread_created } => {
                info!(
                    event_name = "ingest.message.stored",
                    correlation_id,
                    channel,
                    buyer_id = %message.buyer_id.0,
                    message_id = %message.id.0,
                    thread_id = message.thread_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
                    thread_created,
                    "stored inbound message"
                );
                Ok(IngestOutcome::Stored { message, thread_created })
            }
            Admission::Duplicate(existing) => {
                debug!(
                    event_name = "ingest.message.duplicate",
                    correlation_id,
                    channel,
                    message_id = %existing.id.0,
                    "external id already stored"
                );
                Ok(IngestOutcome::Duplicate(existing))
            }
        }
    }

    async fn resolve_buyer(&self, inbound: &InboundMessage) -> Result<Option<Buyer>, IngestError> {
        let buyer = match inbound.channel {
            Channel::Email => self.buyers.find_by_inbox_email(&inbound.recipient_key).await?,
            Channel::Sms => self.buyers.find_by_phone_number(&inbound.recipient_key).await?,
            Channel::Chat => return Err(IngestError::UnsupportedChannel(Channel::Chat.as_str())),
        };
        Ok(buyer)
    }
}

/// Email lands in the inbox for triage; SMS binds to the sender's thread.
fn inbound_record(
    buyer: &Buyer,
    inbound: InboundMessage,
    now: DateTime<Utc>,
) -> Result<(Message, ThreadBinding), IngestError> {
    let mut message = Message {
        id: MessageId(Uuid::new_v4().to_string()),
        buyer_id: buyer.id.clone(),
        thread_id: None,
        sender: Sender::Seller,
        channel: inbound.channel,
        content: inbound.body,
        subject: inbound.subject,
        sender_email: None,
        sender_phone: None,
        external_message_id: inbound.external_message_id,
        status: RecordStatus::Active,
        timestamp: now,
    };

    let binding = match inbound.channel {
        Channel::Email => {
            message.sender_email = Some(inbound.sender_identity);
            ThreadBinding::Inbox
        }
        Channel::Sms => {
            let new_thread = Thread::for_inbound_phone(
                ThreadId(Uuid::new_v4().to_string()),
                buyer.id.clone(),
                &inbound.sender_identity,
                now,
            )?;
            message.sender_phone = Some(inbound.sender_identity.clone());
            ThreadBinding::ByPhone { phone: inbound.sender_identity, new_thread }
        }
        Channel::Chat => return Err(IngestError::UnsupportedChannel(Channel::Chat.as_str())),
    };

    Ok((message, binding))
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use haggle_core::domain::buyer::{Buyer, BuyerId, VehiclePreferences};
    use haggle_db::{connect_with_settings, migrations, BuyerRepository, DbPool, SqlBuyerRepository};

    pub async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    pub fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    pub async fn insert_buyer(pool: &DbPool, id: &str, phone_number: Option<&str>) -> Buyer {
        let created_at = ts("2026-03-01T09:00:00Z");
        let buyer = Buyer {
            id: BuyerId(id.to_string()),
            email: format!("{}@example.com", id.to_ascii_lowercase()),
            inbox_email: format!("{}@inbox.haggle.test", id.to_ascii_lowercase()),
            phone_number: phone_number.map(str::to_string),
            zip_code: Some("94107".to_string()),
            preferences: VehiclePreferences {
                year: Some(2024),
                make: Some("Honda".to_string()),
                model: Some("Accord".to_string()),
                body_type: Some("Sedan".to_string()),
                msrp: Some(Decimal::new(30_000, 0)),
            },
            created_at,
            updated_at: created_at,
        };
        SqlBuyerRepository::new(pool.clone()).save(buyer.clone()).await.expect("save buyer");
        buyer
    }
}
