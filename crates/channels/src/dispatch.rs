use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use haggle_core::config::{EmailConfig, SmsConfig};
use haggle_core::domain::buyer::BuyerId;
use haggle_core::domain::message::{Channel, Message, MessageId, Sender};
use haggle_core::domain::RecordStatus;
use haggle_core::errors::DomainError;
use haggle_core::outbound::{EmailReply, SmsReply};
use haggle_db::{BuyerRepository, MessageRepository, RepositoryError, ThreadRepository};

const SEND_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("could not parse provider response: {0}")]
    Parse(String),
    #[error("{0} sending is not configured")]
    NotConfigured(&'static str),
}

/// Returns the provider's id for the sent message.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, reply: &SmsReply) -> Result<String, DispatchError>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, reply: &EmailReply) -> Result<String, DispatchError>;
}

/// Stands in for a channel without credentials.
#[derive(Default)]
pub struct UnconfiguredSender;

#[async_trait]
impl SmsSender for UnconfiguredSender {
    async fn send_sms(&self, _reply: &SmsReply) -> Result<String, DispatchError> {
        Err(DispatchError::NotConfigured("sms"))
    }
}

#[async_trait]
impl EmailSender for UnconfiguredSender {
    async fn send_email(&self, _reply: &EmailReply) -> Result<String, DispatchError> {
        Err(DispatchError::NotConfigured("email"))
    }
}

pub fn sms_sender(config: &SmsConfig) -> Result<Arc<dyn SmsSender>, DispatchError> {
    if !config.has_credentials() {
        return Ok(Arc::new(UnconfiguredSender));
    }
    Ok(Arc::new(TwilioSmsSender::from_config(config)?))
}

pub fn email_sender(config: &EmailConfig) -> Result<Arc<dyn EmailSender>, DispatchError> {
    match config.access_token.clone().filter(|token| !token.expose_secret().trim().is_empty()) {
        Some(access_token) => Ok(Arc::new(GmailSender::new(&config.api_base_url, access_token)?)),
        None => Ok(Arc::new(UnconfiguredSender)),
    }
}

pub struct TwilioSmsSender {
    http_client: reqwest::Client,
    api_base_url: String,
    account_sid: String,
    auth_token: SecretString,
    messaging_service_sid: Option<String>,
}

impl TwilioSmsSender {
    pub fn from_config(config: &SmsConfig) -> Result<Self, DispatchError> {
        let (Some(account_sid), Some(auth_token)) =
            (config.account_sid.clone(), config.auth_token.clone())
        else {
            return Err(DispatchError::NotConfigured("sms"));
        };

        Ok(Self {
            http_client: reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            account_sid,
            auth_token,
            messaging_service_sid: config
                .messaging_service_sid
                .clone()
                .filter(|sid| !sid.trim().is_empty()),
        })
    }
}

#[async_trait]
impl SmsSender for TwilioSmsSender {
    async fn send_sms(&self, reply: &SmsReply) -> Result<String, DispatchError> {
        let mut form = vec![
            ("From", reply.from.as_str()),
            ("To", reply.to.as_str()),
            ("Body", reply.body.as_str()),
        ];
        if let Some(sid) = self.messaging_service_sid.as_deref() {
            form.push(("MessagingServiceSid", sid));
        }

        let response = self
            .http_client
            .post(format!("{}/2010-04-01/Accounts/{}/Messages.json", self.api_base_url, self.account_sid))
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&form)
            .send()
            .await?;

        string_field(&json_body(response).await?, "sid")
    }
}

pub struct GmailSender {
    http_client: reqwest::Client,
    api_base_url: String,
    access_token: SecretString,
}

impl GmailSender {
    pub fn new(api_base_url: &str, access_token: SecretString) -> Result<Self, DispatchError> {
        Ok(Self {
            http_client: reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }
}

#[async_trait]
impl EmailSender for GmailSender {
    async fn send_email(&self, reply: &EmailReply) -> Result<String, DispatchError> {
        let response = self
            .http_client
            .post(format!("{}/gmail/v1/users/me/messages/send", self.api_base_url))
            .bearer_auth(self.access_token.expose_secret())
            .json(&json!({ "raw": reply.encode_raw() }))
            .send()
            .await?;

        string_field(&json_body(response).await?, "id")
    }
}

async fn json_body(response: reqwest::Response) -> Result<Value, DispatchError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DispatchError::Provider { status: status.as_u16(), body });
    }

    response.json::<Value>().await.map_err(|error| DispatchError::Parse(error.to_string()))
}

fn string_field(body: &Value, field: &str) -> Result<String, DispatchError> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DispatchError::Parse(format!("response is missing `{field}`")))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub provider_message_id: String,
    /// The sent reply as stored on the thread; `None` when the original was an unthreaded
    /// inbox item.
    pub stored: Option<Message>,
}

/// Sends buyer replies and records them on the conversation.
pub struct OutboundDispatcher {
    buyers: Arc<dyn BuyerRepository>,
    threads: Arc<dyn ThreadRepository>,
    messages: Arc<dyn MessageRepository>,
    email: Arc<dyn EmailSender>,
    sms: Arc<dyn SmsSender>,
}

impl OutboundDispatcher {
    pub fn new(
        buyers: Arc<dyn BuyerRepository>,
        threads: Arc<dyn ThreadRepository>,
        messages: Arc<dyn MessageRepository>,
        email: Arc<dyn EmailSender>,
        sms: Arc<dyn SmsSender>,
    ) -> Self {
        Self { buyers, threads, messages, email, sms }
    }

    /// Answers an email-borne message on the seller's original email thread.
    pub async fn reply_by_email(
        &self,
        buyer_id: &BuyerId,
        message_id: &MessageId,
        content: &str,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let original = self
            .messages
            .find_active(buyer_id, message_id)
            .await?
            .ok_or(DomainError::MessageNotFound)?;
        let reply = EmailReply::for_message(&original, content)?;

        let provider_message_id = self.email.send_email(&reply).await.inspect_err(|error| {
            warn!(
                event_name = "dispatch.email.failed",
                correlation_id,
                buyer_id = %buyer_id.0,
                message_id = %message_id.0,
                error = %error,
                "email reply was not sent"
            );
        })?;

        let mut sent = outbound_message(buyer_id, &original, Channel::Email, content, now);
        sent.subject = Some(reply.subject.clone());
        let stored = self.record(sent).await?;

        info!(
            event_name = "dispatch.email.sent",
            correlation_id,
            buyer_id = %buyer_id.0,
            message_id = %message_id.0,
            provider_message_id = %provider_message_id,
            stored = stored.is_some(),
            "email reply sent"
        );
        Ok(DispatchOutcome { provider_message_id, stored })
    }

    /// Texts the seller bound to the thread that `message_id` belongs to.
    pub async fn reply_by_sms(
        &self,
        buyer_id: &BuyerId,
        message_id: &MessageId,
        content: &str,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let original = self
            .messages
            .find_active(buyer_id, message_id)
            .await?
            .ok_or(DomainError::MessageNotFound)?;
        let thread_id = original.thread_id.clone().ok_or(DomainError::ThreadNotFound)?;
        let thread = self
            .threads
            .find_active(buyer_id, &thread_id)
            .await?
            .ok_or(DomainError::ThreadNotFound)?;
        let buyer = self
            .buyers
            .find_by_id(buyer_id)
            .await?
            .ok_or_else(|| DomainError::Validation("buyer not found".to_string()))?;
        let reply = SmsReply::for_thread(&buyer, &thread, content)?;

        let provider_message_id = self.sms.send_sms(&reply).await.inspect_err(|error| {
            warn!(
                event_name = "dispatch.sms.failed",
                correlation_id,
                buyer_id = %buyer_id.0,
                thread_id = %thread_id.0,
                error = %error,
                "sms reply was not sent"
            );
        })?;

        let stored =
            self.record(outbound_message(buyer_id, &original, Channel::Sms, content, now)).await?;

        info!(
            event_name = "dispatch.sms.sent",
            correlation_id,
            buyer_id = %buyer_id.0,
            thread_id = %thread_id.0,
            provider_message_id = %provider_message_id,
            "sms reply sent"
        );
        Ok(DispatchOutcome { provider_message_id, stored })
    }

    async fn record(&self, message: Message) -> Result<Option<Message>, DispatchError> {
        if message.thread_id.is_none() {
            return Ok(None);
        }
        Ok(self.messages.append(message).await?)
    }
}

fn outbound_message(
    buyer_id: &BuyerId,
    original: &Message,
    channel: Channel,
    content: &str,
    now: DateTime<Utc>,
) -> Message {
    Message {
        id: MessageId(Uuid::new_v4().to_string()),
        buyer_id: buyer_id.clone(),
        thread_id: original.thread_id.clone(),
        sender: Sender::User,
        channel,
        content: content.to_string(),
        subject: None,
        sender_email: None,
        sender_phone: None,
        external_message_id: None,
        status: RecordStatus::Active,
        timestamp: now,
    }
}
