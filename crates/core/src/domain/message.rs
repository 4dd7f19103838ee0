use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::buyer::BuyerId;
use crate::domain::thread::ThreadId;
use crate::domain::RecordStatus;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Provider-assigned id (Message-Id header, MessageSid); the dedup key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalMessageId(pub String);

impl ExternalMessageId {
    /// Empty ids carry no dedup key.
    pub fn from_raw(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim).filter(|value| !value.is_empty()).map(|value| Self(value.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Agent,
    Seller,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Seller => "seller",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "agent" => Some(Self::Agent),
            "seller" => Some(Self::Seller),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Chat,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Chat => "chat",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "email" => Some(Self::Email),
            "sms" => Some(Self::Sms),
            "chat" => Some(Self::Chat),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub buyer_id: BuyerId,
    /// `None` marks an inbox item awaiting triage.
    pub thread_id: Option<ThreadId>,
    pub sender: Sender,
    pub channel: Channel,
    pub content: String,
    pub subject: Option<String>,
    pub sender_email: Option<String>,
    pub sender_phone: Option<String>,
    pub external_message_id: Option<ExternalMessageId>,
    pub status: RecordStatus,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn chat(
        id: MessageId,
        buyer_id: BuyerId,
        thread_id: ThreadId,
        sender: Sender,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            buyer_id,
            thread_id: Some(thread_id),
            sender,
            channel: Channel::Chat,
            content: content.into(),
            subject: None,
            sender_email: None,
            sender_phone: None,
            external_message_id: None,
            status: RecordStatus::Active,
            timestamp,
        }
    }

    pub fn is_inbox_item(&self) -> bool {
        self.thread_id.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

impl MessagePage {
    pub fn has_more(&self) -> bool {
        u64::from(self.offset) + (self.messages.len() as u64) < self.total
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub offset: u32,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 100;

    /// Missing or zero limits fall back to the default; oversize limits are capped.
    pub fn clamped(limit: Option<u32>, offset: Option<u32>) -> Self {
        let limit = match limit {
            Some(0) | None => Self::DEFAULT_LIMIT,
            Some(value) => value.min(Self::MAX_LIMIT),
        };
        Self { limit, offset: offset.unwrap_or(0) }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::clamped(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::{Channel, ExternalMessageId, MessagePage, PageRequest, Sender};

    #[test]
    fn sender_and_channel_round_trip_from_storage_encoding() {
        for sender in [Sender::User, Sender::Agent, Sender::Seller] {
            assert_eq!(Sender::parse(sender.as_str()), Some(sender));
        }
        for channel in [Channel::Email, Channel::Sms, Channel::Chat] {
            assert_eq!(Channel::parse(channel.as_str()), Some(channel));
        }
        assert_eq!(Sender::parse("dealer"), None);
    }

    #[test]
    fn blank_external_ids_have_no_dedup_key() {
        assert_eq!(ExternalMessageId::from_raw(None), None);
        assert_eq!(ExternalMessageId::from_raw(Some("  ")), None);
        assert_eq!(
            ExternalMessageId::from_raw(Some(" SM123 ")),
            Some(ExternalMessageId("SM123".to_string()))
        );
    }

    #[test]
    fn page_request_clamps_limits() {
        assert_eq!(PageRequest::clamped(None, None), PageRequest { limit: 50, offset: 0 });
        assert_eq!(PageRequest::clamped(Some(0), Some(5)), PageRequest { limit: 50, offset: 5 });
        assert_eq!(PageRequest::clamped(Some(500), None).limit, 100);
    }

    #[test]
    fn has_more_accounts_for_offset() {
        let page = MessagePage { messages: Vec::new(), total: 10, limit: 50, offset: 10 };
        assert!(!page.has_more());
        let page = MessagePage { messages: Vec::new(), total: 11, limit: 50, offset: 10 };
        assert!(page.has_more());
    }
}
