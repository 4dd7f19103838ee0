use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::buyer::BuyerId;
use crate::domain::RecordStatus;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerType {
    Private,
    Dealership,
    Other,
}

impl SellerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Dealership => "dealership",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "private" => Some(Self::Private),
            "dealership" => Some(Self::Dealership),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub buyer_id: BuyerId,
    pub seller_name: String,
    pub seller_type: SellerType,
    /// SMS channel key; at most one active thread per (buyer, phone).
    pub phone: Option<String>,
    pub status: RecordStatus,
    pub message_count: u32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(
        id: ThreadId,
        buyer_id: BuyerId,
        seller_name: impl Into<String>,
        seller_type: SellerType,
        phone: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let seller_name = seller_name.into().trim().to_string();
        if seller_name.is_empty() {
            return Err(DomainError::Validation("seller_name is required".to_string()));
        }

        Ok(Self {
            id,
            buyer_id,
            seller_name,
            seller_type,
            phone: phone.map(|value| value.trim().to_string()).filter(|value| !value.is_empty()),
            status: RecordStatus::Active,
            message_count: 0,
            last_message_at: None,
            last_read_at: None,
            archived_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Thread auto-created on first SMS contact from an unknown number.
    pub fn for_inbound_phone(
        id: ThreadId,
        buyer_id: BuyerId,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        Self::new(id, buyer_id, phone, SellerType::Other, Some(phone.to_string()), now)
    }

    pub fn display_name(&self) -> String {
        display_name(&self.seller_name, self.phone.as_deref())
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

/// Falls back to the phone number when the seller name is empty or is the number itself.
pub fn display_name(seller_name: &str, phone: Option<&str>) -> String {
    match phone.filter(|phone| !phone.is_empty()) {
        Some(phone) if seller_name.trim().is_empty() || seller_name == phone => phone.to_string(),
        _ => seller_name.to_string(),
    }
}

const PREVIEW_LIMIT: usize = 50;

pub fn message_preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_LIMIT {
        return content.to_string();
    }
    let head: String = content.chars().take(PREVIEW_LIMIT - 3).collect();
    format!("{head}...")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread: Thread,
    pub unread_count: u32,
    pub last_message_preview: Option<String>,
}
