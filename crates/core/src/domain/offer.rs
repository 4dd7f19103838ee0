use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::message::MessageId;
use crate::domain::thread::{SellerType, ThreadId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferId(pub String);

/// Seller quote recorded by the buyer; free text used as leverage, never parsed as a price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedOffer {
    pub id: OfferId,
    pub thread_id: ThreadId,
    pub message_id: Option<MessageId>,
    pub offer_text: String,
    pub tracked_at: DateTime<Utc>,
}

impl TrackedOffer {
    pub fn new(
        id: OfferId,
        thread_id: ThreadId,
        message_id: Option<MessageId>,
        offer_text: &str,
        tracked_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let offer_text = offer_text.trim();
        if offer_text.is_empty() {
            return Err(DomainError::Validation("offer_text is required".to_string()));
        }

        Ok(Self { id, thread_id, message_id, offer_text: offer_text.to_string(), tracked_at })
    }
}

/// Offer joined with the thread it was tracked on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerOffer {
    pub offer: TrackedOffer,
    /// `None` when the owning thread could not be resolved.
    pub seller_display_name: Option<String>,
    pub seller_type: Option<SellerType>,
}

pub const UNKNOWN_SELLER: &str = "Unknown Seller";

impl SellerOffer {
    pub fn seller_label(&self) -> &str {
        self.seller_display_name.as_deref().unwrap_or(UNKNOWN_SELLER)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{OfferId, SellerOffer, TrackedOffer};
    use crate::domain::thread::ThreadId;

    fn offer(text: &str) -> Result<TrackedOffer, crate::errors::DomainError> {
        TrackedOffer::new(OfferId("O-1".to_string()), ThreadId("T-1".to_string()), None, text, Utc::now())
    }

    #[test]
    fn offer_text_is_required_and_trimmed() {
        assert!(offer("   ").is_err());
        assert_eq!(offer("  $31,500 OTD ").expect("offer").offer_text, "$31,500 OTD");
    }

    #[test]
    fn unresolved_thread_is_labelled_unknown_seller() {
        let entry = SellerOffer {
            offer: offer("$30k").expect("offer"),
            seller_display_name: None,
            seller_type: None,
        };
        assert_eq!(entry.seller_label(), "Unknown Seller");
    }
}
