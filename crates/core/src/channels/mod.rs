//! Provider payload normalization.
//!
//! Each inbound channel (email forwarding webhook, SMS webhook) delivers a
//! provider-shaped payload. Normalizers turn those into one
//! [`InboundMessage`] shape so routing, dedup and persistence never look at
//! provider fields.

pub mod email;
pub mod phone;
pub mod sms;

use serde::{Deserialize, Serialize};

use crate::domain::message::{Channel, ExternalMessageId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: Channel,
    /// Identifies the receiving buyer: inbox address for email, allocated number for SMS.
    pub recipient_key: String,
    /// Identifies the seller: email address or phone number.
    pub sender_identity: String,
    pub subject: Option<String>,
    pub body: String,
    pub external_message_id: Option<ExternalMessageId>,
}

pub use email::{normalize_email, EmailPayload};
pub use sms::{normalize_sms, SmsPayload};
