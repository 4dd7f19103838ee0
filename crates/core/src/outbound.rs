//! Outbound reply planning.
//!
//! Turns a stored inbound message plus reply text into a provider-agnostic
//! send request. Transport lives in `haggle-channels::dispatch`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::domain::buyer::Buyer;
use crate::domain::message::Message;
use crate::domain::thread::Thread;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailReply {
    pub to: String,
    pub subject: String,
    /// Angle-bracketed Message-Id of the message being answered.
    pub in_reply_to: String,
    pub html_body: String,
}

impl EmailReply {
    /// Threads onto `original`, which must have arrived by email.
    pub fn for_message(original: &Message, content: &str) -> Result<Self, DomainError> {
        let content = required_content(content)?;
        let (Some(external_id), Some(sender_email)) = (
            original.external_message_id.as_ref(),
            original.sender_email.as_deref().filter(|email| !email.trim().is_empty()),
        ) else {
            return Err(DomainError::Validation("message was not received via email".to_string()));
        };

        Ok(Self {
            to: header_value(sender_email),
            subject: reply_subject(original.subject.as_deref().unwrap_or_default()),
            in_reply_to: bracket_message_id(&external_id.0),
            html_body: content,
        })
    }

    /// RFC 5322 rendering with CRLF line endings.
    pub fn to_rfc5322(&self) -> String {
        let mut rendered = String::new();
        rendered.push_str(&format!("To: {}\r\n", self.to));
        rendered.push_str(&format!("Subject: {}\r\n", self.subject));
        rendered.push_str(&format!("In-Reply-To: {}\r\n", self.in_reply_to));
        rendered.push_str(&format!("References: {}\r\n", self.in_reply_to));
        rendered.push_str("Content-Type: text/html; charset=utf-8\r\n");
        rendered.push_str("MIME-Version: 1.0\r\n");
        rendered.push_str("\r\n");
        rendered.push_str(&self.html_body);
        rendered
    }

    /// base64url without padding, as the send endpoint's `raw` field expects.
    pub fn encode_raw(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_rfc5322().as_bytes())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsReply {
    /// The buyer's allocated number.
    pub from: String,
    /// The seller's number bound to the thread.
    pub to: String,
    pub body: String,
}

impl SmsReply {
    pub fn for_thread(buyer: &Buyer, thread: &Thread, content: &str) -> Result<Self, DomainError> {
        let body = required_content(content)?;
        let from = buyer
            .phone_number
            .as_deref()
            .filter(|number| !number.trim().is_empty())
            .ok_or_else(|| {
                DomainError::Validation("buyer does not have an SMS number allocated".to_string())
            })?;
        let to = thread.phone.as_deref().filter(|phone| !phone.trim().is_empty()).ok_or_else(|| {
            DomainError::Validation("thread does not have a phone number assigned".to_string())
        })?;

        Ok(Self { from: from.to_string(), to: to.to_string(), body })
    }
}

pub fn reply_subject(subject: &str) -> String {
    let subject = header_value(subject);
    let already_reply = subject.get(..3).is_some_and(|head| head.eq_ignore_ascii_case("re:"));
    if already_reply {
        subject
    } else {
        format!("Re: {subject}")
    }
}

pub fn bracket_message_id(id: &str) -> String {
    let id = header_value(id);
    let mut bracketed = String::with_capacity(id.len() + 2);
    if !id.starts_with('<') {
        bracketed.push('<');
    }
    bracketed.push_str(&id);
    if !id.ends_with('>') {
        bracketed.push('>');
    }
    bracketed
}

fn required_content(content: &str) -> Result<String, DomainError> {
    if content.trim().is_empty() {
        return Err(DomainError::Validation("content is required".to_string()));
    }
    Ok(content.to_string())
}

/// Header values never carry line breaks.
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ").trim().to_string()
}
