use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::channels::InboundMessage;
use crate::domain::message::{Channel, ExternalMessageId};
use crate::errors::DomainError;

/// Fields posted by the email forwarding provider. Names follow the
/// provider's form keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPayload {
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, rename = "stripped-text")]
    pub stripped_text: Option<String>,
    #[serde(default, rename = "body-plain")]
    pub body_plain: Option<String>,
    #[serde(default, rename = "Message-Id")]
    pub message_id: Option<String>,
}

impl EmailPayload {
    /// Applies one form field by its wire name. Unknown fields are ignored.
    pub fn set_field(&mut self, name: &str, value: String) {
        let slot = match name {
            "recipient" => &mut self.recipient,
            "from" => &mut self.from,
            "sender" => &mut self.sender,
            "subject" => &mut self.subject,
            "stripped-text" => &mut self.stripped_text,
            "body-plain" => &mut self.body_plain,
            "Message-Id" => &mut self.message_id,
            _ => return,
        };
        *slot = Some(value);
    }
}

pub fn normalize_email(payload: &EmailPayload) -> Result<InboundMessage, DomainError> {
    let recipient = non_blank(payload.recipient.as_deref())
        .map(str::to_lowercase)
        .ok_or_else(|| DomainError::MalformedPayload("missing recipient".to_string()))?;

    let raw_body = non_blank(payload.stripped_text.as_deref())
        .or_else(|| non_blank(payload.body_plain.as_deref()))
        .unwrap_or_default();

    let envelope_sender = non_blank(payload.from.as_deref())
        .or_else(|| non_blank(payload.sender.as_deref()))
        .map(str::to_string);

    let sender_identity = extract_forwarded_sender(raw_body)
        .or(envelope_sender)
        .ok_or_else(|| DomainError::MalformedPayload("missing sender".to_string()))?;

    Ok(InboundMessage {
        channel: Channel::Email,
        recipient_key: recipient,
        sender_identity,
        subject: non_blank(payload.subject.as_deref()).map(str::to_string),
        body: clean_body(raw_body),
        external_message_id: ExternalMessageId::from_raw(payload.message_id.as_deref()),
    })
}

/// Recovers the original author from a "Forwarded message" block, lowercased.
pub fn extract_forwarded_sender(body: &str) -> Option<String> {
    static FORWARDED: OnceLock<Regex> = OnceLock::new();
    static ADDRESS: OnceLock<Regex> = OnceLock::new();

    let forwarded = FORWARDED.get_or_init(|| {
        Regex::new(r"(?i)-+\s*Forwarded\s+message\s*-+\s*From:\s*(.+)")
            .expect("forwarded-message regex must compile")
    });
    let address = ADDRESS.get_or_init(|| {
        Regex::new(r"<?([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})>?")
            .expect("address regex must compile")
    });

    let from_line = forwarded.captures(body)?.get(1)?.as_str().trim();
    if from_line.is_empty() {
        return None;
    }

    address.captures(from_line)?.get(1).map(|found| found.as_str().to_lowercase())
}

/// Drops quoted history and reply attributions, collapsing blank runs.
pub fn clean_body(body: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();

    for line in body.trim().split('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with("On ") && trimmed.contains("wrote:") {
            break;
        }
        if trimmed.starts_with('>') {
            continue;
        }
        if trimmed.is_empty() && kept.last().is_some_and(|last| last.trim().is_empty()) {
            continue;
        }
        kept.push(line);
    }

    kept.join("\n").trim().to_string()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{clean_body, extract_forwarded_sender, normalize_email, EmailPayload};
    use crate::domain::message::Channel;
    use crate::errors::DomainError;

    fn payload() -> EmailPayload {
        EmailPayload {
            recipient: Some(" Buyer.One@Inbox.Haggle.test ".to_string()),
            from: Some("Me <me@gmail.com>".to_string()),
            sender: None,
            subject: Some("Camry pricing".to_string()),
            stripped_text: Some("Can you do $31k?".to_string()),
            body_plain: Some("Can you do $31k?\n\n> older".to_string()),
            message_id: Some("<abc@mail.example>".to_string()),
        }
    }

    #[test]
    fn forwarded_block_overrides_envelope_sender() {
        let body = "FYI\n\n---------- Forwarded message ---------\nFrom: Sam Dealer <Sam@BayToyota.COM>\nDate: Mon";
        assert_eq!(extract_forwarded_sender(body).as_deref(), Some("sam@baytoyota.com"));

        let mut forwarded = payload();
        forwarded.stripped_text = Some(body.to_string());
        let message = normalize_email(&forwarded).expect("normalized");
        assert_eq!(message.sender_identity, "sam@baytoyota.com");
    }

    #[test]
    fn forwarded_sender_without_brackets_is_recognized() {
        let body = "-- forwarded MESSAGE --\nFrom: sales@dealer.example";
        assert_eq!(extract_forwarded_sender(body).as_deref(), Some("sales@dealer.example"));
        assert_eq!(extract_forwarded_sender("no forward here"), None);
    }

    #[test]
    fn normalization_prefers_stripped_text_and_lowercases_recipient() {
        let message = normalize_email(&payload()).expect("normalized");

        assert_eq!(message.channel, Channel::Email);
        assert_eq!(message.recipient_key, "buyer.one@inbox.haggle.test");
        assert_eq!(message.sender_identity, "Me <me@gmail.com>");
        assert_eq!(message.body, "Can you do $31k?");
        assert_eq!(
            message.external_message_id.map(|id| id.0).as_deref(),
            Some("<abc@mail.example>")
        );
    }

    #[test]
    fn falls_back_to_body_plain_and_sender_field() {
        let mut fallback = payload();
        fallback.stripped_text = None;
        fallback.from = Some("   ".to_string());
        fallback.sender = Some("dealer@example.com".to_string());

        let message = normalize_email(&fallback).expect("normalized");
        assert_eq!(message.sender_identity, "dealer@example.com");
        assert_eq!(message.body, "Can you do $31k?");
    }

    #[test]
    fn missing_recipient_or_sender_is_malformed() {
        let mut missing_recipient = payload();
        missing_recipient.recipient = None;
        assert!(matches!(
            normalize_email(&missing_recipient),
            Err(DomainError::MalformedPayload(_))
        ));

        let mut missing_sender = payload();
        missing_sender.from = None;
        assert!(matches!(normalize_email(&missing_sender), Err(DomainError::MalformedPayload(_))));
    }

    #[test]
    fn clean_body_stops_at_attribution_and_drops_quotes() {
        let body = "  Hi there\n\n\n\nBest offer is $30k\n> quoted\nOn Tue, Bob wrote:\nold stuff  ";
        assert_eq!(clean_body(body), "Hi there\n\nBest offer is $30k");
    }

    #[test]
    fn set_field_maps_wire_names() {
        let mut payload = EmailPayload::default();
        payload.set_field("stripped-text", "hello".to_string());
        payload.set_field("Message-Id", "<x@y>".to_string());
        payload.set_field("attachment-count", "2".to_string());

        assert_eq!(payload.stripped_text.as_deref(), Some("hello"));
        assert_eq!(payload.message_id.as_deref(), Some("<x@y>"));
    }
}
