use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use crate::channels::InboundMessage;
use crate::domain::message::{Channel, ExternalMessageId};
use crate::errors::DomainError;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsPayload {
    #[serde(default, rename = "To")]
    pub to: Option<String>,
    #[serde(default, rename = "From")]
    pub from: Option<String>,
    #[serde(default, rename = "Body")]
    pub body: Option<String>,
    #[serde(default, rename = "MessageSid")]
    pub message_sid: Option<String>,
}

impl SmsPayload {
    pub fn from_params(params: &[(String, String)]) -> Self {
        let lookup = |key: &str| {
            params.iter().find(|(name, _)| name == key).map(|(_, value)| value.clone())
        };
        Self {
            to: lookup("To"),
            from: lookup("From"),
            body: lookup("Body"),
            message_sid: lookup("MessageSid"),
        }
    }
}

/// Body is kept verbatim; SMS has no quoting conventions to strip.
pub fn normalize_sms(payload: &SmsPayload) -> Result<InboundMessage, DomainError> {
    let to = required(payload.to.as_deref(), "To")?;
    let from = required(payload.from.as_deref(), "From")?;

    Ok(InboundMessage {
        channel: Channel::Sms,
        recipient_key: to,
        sender_identity: from,
        subject: None,
        body: payload.body.clone().unwrap_or_default(),
        external_message_id: ExternalMessageId::from_raw(payload.message_sid.as_deref()),
    })
}

fn required(value: Option<&str>, field: &str) -> Result<String, DomainError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DomainError::MalformedPayload(format!("missing {field}")))
}

/// Request attributes the signature URL is rebuilt from when no public
/// webhook URL is configured.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestOrigin<'a> {
    pub forwarded_proto: Option<&'a str>,
    pub forwarded_host: Option<&'a str>,
    pub host: Option<&'a str>,
    pub path_and_query: &'a str,
}

/// The URL the provider signed: the configured public URL wins, otherwise
/// scheme and host come from proxy headers.
pub fn signed_url(configured: Option<&str>, origin: &RequestOrigin<'_>) -> String {
    if let Some(url) = configured.map(str::trim).filter(|url| !url.is_empty()) {
        return url.to_string();
    }

    fn present(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|value| !value.is_empty())
    }
    let scheme = present(origin.forwarded_proto).unwrap_or("http");
    let host = present(origin.forwarded_host).or(present(origin.host)).unwrap_or("localhost");

    format!("{scheme}://{host}{}", origin.path_and_query)
}

/// base64(HMAC-SHA1(auth_token, url + sorted key/value concatenation)).
pub fn compute_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
) -> Result<String, DomainError> {
    Ok(STANDARD.encode(signature_mac(auth_token, url, params)?.finalize().into_bytes()))
}

pub fn verify_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    provided: &str,
) -> Result<(), DomainError> {
    let provided = STANDARD.decode(provided.trim()).map_err(|_| DomainError::SignatureInvalid)?;
    signature_mac(auth_token, url, params)?
        .verify_slice(&provided)
        .map_err(|_| DomainError::SignatureInvalid)
}

fn signature_mac(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
) -> Result<HmacSha1, DomainError> {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();

    let mut mac = match <HmacSha1 as Mac>::new_from_slice(auth_token.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Err(DomainError::SignatureInvalid),
    };
    mac.update(url.as_bytes());
    for (key, value) in sorted {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::{
        compute_signature, normalize_sms, signed_url, verify_signature, RequestOrigin, SmsPayload,
    };
    use crate::domain::message::Channel;
    use crate::errors::DomainError;

    fn params() -> Vec<(String, String)> {
        vec![
            ("To".to_string(), "+14155550100".to_string()),
            ("From".to_string(), "+16505550199".to_string()),
            ("Body".to_string(), "  Still available?  ".to_string()),
            ("MessageSid".to_string(), "SM0001".to_string()),
        ]
    }

    #[test]
    fn normalization_keeps_body_verbatim() {
        let message = normalize_sms(&SmsPayload::from_params(&params())).expect("normalized");

        assert_eq!(message.channel, Channel::Sms);
        assert_eq!(message.recipient_key, "+14155550100");
        assert_eq!(message.sender_identity, "+16505550199");
        assert_eq!(message.body, "  Still available?  ");
        assert_eq!(message.external_message_id.map(|id| id.0).as_deref(), Some("SM0001"));
    }

    #[test]
    fn missing_to_or_from_is_malformed() {
        let payload = SmsPayload { to: None, ..SmsPayload::from_params(&params()) };
        assert!(matches!(normalize_sms(&payload), Err(DomainError::MalformedPayload(_))));

        let payload = SmsPayload { from: Some(" ".to_string()), ..SmsPayload::from_params(&params()) };
        assert!(matches!(normalize_sms(&payload), Err(DomainError::MalformedPayload(_))));
    }

    #[test]
    fn signature_matches_provider_reference_vector() {
        let url = "https://mycompany.com/myapp.php?foo=1&bar=2";
        let params = vec![
            ("CallSid".to_string(), "CA1234567890ABCDE".to_string()),
            ("Caller".to_string(), "+14158675309".to_string()),
            ("Digits".to_string(), "1234".to_string()),
            ("From".to_string(), "+14158675309".to_string()),
            ("To".to_string(), "+18005551212".to_string()),
        ];

        let signature = compute_signature("12345", url, &params).expect("signature");
        assert_eq!(signature, "RSOYDt4T1cUTdK1PDd93/VVr8B8=");
        assert!(verify_signature("12345", url, &params, &signature).is_ok());
    }

    #[test]
    fn signature_is_order_independent_and_rejects_tampering() {
        let url = "https://haggle.test/api/v1/webhooks/sms/inbound";
        let signature = compute_signature("secret", url, &params()).expect("signature");

        let mut reversed = params();
        reversed.reverse();
        assert!(verify_signature("secret", url, &reversed, &signature).is_ok());

        let mut tampered = params();
        tampered[2].1 = "Sold".to_string();
        assert_eq!(
            verify_signature("secret", url, &tampered, &signature),
            Err(DomainError::SignatureInvalid)
        );
        assert_eq!(
            verify_signature("secret", url, &params(), "not base64!"),
            Err(DomainError::SignatureInvalid)
        );
    }

    #[test]
    fn signed_url_prefers_configuration_then_proxy_headers() {
        let origin = RequestOrigin {
            forwarded_proto: Some("https"),
            forwarded_host: Some("abc.ngrok.io"),
            host: Some("127.0.0.1:8080"),
            path_and_query: "/api/v1/webhooks/sms/inbound",
        };

        assert_eq!(
            signed_url(Some("https://haggle.test/sms"), &origin),
            "https://haggle.test/sms"
        );
        assert_eq!(signed_url(None, &origin), "https://abc.ngrok.io/api/v1/webhooks/sms/inbound");

        let direct = RequestOrigin {
            forwarded_proto: None,
            forwarded_host: None,
            host: Some("127.0.0.1:8080"),
            path_and_query: "/hook",
        };
        assert_eq!(signed_url(Some("  "), &direct), "http://127.0.0.1:8080/hook");

        let blank_headers = RequestOrigin {
            forwarded_proto: Some(" "),
            forwarded_host: Some(""),
            host: Some("haggle.test"),
            path_and_query: "/hook",
        };
        assert_eq!(signed_url(None, &blank_headers), "http://haggle.test/hook");
    }

    #[test]
    fn empty_auth_token_still_signs_and_verifies() {
        let url = "https://haggle.test/hook";
        let signature = compute_signature("", url, &params()).expect("signature");

        assert!(verify_signature("", url, &params(), &signature).is_ok());
        assert_eq!(
            verify_signature("secret", url, &params(), &signature),
            Err(DomainError::SignatureInvalid)
        );
    }
}
