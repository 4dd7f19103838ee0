//! Provider webhooks. Every outcome except a bad SMS signature is acknowledged
//! with 200 so providers never retry deliveries that were already handled.

use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, OriginalUri, Request, State},
    extract::rejection::FormRejection,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Form, Json, Router,
};
use chrono::Utc;
use haggle_channels::IngestOutcome;
use haggle_core::channels::sms::{signed_url, verify_signature, RequestOrigin, SIGNATURE_HEADER};
use haggle_core::channels::{normalize_email, normalize_sms, EmailPayload, InboundMessage, SmsPayload};
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::{error, info, warn};

use crate::api::correlation_id;
use crate::bootstrap::AppState;

const EMAIL_BODY_LIMIT: usize = 32 * 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/webhooks/email/inbound",
            post(inbound_email).layer(DefaultBodyLimit::max(EMAIL_BODY_LIMIT)),
        )
        .route("/webhooks/sms/inbound", post(inbound_sms))
}

fn email_status(status: &str) -> Response {
    (StatusCode::OK, Json(json!({ "status": status }))).into_response()
}

async fn inbound_email(State(state): State<AppState>, request: Request) -> Response {
    let correlation_id = correlation_id(request.headers());
    let is_multipart = request
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"));

    let payload = if is_multipart {
        match multipart_payload(request).await {
            Some(payload) => payload,
            None => {
                warn!(
                    event_name = "webhook.email.malformed_multipart",
                    correlation_id,
                    "multipart email webhook could not be read"
                );
                return email_status("skipped - malformed multipart data");
            }
        }
    } else {
        match Form::<Vec<(String, String)>>::from_request(request, &()).await {
            Ok(Form(fields)) => {
                let mut payload = EmailPayload::default();
                for (name, value) in fields {
                    payload.set_field(&name, value);
                }
                payload
            }
            Err(rejection) => {
                warn!(
                    event_name = "webhook.email.invalid_form",
                    correlation_id,
                    error = %rejection,
                    "email webhook body is not a form"
                );
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid form data" })))
                    .into_response();
            }
        }
    };

    let inbound = match normalize_email(&payload) {
        Ok(inbound) => inbound,
        Err(error) => {
            warn!(
                event_name = "webhook.email.malformed",
                correlation_id,
                error = %error,
                "email webhook dropped"
            );
            return email_status("error");
        }
    };

    match ingest(&state, inbound, &correlation_id).await {
        Some(IngestOutcome::Stored { message, .. }) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "message_id": message.id.0 })),
        )
            .into_response(),
        Some(IngestOutcome::Duplicate(message)) => (
            StatusCode::OK,
            Json(json!({ "status": "duplicate", "message_id": message.id.0 })),
        )
            .into_response(),
        Some(IngestOutcome::UnknownRecipient(_)) => email_status("user not found"),
        None => email_status("error"),
    }
}

/// `None` when the multipart stream is malformed. File parts are ignored.
async fn multipart_payload(request: Request) -> Option<EmailPayload> {
    let mut multipart = Multipart::from_request(request, &()).await.ok()?;
    let mut payload = EmailPayload::default();

    while let Some(field) = multipart.next_field().await.ok()? {
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field.text().await.ok()?;
        payload.set_field(&name, value);
    }
    Some(payload)
}

async fn inbound_sms(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    form: Result<Form<Vec<(String, String)>>, FormRejection>,
) -> StatusCode {
    let correlation_id = correlation_id(&headers);
    let params = match form {
        Ok(Form(params)) => params,
        Err(rejection) => {
            warn!(
                event_name = "webhook.sms.invalid_form",
                correlation_id,
                error = %rejection,
                "sms webhook body is not a form"
            );
            Vec::new()
        }
    };

    match state.config.sms.auth_token.as_ref() {
        Some(auth_token) => {
            let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
            let origin = RequestOrigin {
                forwarded_proto: header("x-forwarded-proto"),
                forwarded_host: header("x-forwarded-host"),
                host: header("host"),
                path_and_query: uri.path_and_query().map_or(uri.path(), |value| value.as_str()),
            };
            let url = signed_url(state.config.sms.webhook_url.as_deref(), &origin);
            let provided = header(SIGNATURE_HEADER).unwrap_or_default();

            if let Err(error) = verify_signature(auth_token.expose_secret(), &url, &params, provided) {
                warn!(
                    event_name = "webhook.sms.signature_rejected",
                    correlation_id,
                    url = %url,
                    signature_present = !provided.is_empty(),
                    error = %error,
                    "sms webhook signature did not verify"
                );
                return StatusCode::UNAUTHORIZED;
            }
        }
        None => {
            warn!(
                event_name = "webhook.sms.signature_skipped",
                correlation_id,
                "sms auth token not configured; accepting unsigned webhook"
            );
        }
    }

    match normalize_sms(&SmsPayload::from_params(&params)) {
        Ok(inbound) => {
            ingest(&state, inbound, &correlation_id).await;
        }
        Err(error) => {
            warn!(
                event_name = "webhook.sms.malformed",
                correlation_id,
                error = %error,
                "sms webhook dropped"
            );
        }
    }
    StatusCode::OK
}

/// Errors are logged and swallowed; the caller always acknowledges.
async fn ingest(
    state: &AppState,
    inbound: InboundMessage,
    correlation_id: &str,
) -> Option<IngestOutcome> {
    let channel = inbound.channel.as_str();
    match state.ingestor.ingest(inbound, Utc::now(), correlation_id).await {
        Ok(outcome) => {
            if let IngestOutcome::Stored { message, thread_created } = &outcome {
                info!(
                    event_name = "webhook.inbound.accepted",
                    correlation_id,
                    channel,
                    message_id = %message.id.0,
                    thread_created,
                    "inbound message accepted"
                );
            }
            Some(outcome)
        }
        Err(error) => {
            error!(
                event_name = "webhook.inbound.failed",
                correlation_id,
                channel,
                error = %error,
                "inbound message could not be stored"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use haggle_core::channels::sms::compute_signature;
    use haggle_core::config::AppConfig;
    use secrecy::SecretString;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::test_support::{harness, harness_with_config, insert_buyer, read_json, send, Generation};

    const EMAIL_FORM: &str = "recipient=b-1%40inbox.haggle.test\
        &from=Sales+%3Csales%40bayhonda.test%3E\
        &subject=Accord\
        &stripped-text=We+can+do+%2429%2C000\
        &Message-Id=%3Cabc%40bayhonda.test%3E";

    const SMS_FORM: &str =
        "To=%2B14155550100&From=%2B16505550199&Body=Still+available%3F&MessageSid=SM1";
    const SMS_URL: &str = "https://haggle.test/api/v1/webhooks/sms/inbound";

    fn sms_params() -> Vec<(String, String)> {
        [("To", "+14155550100"), ("From", "+16505550199"), ("Body", "Still available?"), ("MessageSid", "SM1")]
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn post(uri: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", content_type)
            .body(body.into())
            .expect("request")
    }

    async fn call(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
        read_json(router.clone().oneshot(request).await.expect("response")).await
    }

    fn signed_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.sms.auth_token = Some(SecretString::from("secret".to_string()));
        config.sms.webhook_url = Some(SMS_URL.to_string());
        config
    }

    #[tokio::test]
    async fn email_form_is_stored_once() {
        let harness = harness(Generation::Reply("ok")).await;
        insert_buyer(&harness.pool, "B-1", None).await;
        let form = "application/x-www-form-urlencoded";

        let (status, first) =
            call(&harness.router, post("/api/v1/webhooks/email/inbound", form, EMAIL_FORM)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["status"], "ok");

        let (status, second) =
            call(&harness.router, post("/api/v1/webhooks/email/inbound", form, EMAIL_FORM)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["status"], "duplicate");
        assert_eq!(second["message_id"], first["message_id"]);

        let (_, inbox) = send(&harness.router, "GET", "/api/v1/inbox", Some("B-1"), None).await;
        assert_eq!(inbox["total"], 1);
        assert_eq!(inbox["messages"][0]["content"], "We can do $29,000");
        assert_eq!(inbox["messages"][0]["subject"], "Accord");
    }

    #[tokio::test]
    async fn email_for_unknown_inbox_is_acknowledged() {
        let harness = harness(Generation::Reply("ok")).await;

        let (status, body) = call(
            &harness.router,
            post("/api/v1/webhooks/email/inbound", "application/x-www-form-urlencoded", EMAIL_FORM),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "user not found");
    }

    #[tokio::test]
    async fn email_multipart_is_accepted() {
        let harness = harness(Generation::Reply("ok")).await;
        insert_buyer(&harness.pool, "B-1", None).await;
        let body = [
            ("recipient", "b-1@inbox.haggle.test"),
            ("sender", "sales@bayhonda.test"),
            ("subject", "Accord"),
            ("body-plain", "Final offer $28,900"),
            ("Message-Id", "<mp-1@bayhonda.test>"),
        ]
        .iter()
        .map(|(name, value)| {
            format!("--XYZ\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
        })
        .collect::<String>()
            + "--XYZ--\r\n";

        let (status, reply) = call(
            &harness.router,
            post("/api/v1/webhooks/email/inbound", "multipart/form-data; boundary=XYZ", body),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["status"], "ok");
    }

    #[tokio::test]
    async fn malformed_email_bodies() {
        let harness = harness(Generation::Reply("ok")).await;

        let (status, body) = call(
            &harness.router,
            post("/api/v1/webhooks/email/inbound", "multipart/form-data", "garbage"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "skipped - malformed multipart data");

        let (status, body) = call(
            &harness.router,
            post("/api/v1/webhooks/email/inbound", "application/json", "{}"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid form data");
    }

    #[tokio::test]
    async fn signed_sms_opens_a_thread() {
        let harness = harness_with_config(signed_config(), Generation::Reply("ok")).await;
        insert_buyer(&harness.pool, "B-1", Some("+14155550100")).await;
        let signature = compute_signature("secret", SMS_URL, &sms_params()).expect("signature");

        let mut request = post("/api/v1/webhooks/sms/inbound", "application/x-www-form-urlencoded", SMS_FORM);
        request.headers_mut().insert("x-twilio-signature", signature.parse().expect("header"));
        let (status, body) = call(&harness.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_null());

        let (_, threads) = send(&harness.router, "GET", "/api/v1/threads", Some("B-1"), None).await;
        assert_eq!(threads.as_array().map(Vec::len), Some(1));
        assert_eq!(threads[0]["display_name"], "+16505550199");
        assert_eq!(threads[0]["unread_count"], 1);
    }

    #[tokio::test]
    async fn sms_with_bad_or_missing_signature_is_rejected() {
        let harness = harness_with_config(signed_config(), Generation::Reply("ok")).await;
        insert_buyer(&harness.pool, "B-1", Some("+14155550100")).await;

        let mut forged = post("/api/v1/webhooks/sms/inbound", "application/x-www-form-urlencoded", SMS_FORM);
        let wrong = compute_signature("other-secret", SMS_URL, &sms_params()).expect("signature");
        forged.headers_mut().insert("x-twilio-signature", wrong.parse().expect("header"));
        let (status, _) = call(&harness.router, forged).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let unsigned = post("/api/v1/webhooks/sms/inbound", "application/x-www-form-urlencoded", SMS_FORM);
        let (status, _) = call(&harness.router, unsigned).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, threads) = send(&harness.router, "GET", "/api/v1/threads", Some("B-1"), None).await;
        assert_eq!(threads.as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn unsigned_sms_is_accepted_without_a_token() {
        let harness = harness(Generation::Reply("ok")).await;

        let (status, body) = call(
            &harness.router,
            post("/api/v1/webhooks/sms/inbound", "application/x-www-form-urlencoded", SMS_FORM),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_null());
    }
}
