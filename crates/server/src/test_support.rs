use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use haggle_agent::{GenerationError, ResponseGenerator};
use haggle_channels::{DispatchError, EmailSender, SmsSender};
use haggle_core::config::AppConfig;
use haggle_core::context::NegotiationContext;
use haggle_core::domain::buyer::{Buyer, BuyerId, VehiclePreferences};
use haggle_core::outbound::{EmailReply, SmsReply};
use haggle_db::{connect_with_settings, migrations, BuyerRepository, DbPool, SqlBuyerRepository};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

use crate::api;
use crate::bootstrap::{AppState, Integrations};

pub enum Generation {
    Reply(&'static str),
    Fail,
    /// Archives every thread while the reply is being produced.
    ArchiveThenReply(&'static str),
}

struct ScriptedGenerator {
    generation: Generation,
    calls: Arc<AtomicUsize>,
    pool: DbPool,
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate(&self, _context: &NegotiationContext) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.generation {
            Generation::Reply(text) => Ok(text.to_string()),
            Generation::Fail => Err(GenerationError::Status { status: 529, body: "overloaded".to_string() }),
            Generation::ArchiveThenReply(text) => {
                sqlx::query("UPDATE thread SET status = 'archived', archived_at = updated_at")
                    .execute(&self.pool)
                    .await
                    .expect("archive threads");
                Ok(text.to_string())
            }
        }
    }

    fn provider(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Default)]
struct CountingSender {
    emails: AtomicUsize,
    texts: AtomicUsize,
}

#[async_trait]
impl EmailSender for CountingSender {
    async fn send_email(&self, _reply: &EmailReply) -> Result<String, DispatchError> {
        let sent = self.emails.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("email-{sent}"))
    }
}

#[async_trait]
impl SmsSender for CountingSender {
    async fn send_sms(&self, _reply: &SmsReply) -> Result<String, DispatchError> {
        let sent = self.texts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("SM{sent}"))
    }
}

pub struct Harness {
    pub state: AppState,
    pub router: Router,
    pub pool: DbPool,
    pub wakeups: mpsc::Receiver<()>,
    generator_calls: Arc<AtomicUsize>,
    sender: Arc<CountingSender>,
}

impl Harness {
    pub fn generator_calls(&self) -> usize {
        self.generator_calls.load(Ordering::SeqCst)
    }

    pub fn sent_emails(&self) -> usize {
        self.sender.emails.load(Ordering::SeqCst)
    }

    pub fn sent_texts(&self) -> usize {
        self.sender.texts.load(Ordering::SeqCst)
    }
}

pub async fn harness(generation: Generation) -> Harness {
    harness_with_config(AppConfig::default(), generation).await
}

pub async fn harness_with_config(config: AppConfig, generation: Generation) -> Harness {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");

    let generator_calls = Arc::new(AtomicUsize::new(0));
    let sender = Arc::new(CountingSender::default());
    let integrations = Integrations {
        generator: Arc::new(ScriptedGenerator {
            generation,
            calls: generator_calls.clone(),
            pool: pool.clone(),
        }),
        email: sender.clone(),
        sms: sender.clone(),
    };

    let (wakeup_tx, wakeups) = mpsc::channel(4);
    let state = AppState::new(config, pool.clone(), integrations, wakeup_tx);
    Harness {
        router: api::router(state.clone()),
        state,
        pool,
        wakeups,
        generator_calls,
        sender,
    }
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

/// Sends a JSON request and decodes the JSON reply (`Null` for empty bodies).
pub async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    buyer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(buyer) = buyer {
        request = request.header(api::BUYER_HEADER, buyer);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => request.body(Body::empty()).expect("request"),
    };

    let response = router.clone().oneshot(request).await.expect("response");
    read_json(response).await
}

pub async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    if bytes.is_empty() {
        return (status, Value::Null);
    }
    (status, serde_json::from_slice(&bytes).expect("json body"))
}
