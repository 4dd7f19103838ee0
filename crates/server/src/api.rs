//! Buyer-facing JSON API, mounted under `/api/v1`.
//!
//! The upstream auth gateway injects the authenticated buyer id as the
//! `x-buyer-id` header; every route here is scoped to that buyer.

use std::str::FromStr;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use haggle_channels::{DispatchError, DispatchOutcome};
use haggle_core::context::{assemble, ContextInput, HISTORY_LIMIT, OFFER_LIMIT};
use haggle_core::domain::buyer::{Buyer, BuyerId, VehiclePreferences};
use haggle_core::domain::message::{Message, MessageId, MessagePage, PageRequest, Sender};
use haggle_core::domain::offer::{OfferId, SellerOffer, TrackedOffer};
use haggle_core::domain::provisioning::{PhoneNumberRequest, ProvisioningKind, ProvisioningTask};
use haggle_core::domain::thread::{SellerType, Thread, ThreadId, ThreadSummary};
use haggle_core::channels::phone::is_valid_area_code;
use haggle_core::errors::{ApplicationError, DomainError, InterfaceError};
use haggle_core::pricing::{estimate, PriceEstimate};
use haggle_db::{AssignOutcome, RepositoryError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bootstrap::AppState;
use crate::{health, webhooks};

pub const BUYER_HEADER: &str = "x-buyer-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_BUYER_ID_LEN: usize = 128;
const DASHBOARD_INBOX_LIMIT: u32 = 50;
const OFFER_LIST_LIMIT: u32 = 200;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/threads", get(list_threads).post(create_thread))
        .route("/threads/{id}", get(get_thread).put(update_thread).delete(archive_thread))
        .route("/threads/{id}/read", post(mark_thread_read))
        .route("/threads/{id}/messages", get(list_thread_messages).post(create_thread_message))
        .route("/threads/{id}/offers", post(create_offer))
        .route("/offers", get(list_offers))
        .route("/offers/{id}", delete(delete_offer))
        .route("/inbox", get(list_inbox))
        .route("/inbox/{id}", delete(archive_inbox_item))
        .route("/inbox/{id}/assign", post(assign_inbox_item))
        .route("/messages/{id}/email-reply", post(reply_by_email))
        .route("/messages/{id}/sms-reply", post(reply_by_sms))
        .route("/dashboard", get(dashboard))
        .route("/sms/phone-number", get(phone_number))
        .route("/preferences", put(update_preferences))
        .route("/pricing/estimate", get(pricing_estimate))
        .route("/health", get(health::health))
        .merge(webhooks::routes());

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health::health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors and request context
// ---------------------------------------------------------------------------

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub error: String,
    pub correlation_id: String,
}

impl ApiError {
    pub fn new(error: impl Into<ApplicationError>, correlation_id: &str) -> Self {
        Self(error.into().into_interface(correlation_id))
    }

    fn unauthorized(kind: &'static str, message: &str, correlation_id: &str) -> Self {
        Self(InterfaceError::Unauthorized {
            kind,
            message: message.to_string(),
            correlation_id: correlation_id.to_string(),
        })
    }

    fn not_found(kind: &'static str, message: &str, correlation_id: &str) -> Self {
        Self(InterfaceError::NotFound {
            kind,
            message: message.to_string(),
            correlation_id: correlation_id.to_string(),
        })
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::UpstreamFailed { .. } => StatusCode::BAD_GATEWAY,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            kind: self.0.kind(),
            error: self.0.user_message(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

trait StorageResultExt<T> {
    fn or_storage(self, correlation_id: &str) -> ApiResult<T>;
}

impl<T> StorageResultExt<T> for Result<T, RepositoryError> {
    fn or_storage(self, correlation_id: &str) -> ApiResult<T> {
        self.map_err(|error| storage_error(error, correlation_id))
    }
}

fn storage_error(error: RepositoryError, correlation_id: &str) -> ApiError {
    match error {
        RepositoryError::Conflict(message) => {
            ApiError::new(DomainError::Validation(message), correlation_id)
        }
        other => {
            error!(
                event_name = "api.storage.failed",
                correlation_id,
                error = %other,
                "storage call failed"
            );
            ApiError::new(ApplicationError::Persistence(other.to_string()), correlation_id)
        }
    }
}

fn dispatch_error(error: DispatchError, correlation_id: &str) -> ApiError {
    match error {
        DispatchError::Domain(error) => ApiError::new(error, correlation_id),
        DispatchError::Repository(error) => storage_error(error, correlation_id),
        DispatchError::NotConfigured(channel) => ApiError::new(
            ApplicationError::Configuration(format!("{channel} sending is not configured")),
            correlation_id,
        ),
        other @ (DispatchError::Http(_)
        | DispatchError::Provider { .. }
        | DispatchError::Parse(_)) => {
            ApiError::new(ApplicationError::Integration(other.to_string()), correlation_id)
        }
    }
}

/// Caller-supplied request id, or a fresh one.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_BUYER_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Authenticated buyer plus the request's correlation id.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub buyer_id: BuyerId,
    pub correlation_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = correlation_id(&parts.headers);
        let buyer_id = parts
            .headers
            .get(BUYER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| is_well_formed_buyer_id(value))
            .map(|value| BuyerId(value.to_string()));

        match buyer_id {
            Some(buyer_id) => Ok(Self { buyer_id, correlation_id }),
            None => Err(ApiError::unauthorized(
                "missing_buyer_identity",
                "x-buyer-id header is missing or malformed",
                &correlation_id,
            )),
        }
    }
}

fn is_well_formed_buyer_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_BUYER_ID_LEN
        && value.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

async fn require_buyer(state: &AppState, ctx: &RequestContext) -> ApiResult<Buyer> {
    state.buyers.find_by_id(&ctx.buyer_id).await.or_storage(&ctx.correlation_id)?.ok_or_else(
        || ApiError::unauthorized("unknown_buyer", "buyer is not registered", &ctx.correlation_id),
    )
}

async fn require_thread(state: &AppState, ctx: &RequestContext, id: &ThreadId) -> ApiResult<Thread> {
    state
        .threads
        .find_active(&ctx.buyer_id, id)
        .await
        .or_storage(&ctx.correlation_id)?
        .ok_or_else(|| ApiError::new(DomainError::ThreadNotFound, &ctx.correlation_id))
}

fn required_text(value: &str, field: &str, correlation_id: &str) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::new(DomainError::Validation(format!("{field} is required")), correlation_id));
    }
    Ok(trimmed.to_string())
}

fn parse_seller_type(raw: Option<&str>, correlation_id: &str) -> ApiResult<Option<SellerType>> {
    raw.map(|value| {
        SellerType::parse(value).ok_or_else(|| {
            ApiError::new(
                DomainError::Validation(format!(
                    "unsupported seller_type `{value}` (expected private|dealership|other)"
                )),
                correlation_id,
            )
        })
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Response views
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ThreadView {
    #[serde(flatten)]
    pub thread: Thread,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
}

impl ThreadView {
    fn detail(thread: Thread) -> Self {
        Self {
            display_name: thread.display_name(),
            thread,
            unread_count: None,
            last_message_preview: None,
        }
    }
}

impl From<ThreadSummary> for ThreadView {
    fn from(summary: ThreadSummary) -> Self {
        Self {
            display_name: summary.thread.display_name(),
            thread: summary.thread,
            unread_count: Some(summary.unread_count),
            last_message_preview: summary.last_message_preview,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PageView {
    pub messages: Vec<Message>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

impl From<MessagePage> for PageView {
    fn from(page: MessagePage) -> Self {
        Self {
            has_more: page.has_more(),
            messages: page.messages,
            total: page.total,
            limit: page.limit,
            offset: page.offset,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OfferView {
    #[serde(flatten)]
    pub offer: TrackedOffer,
    pub seller_name: String,
    pub seller_type: Option<SellerType>,
}

impl From<SellerOffer> for OfferView {
    fn from(entry: SellerOffer) -> Self {
        Self {
            seller_name: entry.seller_label().to_string(),
            seller_type: entry.seller_type,
            offer: entry.offer,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl PageQuery {
    fn page(&self) -> PageRequest {
        PageRequest::clamped(self.limit, self.offset)
    }
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateThreadRequest {
    pub seller_name: String,
    #[serde(default)]
    pub seller_type: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateThreadRequest {
    #[serde(default)]
    pub seller_name: Option<String>,
    #[serde(default)]
    pub seller_type: Option<String>,
    /// An empty string clears the bound phone.
    #[serde(default)]
    pub phone: Option<String>,
}

async fn list_threads(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> ApiResult<Json<Vec<ThreadView>>> {
    let summaries =
        state.threads.list_summaries(&ctx.buyer_id).await.or_storage(&ctx.correlation_id)?;
    Ok(Json(summaries.into_iter().map(ThreadView::from).collect()))
}

async fn create_thread(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(request): Json<CreateThreadRequest>,
) -> ApiResult<(StatusCode, Json<ThreadView>)> {
    let seller_type = parse_seller_type(request.seller_type.as_deref(), &ctx.correlation_id)?
        .unwrap_or(SellerType::Dealership);
    let thread = Thread::new(
        ThreadId(Uuid::new_v4().to_string()),
        ctx.buyer_id.clone(),
        request.seller_name,
        seller_type,
        request.phone,
        Utc::now(),
    )
    .map_err(|error| ApiError::new(error, &ctx.correlation_id))?;

    state.threads.create(thread.clone()).await.or_storage(&ctx.correlation_id)?;
    info!(
        event_name = "api.thread.created",
        correlation_id = %ctx.correlation_id,
        buyer_id = %ctx.buyer_id.0,
        thread_id = %thread.id.0,
        "thread created"
    );
    Ok((StatusCode::CREATED, Json(ThreadView::detail(thread))))
}

async fn get_thread(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<Json<ThreadView>> {
    let thread = require_thread(&state, &ctx, &ThreadId(id)).await?;
    Ok(Json(ThreadView::detail(thread)))
}

async fn update_thread(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(request): Json<UpdateThreadRequest>,
) -> ApiResult<Json<ThreadView>> {
    let mut thread = require_thread(&state, &ctx, &ThreadId(id)).await?;

    if let Some(seller_name) = request.seller_name.as_deref() {
        thread.seller_name = required_text(seller_name, "seller_name", &ctx.correlation_id)?;
    }
    if let Some(seller_type) = parse_seller_type(request.seller_type.as_deref(), &ctx.correlation_id)? {
        thread.seller_type = seller_type;
    }
    if let Some(phone) = request.phone {
        thread.phone = Some(phone.trim().to_string()).filter(|phone| !phone.is_empty());
    }

    let now = Utc::now();
    if !state.threads.update_details(&thread, now).await.or_storage(&ctx.correlation_id)? {
        return Err(ApiError::new(DomainError::ThreadNotFound, &ctx.correlation_id));
    }
    thread.updated_at = now;
    Ok(Json(ThreadView::detail(thread)))
}

async fn archive_thread(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let thread_id = ThreadId(id);
    if !state.threads.archive(&ctx.buyer_id, &thread_id, Utc::now()).await.or_storage(&ctx.correlation_id)? {
        return Err(ApiError::new(DomainError::ThreadNotFound, &ctx.correlation_id));
    }
    info!(
        event_name = "api.thread.archived",
        correlation_id = %ctx.correlation_id,
        buyer_id = %ctx.buyer_id.0,
        thread_id = %thread_id.0,
        "thread archived"
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_thread_read(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if !state
        .threads
        .mark_read(&ctx.buyer_id, &ThreadId(id), Utc::now())
        .await
        .or_storage(&ctx.correlation_id)?
    {
        return Err(ApiError::new(DomainError::ThreadNotFound, &ctx.correlation_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
    /// `user` (default) asks the assistant for a reply; `seller` records a seller message.
    #[serde(default)]
    pub sender: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerationFailure {
    pub kind: &'static str,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub message: Message,
    pub agent_message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<GenerationFailure>,
}

async fn list_thread_messages(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<PageView>> {
    let thread = require_thread(&state, &ctx, &ThreadId(id)).await?;
    let page = state
        .messages
        .page_for_thread(&thread.id, query.page())
        .await
        .or_storage(&ctx.correlation_id)?;
    Ok(Json(page.into()))
}

async fn create_thread_message(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(request): Json<CreateMessageRequest>,
) -> ApiResult<(StatusCode, Json<ConversationResponse>)> {
    let content = required_text(&request.content, "content", &ctx.correlation_id)?;
    let sender = match request.sender.as_deref().map(Sender::parse) {
        None | Some(Some(Sender::User)) => Sender::User,
        Some(Some(Sender::Seller)) => Sender::Seller,
        Some(Some(Sender::Agent)) | Some(None) => {
            return Err(ApiError::new(
                DomainError::Validation("sender must be user or seller".to_string()),
                &ctx.correlation_id,
            ));
        }
    };

    let thread = require_thread(&state, &ctx, &ThreadId(id)).await?;
    let history_desc = match sender {
        Sender::User => state
            .messages
            .recent_for_thread(&thread.id, HISTORY_LIMIT)
            .await
            .or_storage(&ctx.correlation_id)?,
        Sender::Seller | Sender::Agent => Vec::new(),
    };

    let message = append_chat(&state, &ctx, &thread, sender, &content).await?;
    info!(
        event_name = "api.message.created",
        correlation_id = %ctx.correlation_id,
        buyer_id = %ctx.buyer_id.0,
        thread_id = %thread.id.0,
        sender = sender.as_str(),
        "message stored"
    );

    if sender != Sender::User {
        let response = ConversationResponse { message, agent_message: None, generation_error: None };
        return Ok((StatusCode::CREATED, Json(response)));
    }

    let buyer = require_buyer(&state, &ctx).await?;
    let offers = state
        .offers
        .list_for_buyer(&ctx.buyer_id, OFFER_LIMIT)
        .await
        .or_storage(&ctx.correlation_id)?;
    let context = assemble(ContextInput {
        thread: &thread,
        preferences: &buyer.preferences,
        pricing: &state.pricing,
        history_desc,
        offers: &offers,
        user_text: &content,
    });

    let generated = match state.agent.respond(&context, &ctx.correlation_id).await {
        Ok(reply) => append_chat(&state, &ctx, &thread, Sender::Agent, &reply).await.map_err(|error| {
            // The user turn is already committed, so this reports as a failed generation.
            warn!(
                event_name = "api.message.agent_reply_not_stored",
                correlation_id = %ctx.correlation_id,
                thread_id = %thread.id.0,
                kind = error.0.kind(),
                error = %error.0,
                "agent reply generated but could not be stored"
            );
            DomainError::GenerationFailed(format!("agent reply could not be stored: {}", error.0))
        }),
        Err(error) => Err(error),
    };

    let response = match generated {
        Ok(agent_message) => {
            ConversationResponse { message, agent_message: Some(agent_message), generation_error: None }
        }
        Err(error) => ConversationResponse {
            message,
            agent_message: None,
            generation_error: Some(GenerationFailure {
                kind: error.kind(),
                error: ApiError::new(error, &ctx.correlation_id).0.user_message(),
            }),
        },
    };
    Ok((StatusCode::CREATED, Json(response)))
}

async fn append_chat(
    state: &AppState,
    ctx: &RequestContext,
    thread: &Thread,
    sender: Sender,
    content: &str,
) -> ApiResult<Message> {
    let message = Message::chat(
        MessageId(Uuid::new_v4().to_string()),
        ctx.buyer_id.clone(),
        thread.id.clone(),
        sender,
        content,
        Utc::now(),
    );
    state
        .messages
        .append(message)
        .await
        .or_storage(&ctx.correlation_id)?
        .ok_or_else(|| ApiError::new(DomainError::ThreadNotFound, &ctx.correlation_id))
}

// ---------------------------------------------------------------------------
// Offers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateOfferRequest {
    pub offer_text: String,
    #[serde(default)]
    pub message_id: Option<String>,
}

async fn create_offer(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(request): Json<CreateOfferRequest>,
) -> ApiResult<(StatusCode, Json<OfferView>)> {
    let thread = require_thread(&state, &ctx, &ThreadId(id)).await?;
    let offer = TrackedOffer::new(
        OfferId(Uuid::new_v4().to_string()),
        thread.id.clone(),
        request.message_id.map(MessageId).filter(|id| !id.0.trim().is_empty()),
        &request.offer_text,
        Utc::now(),
    )
    .map_err(|error| ApiError::new(error, &ctx.correlation_id))?;

    state.offers.create(&ctx.buyer_id, offer.clone()).await.or_storage(&ctx.correlation_id)?;
    info!(
        event_name = "api.offer.tracked",
        correlation_id = %ctx.correlation_id,
        buyer_id = %ctx.buyer_id.0,
        thread_id = %thread.id.0,
        offer_id = %offer.id.0,
        "offer tracked"
    );

    let view = OfferView {
        seller_name: thread.display_name(),
        seller_type: Some(thread.seller_type),
        offer,
    };
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_offers(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> ApiResult<Json<Vec<OfferView>>> {
    let offers = state
        .offers
        .list_for_buyer(&ctx.buyer_id, OFFER_LIST_LIMIT)
        .await
        .or_storage(&ctx.correlation_id)?;
    Ok(Json(offers.into_iter().map(OfferView::from).collect()))
}

async fn delete_offer(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if !state.offers.delete(&ctx.buyer_id, &OfferId(id)).await.or_storage(&ctx.correlation_id)? {
        return Err(ApiError::new(DomainError::OfferNotFound, &ctx.correlation_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub thread_id: String,
}

async fn list_inbox(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<PageView>> {
    let page =
        state.messages.inbox(&ctx.buyer_id, query.page()).await.or_storage(&ctx.correlation_id)?;
    Ok(Json(page.into()))
}

async fn assign_inbox_item(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<Json<Message>> {
    let outcome = state
        .messages
        .assign(&ctx.buyer_id, &MessageId(id), &ThreadId(request.thread_id), Utc::now())
        .await
        .or_storage(&ctx.correlation_id)?;

    match outcome {
        AssignOutcome::Assigned(message) => {
            info!(
                event_name = "api.inbox.assigned",
                correlation_id = %ctx.correlation_id,
                buyer_id = %ctx.buyer_id.0,
                message_id = %message.id.0,
                "inbox message assigned"
            );
            Ok(Json(message))
        }
        AssignOutcome::MessageNotFound => {
            Err(ApiError::new(DomainError::MessageNotFound, &ctx.correlation_id))
        }
        AssignOutcome::ThreadNotFound => {
            Err(ApiError::new(DomainError::ThreadNotFound, &ctx.correlation_id))
        }
    }
}

async fn archive_inbox_item(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if !state
        .messages
        .archive_inbox_item(&ctx.buyer_id, &MessageId(id))
        .await
        .or_storage(&ctx.correlation_id)?
    {
        return Err(ApiError::new(DomainError::MessageNotFound, &ctx.correlation_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Outbound replies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ReplyResponse {
    pub status: &'static str,
    pub provider_message_id: String,
    pub message: Option<Message>,
}

impl From<DispatchOutcome> for ReplyResponse {
    fn from(outcome: DispatchOutcome) -> Self {
        Self {
            status: "sent",
            provider_message_id: outcome.provider_message_id,
            message: outcome.stored,
        }
    }
}

async fn reply_by_email(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(request): Json<ReplyRequest>,
) -> ApiResult<Json<ReplyResponse>> {
    let outcome = state
        .dispatcher
        .reply_by_email(&ctx.buyer_id, &MessageId(id), &request.content, Utc::now(), &ctx.correlation_id)
        .await
        .map_err(|error| dispatch_error(error, &ctx.correlation_id))?;
    Ok(Json(outcome.into()))
}

async fn reply_by_sms(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(request): Json<ReplyRequest>,
) -> ApiResult<Json<ReplyResponse>> {
    let outcome = state
        .dispatcher
        .reply_by_sms(&ctx.buyer_id, &MessageId(id), &request.content, Utc::now(), &ctx.correlation_id)
        .await
        .map_err(|error| dispatch_error(error, &ctx.correlation_id))?;
    Ok(Json(outcome.into()))
}

// ---------------------------------------------------------------------------
// Dashboard, buyer settings, pricing
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub threads: Vec<ThreadView>,
    pub inbox: PageView,
    pub offers: Vec<OfferView>,
}

async fn dashboard(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> ApiResult<Json<DashboardResponse>> {
    let inbox_page = PageRequest { limit: DASHBOARD_INBOX_LIMIT, offset: 0 };
    let (threads, inbox, offers) = tokio::join!(
        state.threads.list_summaries(&ctx.buyer_id),
        state.messages.inbox(&ctx.buyer_id, inbox_page),
        state.offers.list_for_buyer(&ctx.buyer_id, OFFER_LIST_LIMIT),
    );

    Ok(Json(DashboardResponse {
        threads: threads
            .or_storage(&ctx.correlation_id)?
            .into_iter()
            .map(ThreadView::from)
            .collect(),
        inbox: inbox.or_storage(&ctx.correlation_id)?.into(),
        offers: offers.or_storage(&ctx.correlation_id)?.into_iter().map(OfferView::from).collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct PhoneNumberResponse {
    pub phone_number: String,
}

async fn phone_number(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> ApiResult<Json<PhoneNumberResponse>> {
    let buyer = require_buyer(&state, &ctx).await?;
    match buyer.phone_number.filter(|number| !number.is_empty()) {
        Some(phone_number) => Ok(Json(PhoneNumberResponse { phone_number })),
        None => Err(ApiError::not_found(
            "phone_number_not_found",
            "no sms number has been allocated yet",
            &ctx.correlation_id,
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct PreferencesRequest {
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub body_type: Option<String>,
    #[serde(default)]
    pub msrp: Option<Decimal>,
    #[serde(default)]
    pub zip_code: Option<String>,
    /// Preferred area code for the buyer's SMS number.
    #[serde(default)]
    pub area_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProvisioningStatus {
    pub task_id: String,
    pub state: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PreferencesResponse {
    pub buyer: Buyer,
    pub provisioning: Option<ProvisioningStatus>,
}

async fn update_preferences(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(request): Json<PreferencesRequest>,
) -> ApiResult<Json<PreferencesResponse>> {
    let preferences = VehiclePreferences {
        year: request.year,
        make: trimmed(request.make),
        model: trimmed(request.model),
        body_type: trimmed(request.body_type),
        msrp: request.msrp,
    };
    preferences.validate().map_err(|error| ApiError::new(error, &ctx.correlation_id))?;

    let area_code = trimmed(request.area_code);
    if let Some(code) = area_code.as_deref().filter(|code| !is_valid_area_code(code)) {
        return Err(ApiError::new(
            DomainError::Validation(format!("area_code `{code}` must be three digits")),
            &ctx.correlation_id,
        ));
    }

    let zip_code = trimmed(request.zip_code);
    let buyer = state
        .buyers
        .update_preferences(&ctx.buyer_id, &preferences, zip_code.as_deref(), Utc::now())
        .await
        .or_storage(&ctx.correlation_id)?
        .ok_or_else(|| {
            ApiError::unauthorized("unknown_buyer", "buyer is not registered", &ctx.correlation_id)
        })?;

    let provisioning = if needs_number(&state, &buyer) {
        let task = enqueue_phone_number(&state, &buyer, area_code, &ctx.correlation_id).await;
        task.map(|task| ProvisioningStatus { task_id: task.id.0, state: task.state.as_str() })
    } else {
        None
    };

    Ok(Json(PreferencesResponse { buyer, provisioning }))
}

fn needs_number(state: &AppState, buyer: &Buyer) -> bool {
    state.config.provisioning.enabled
        && buyer.phone_number.as_deref().map_or(true, |number| number.trim().is_empty())
}

/// Queue failures are logged, never surfaced; the preferences are already saved.
async fn enqueue_phone_number(
    state: &AppState,
    buyer: &Buyer,
    area_code: Option<String>,
    correlation_id: &str,
) -> Option<ProvisioningTask> {
    let task = state.provisioning_engine.create_task(
        buyer.id.clone(),
        ProvisioningKind::PhoneNumber,
        PhoneNumberRequest { area_code }.to_payload(),
        Utc::now(),
    );

    match state.provisioning.enqueue(task).await {
        Ok(task) => {
            info!(
                event_name = "api.provisioning.enqueued",
                correlation_id,
                buyer_id = %buyer.id.0,
                task_id = %task.id.0,
                state = task.state.as_str(),
                "phone number provisioning queued"
            );
            state.wake_provisioning();
            Some(task)
        }
        Err(error) => {
            warn!(
                event_name = "api.provisioning.enqueue_failed",
                correlation_id,
                buyer_id = %buyer.id.0,
                error = %error,
                "phone number provisioning could not be queued"
            );
            None
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

#[derive(Debug, Deserialize)]
pub struct PriceQuery {
    pub msrp: String,
    pub brand: String,
    #[serde(default)]
    pub body_type: Option<String>,
}

async fn pricing_estimate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PriceQuery>,
) -> ApiResult<Json<PriceEstimate>> {
    let correlation_id = correlation_id(&headers);
    let msrp = Decimal::from_str(query.msrp.trim()).map_err(|_| {
        ApiError::new(
            DomainError::Validation(format!("msrp `{}` is not a number", query.msrp)),
            &correlation_id,
        )
    })?;
    let brand = required_text(&query.brand, "brand", &correlation_id)?;

    Ok(Json(estimate(&state.pricing, msrp, &brand, query.body_type.as_deref().unwrap_or_default())))
}
