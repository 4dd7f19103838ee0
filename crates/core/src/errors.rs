use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("no buyer registered for recipient `{0}`")]
    UnknownRecipient(String),
    #[error("external message `{0}` was already processed")]
    DuplicateDelivery(String),
    #[error("webhook signature is invalid")]
    SignatureInvalid,
    #[error("thread not found")]
    ThreadNotFound,
    #[error("message not found")]
    MessageNotFound,
    #[error("offer not found")]
    OfferNotFound,
    #[error("response generation failed: {0}")]
    GenerationFailed(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl DomainError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedPayload(_) => "malformed_payload",
            Self::UnknownRecipient(_) => "unknown_recipient",
            Self::DuplicateDelivery(_) => "duplicate_delivery",
            Self::SignatureInvalid => "signature_invalid",
            Self::ThreadNotFound => "thread_not_found",
            Self::MessageNotFound => "message_not_found",
            Self::OfferNotFound => "offer_not_found",
            Self::GenerationFailed(_) => "generation_failed",
            Self::Validation(_) => "validation_error",
        }
    }

    /// Webhook senders treat any non-2xx as "retry"; only auth failures are surfaced.
    pub fn acknowledged_by_webhook(&self) -> bool {
        !matches!(self, Self::SignatureInvalid)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Domain(error) => error.kind(),
            Self::Persistence(_) => "persistence_error",
            Self::Integration(_) => "integration_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::UpstreamFailed { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { kind: &'static str, message: String, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { kind: &'static str, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { kind: &'static str, message: String, correlation_id: String },
    #[error("upstream failed: {message}")]
    UpstreamFailed { kind: &'static str, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { kind: &'static str, message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { kind: &'static str, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest { kind, .. }
            | Self::Unauthorized { kind, .. }
            | Self::NotFound { kind, .. }
            | Self::UpstreamFailed { kind, .. }
            | Self::ServiceUnavailable { kind, .. }
            | Self::Internal { kind, .. } => *kind,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::UpstreamFailed { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    /// Message safe to return to API callers.
    pub fn user_message(&self) -> String {
        match self {
            Self::BadRequest { message, .. }
            | Self::Unauthorized { message, .. }
            | Self::NotFound { message, .. } => message.clone(),
            Self::UpstreamFailed { .. } => {
                "The assistant could not produce a reply. Please retry shortly.".to_string()
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly.".to_string()
            }
            Self::Internal { .. } => "An unexpected internal error occurred.".to_string(),
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let kind = value.kind();
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(
                error @ (DomainError::MalformedPayload(_)
                | DomainError::Validation(_)
                | DomainError::DuplicateDelivery(_)),
            ) => Self::BadRequest { kind, message: error.to_string(), correlation_id },
            ApplicationError::Domain(error @ DomainError::SignatureInvalid) => {
                Self::Unauthorized { kind, message: error.to_string(), correlation_id }
            }
            ApplicationError::Domain(
                error @ (DomainError::ThreadNotFound
                | DomainError::MessageNotFound
                | DomainError::OfferNotFound
                | DomainError::UnknownRecipient(_)),
            ) => Self::NotFound { kind, message: error.to_string(), correlation_id },
            ApplicationError::Domain(DomainError::GenerationFailed(message)) => {
                Self::UpstreamFailed { kind, message, correlation_id }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { kind, message, correlation_id }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { kind, message, correlation_id }
            }
        }
    }
}
