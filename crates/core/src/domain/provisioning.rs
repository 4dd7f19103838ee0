use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::buyer::BuyerId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProvisioningTaskId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningKind {
    PhoneNumber,
}

impl ProvisioningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhoneNumber => "phone_number",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "phone_number" => Some(Self::PhoneNumber),
            _ => None,
        }
    }

    /// One live task per (kind, buyer); re-enqueueing resolves to the same row.
    pub fn idempotency_key(&self, buyer_id: &BuyerId) -> IdempotencyKey {
        IdempotencyKey(format!("{}:{}", self.as_str(), buyer_id.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningTaskState {
    Queued,
    Running,
    RetryableFailed,
    FailedTerminal,
    Completed,
}

impl ProvisioningTaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::RetryableFailed => "retryable_failed",
            Self::FailedTerminal => "failed_terminal",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "retryable_failed" => Some(Self::RetryableFailed),
            "failed_terminal" => Some(Self::FailedTerminal),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::FailedTerminal)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningTask {
    pub id: ProvisioningTaskId,
    pub buyer_id: BuyerId,
    pub kind: ProvisioningKind,
    pub payload_json: String,
    pub idempotency_key: IdempotencyKey,
    pub state: ProvisioningTaskState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub available_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<String>,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProvisioningTransition {
    pub task_id: ProvisioningTaskId,
    pub from_state: ProvisioningTaskState,
    pub to_state: ProvisioningTaskState,
    pub reason: &'static str,
    pub state_version: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Payload of a `phone_number` task.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneNumberRequest {
    /// Preferred area code; the configured default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_code: Option<String>,
}

impl PhoneNumberRequest {
    pub fn to_payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_payload(payload: &str) -> Result<Self, DomainError> {
        serde_json::from_str(payload)
            .map_err(|error| DomainError::MalformedPayload(format!("phone number task: {error}")))
    }
}
