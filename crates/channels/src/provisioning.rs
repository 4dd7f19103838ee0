//! SMS number allocation for buyers.
//!
//! Runs inside the provisioning worker. `PhoneProvisioner::provision` is safe
//! to re-run for the same task: the number is stored on the buyer right after
//! purchase, and a buyer that already has one short-circuits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use haggle_core::channels::phone::{format_e164, is_valid_area_code};
use haggle_core::config::SmsConfig;
use haggle_core::domain::provisioning::{PhoneNumberRequest, ProvisioningTask};
use haggle_core::errors::DomainError;
use haggle_db::{BuyerRepository, RepositoryError};

use crate::dispatch::UnconfiguredSender;

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("could not parse provider response: {0}")]
    Parse(String),
    #[error("no phone numbers available in area code {0}")]
    NoNumbersAvailable(String),
    #[error("buyer `{0}` not found")]
    BuyerNotFound(String),
    #[error("phone number provisioning is not configured")]
    NotConfigured,
}

impl ProvisionError {
    /// Transient failures go back on the queue with backoff; the rest fail the task.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Repository(_) | Self::NoNumbersAvailable(_) => true,
            Self::Provider { status, .. } => *status == 429 || *status >= 500,
            Self::Domain(_) | Self::Parse(_) | Self::BuyerNotFound(_) | Self::NotConfigured => {
                false
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurchasedNumber {
    pub sid: String,
    pub phone_number: String,
}

#[async_trait]
pub trait PhoneNumberProvider: Send + Sync {
    /// First SMS-capable local number in the area code, if any.
    async fn search_available(&self, area_code: &str) -> Result<Option<String>, ProvisionError>;
    async fn purchase(&self, phone_number: &str) -> Result<PurchasedNumber, ProvisionError>;
    async fn attach_to_messaging_service(&self, number_sid: &str) -> Result<(), ProvisionError>;
}

#[async_trait]
impl PhoneNumberProvider for UnconfiguredSender {
    async fn search_available(&self, _area_code: &str) -> Result<Option<String>, ProvisionError> {
        Err(ProvisionError::NotConfigured)
    }

    async fn purchase(&self, _phone_number: &str) -> Result<PurchasedNumber, ProvisionError> {
        Err(ProvisionError::NotConfigured)
    }

    async fn attach_to_messaging_service(&self, _number_sid: &str) -> Result<(), ProvisionError> {
        Err(ProvisionError::NotConfigured)
    }
}

pub fn number_provider(config: &SmsConfig) -> Result<Arc<dyn PhoneNumberProvider>, ProvisionError> {
    if !config.has_credentials() {
        return Ok(Arc::new(UnconfiguredSender));
    }
    Ok(Arc::new(TwilioNumberProvider::from_config(config)?))
}

pub struct TwilioNumberProvider {
    http_client: reqwest::Client,
    api_base_url: String,
    messaging_base_url: String,
    account_sid: String,
    auth_token: SecretString,
    messaging_service_sid: Option<String>,
}

impl TwilioNumberProvider {
    pub fn from_config(config: &SmsConfig) -> Result<Self, ProvisionError> {
        let (Some(account_sid), Some(auth_token)) =
            (config.account_sid.clone(), config.auth_token.clone())
        else {
            return Err(ProvisionError::NotConfigured);
        };

        Ok(Self {
            http_client: reqwest::Client::builder().timeout(PROVIDER_TIMEOUT).build()?,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            messaging_base_url: config.messaging_base_url.trim_end_matches('/').to_string(),
            account_sid,
            auth_token,
            messaging_service_sid: config
                .messaging_service_sid
                .clone()
                .filter(|sid| !sid.trim().is_empty()),
        })
    }

    fn account_url(&self, resource: &str) -> String {
        format!("{}/2010-04-01/Accounts/{}/{resource}", self.api_base_url, self.account_sid)
    }
}

#[async_trait]
impl PhoneNumberProvider for TwilioNumberProvider {
    async fn search_available(&self, area_code: &str) -> Result<Option<String>, ProvisionError> {
        let response = self
            .http_client
            .get(self.account_url("AvailablePhoneNumbers/US/Local.json"))
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .query(&[("AreaCode", area_code), ("SmsEnabled", "true"), ("PageSize", "1")])
            .send()
            .await?;

        let body = json_body(response).await?;
        Ok(body
            .get("available_phone_numbers")
            .and_then(Value::as_array)
            .and_then(|numbers| numbers.first())
            .and_then(|number| number.get("phone_number"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn purchase(&self, phone_number: &str) -> Result<PurchasedNumber, ProvisionError> {
        let response = self
            .http_client
            .post(self.account_url("IncomingPhoneNumbers.json"))
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&[("PhoneNumber", phone_number)])
            .send()
            .await?;

        let body = json_body(response).await?;
        Ok(PurchasedNumber {
            sid: string_field(&body, "sid")?,
            phone_number: string_field(&body, "phone_number")?,
        })
    }

    async fn attach_to_messaging_service(&self, number_sid: &str) -> Result<(), ProvisionError> {
        let Some(service_sid) = self.messaging_service_sid.as_deref() else {
            debug!(number_sid, "no messaging service configured; number left unattached");
            return Ok(());
        };

        let response = self
            .http_client
            .post(format!("{}/v1/Services/{service_sid}/PhoneNumbers", self.messaging_base_url))
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&[("PhoneNumberSid", number_sid)])
            .send()
            .await?;

        json_body(response).await.map(|_| ())
    }
}

async fn json_body(response: reqwest::Response) -> Result<Value, ProvisionError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProvisionError::Provider { status: status.as_u16(), body });
    }

    response.json::<Value>().await.map_err(|error| ProvisionError::Parse(error.to_string()))
}

fn string_field(body: &Value, field: &str) -> Result<String, ProvisionError> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProvisionError::Parse(format!("response is missing `{field}`")))
}

pub struct PhoneProvisioner {
    buyers: Arc<dyn BuyerRepository>,
    provider: Arc<dyn PhoneNumberProvider>,
    default_area_code: String,
}

impl PhoneProvisioner {
    pub fn new(
        buyers: Arc<dyn BuyerRepository>,
        provider: Arc<dyn PhoneNumberProvider>,
        default_area_code: impl Into<String>,
    ) -> Self {
        Self { buyers, provider, default_area_code: default_area_code.into() }
    }

    /// Returns the buyer's number, buying one only when none is stored yet.
    pub async fn provision(
        &self,
        task: &ProvisioningTask,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<String, ProvisionError> {
        let buyer = self
            .buyers
            .find_by_id(&task.buyer_id)
            .await?
            .ok_or_else(|| ProvisionError::BuyerNotFound(task.buyer_id.0.clone()))?;

        if let Some(existing) = buyer.phone_number.as_deref().filter(|number| !number.is_empty()) {
            info!(
                event_name = "provisioning.number.already_allocated",
                correlation_id,
                buyer_id = %buyer.id.0,
                "buyer already has an sms number"
            );
            return Ok(existing.to_string());
        }

        let request = PhoneNumberRequest::from_payload(&task.payload_json)?;
        let area_code = request
            .area_code
            .filter(|code| is_valid_area_code(code))
            .unwrap_or_else(|| self.default_area_code.clone());

        let candidate = self
            .provider
            .search_available(&area_code)
            .await?
            .ok_or_else(|| ProvisionError::NoNumbersAvailable(area_code.clone()))?;
        let purchased = self.provider.purchase(&candidate).await?;
        let phone_number = format_e164(&purchased.phone_number);

        if !self.buyers.set_phone_number(&buyer.id, &phone_number, now).await? {
            return Err(ProvisionError::BuyerNotFound(buyer.id.0.clone()));
        }

        if let Err(error) = self.provider.attach_to_messaging_service(&purchased.sid).await {
            warn!(
                event_name = "provisioning.number.attach_failed",
                correlation_id,
                buyer_id = %buyer.id.0,
                number_sid = %purchased.sid,
                error = %error,
                "purchased number could not be attached to the messaging service"
            );
        }

        info!(
            event_name = "provisioning.number.allocated",
            correlation_id,
            buyer_id = %buyer.id.0,
            area_code = %area_code,
            phone_number = %phone_number,
            "sms number allocated"
        );
        Ok(phone_number)
    }
}
