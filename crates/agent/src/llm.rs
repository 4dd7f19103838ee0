use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;

use haggle_core::config::{LlmConfig, LlmProvider};
use haggle_core::context::NegotiationContext;

use crate::conversation::{
    anthropic_reply_text, anthropic_request, ollama_reply_text, ollama_request,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OLLAMA_API_BASE: &str = "http://localhost:11434";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not parse provider response: {0}")]
    Parse(String),
    #[error("provider returned an empty reply")]
    Empty,
    #[error("generation timed out after {0}s")]
    Timeout(u64),
    #[error("generator misconfigured: {0}")]
    Configuration(String),
}

/// Drafts the next negotiation message for an assembled context.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, context: &NegotiationContext) -> Result<String, GenerationError>;

    fn provider(&self) -> &'static str;
}

pub fn build_generator(config: &LlmConfig) -> Result<Arc<dyn ResponseGenerator>, GenerationError> {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let base_url = config.base_url.as_deref().map(str::trim).filter(|url| !url.is_empty());

    match config.provider {
        LlmProvider::Anthropic => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                GenerationError::Configuration("anthropic requires llm.api_key".to_string())
            })?;
            Ok(Arc::new(AnthropicClient::new(
                api_key,
                base_url.unwrap_or(ANTHROPIC_API_BASE),
                &config.model,
                config.max_tokens,
                timeout,
            )?))
        }
        LlmProvider::Ollama => Ok(Arc::new(OllamaClient::new(
            base_url.unwrap_or(OLLAMA_API_BASE),
            &config.model,
            config.max_tokens,
            timeout,
        )?)),
    }
}

pub struct AnthropicClient {
    http_client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(
        api_key: SecretString,
        base_url: &str,
        model: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));

        let http_client = reqwest::Client::builder().default_headers(headers).timeout(timeout).build()?;

        Ok(Self {
            http_client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_tokens,
        })
    }
}

#[async_trait]
impl ResponseGenerator for AnthropicClient {
    async fn generate(&self, context: &NegotiationContext) -> Result<String, GenerationError> {
        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .json(&anthropic_request(&self.model, self.max_tokens, context))
            .send()
            .await?;

        anthropic_reply_text(&json_body(response).await?)
    }

    fn provider(&self) -> &'static str {
        "anthropic"
    }
}

pub struct OllamaClient {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OllamaClient {
    pub fn new(
        base_url: &str,
        model: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        Ok(Self {
            http_client: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_tokens,
        })
    }
}

#[async_trait]
impl ResponseGenerator for OllamaClient {
    async fn generate(&self, context: &NegotiationContext) -> Result<String, GenerationError> {
        let response = self
            .http_client
            .post(format!("{}/api/chat", self.base_url))
            .json(&ollama_request(&self.model, self.max_tokens, context))
            .send()
            .await?;

        ollama_reply_text(&json_body(response).await?)
    }

    fn provider(&self) -> &'static str {
        "ollama"
    }
}

async fn json_body(response: reqwest::Response) -> Result<Value, GenerationError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GenerationError::Status { status: status.as_u16(), body });
    }

    response.json::<Value>().await.map_err(|error| GenerationError::Parse(error.to_string()))
}
