use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use haggle_core::config::AppConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;
use toml::Value;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigField {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run() -> CommandResult {
    let config = match load_config() {
        Ok(config) => config,
        Err(failure) => return failure.into_result("config"),
    };

    let file_path = detect_config_path();
    let file_doc = load_config_file_doc(file_path.as_deref());
    let fields: Vec<ConfigField> = effective_values(&config)
        .into_iter()
        .map(|(key, value)| ConfigField {
            key,
            value,
            source: field_source(key, file_doc.as_ref(), file_path.as_deref()),
        })
        .collect();

    CommandResult::success_with(
        "config",
        "effective config (source precedence: env > file > default)",
        Some(json!({ "fields": fields })),
    )
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("llm.provider", provider_name(config)),
        ("llm.model", config.llm.model.clone()),
        ("llm.base_url", config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string())),
        ("llm.api_key", redact(config.llm.api_key.as_ref())),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("sms.account_sid", config.sms.account_sid.clone().unwrap_or_else(|| "<unset>".to_string())),
        ("sms.auth_token", redact(config.sms.auth_token.as_ref())),
        (
            "sms.messaging_service_sid",
            config.sms.messaging_service_sid.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        ("sms.webhook_url", config.sms.webhook_url.clone().unwrap_or_else(|| "<unset>".to_string())),
        ("email.access_token", redact(config.email.access_token.as_ref())),
        ("provisioning.enabled", config.provisioning.enabled.to_string()),
        ("provisioning.default_area_code", config.provisioning.default_area_code.clone()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format).to_lowercase()),
    ]
}

fn provider_name(config: &AppConfig) -> String {
    serde_json::to_value(config.llm.provider)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", config.llm.provider))
}

fn redact(secret: Option<&SecretString>) -> String {
    match secret {
        Some(secret) if !secret.expose_secret().trim().is_empty() => "<redacted>".to_string(),
        Some(_) => "<empty>".to_string(),
        None => "<unset>".to_string(),
    }
}

/// `database.url` -> `HAGGLE_DATABASE_URL`.
fn env_key(key_path: &str) -> String {
    format!("HAGGLE_{}", key_path.replace('.', "_").to_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("haggle.toml"), PathBuf::from("config/haggle.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(key_path: &str, file_doc: Option<&Value>, file_path: Option<&Path>) -> String {
    let env_key = env_key(key_path);
    if env::var_os(&env_key).is_some() {
        return format!("env ({env_key})");
    }

    if file_doc.is_some_and(|doc| contains_path(doc, key_path)) {
        let file_path = file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |current, key| current.get(key)).is_some()
}
