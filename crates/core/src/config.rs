use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channels::phone::is_valid_area_code;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub sms: SmsConfig,
    pub email: EmailConfig,
    pub provisioning: ProvisioningConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Twilio account used for inbound signature checks, outbound SMS and
/// number provisioning.
#[derive(Clone, Debug)]
pub struct SmsConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<SecretString>,
    pub messaging_service_sid: Option<String>,
    /// Public URL the provider posts to; overrides proxy-header reconstruction.
    pub webhook_url: Option<String>,
    pub api_base_url: String,
    pub messaging_base_url: String,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    /// OAuth access token for the send endpoint; token exchange happens upstream.
    pub access_token: Option<SecretString>,
    pub api_base_url: String,
}

#[derive(Clone, Debug)]
pub struct ProvisioningConfig {
    pub enabled: bool,
    pub default_area_code: String,
    pub poll_interval_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("failed to parse `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("config file `{0}` does not exist")]
    MissingConfigFile(PathBuf),
    #[error("`${{{var}}}` referenced in the config file is not set")]
    MissingEnvInterpolation { var: String },
    #[error("`${{` without a closing `}}` in the config file")]
    UnterminatedInterpolation,
    #[error("{key}=`{value}` could not be parsed")]
    InvalidEnvOverride { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://haggle.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                max_tokens: 1024,
                timeout_secs: 60,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            sms: SmsConfig {
                account_sid: None,
                auth_token: None,
                messaging_service_sid: None,
                webhook_url: None,
                api_base_url: "https://api.twilio.com".to_string(),
                messaging_base_url: "https://messaging.twilio.com".to_string(),
            },
            email: EmailConfig {
                access_token: None,
                api_base_url: "https://gmail.googleapis.com".to_string(),
            },
            provisioning: ProvisioningConfig {
                enabled: true,
                default_area_code: "415".to_string(),
                poll_interval_secs: 30,
                max_retries: 5,
                retry_base_delay_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "llm.provider `{other}` is not one of anthropic|ollama"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "logging.format `{other}` is not one of compact|pretty|json"
            ))),
        }
    }
}

impl SmsConfig {
    /// Account SID plus auth token: enough to call the REST API.
    pub fn has_credentials(&self) -> bool {
        self.account_sid.as_deref().is_some_and(|sid| !sid.trim().is_empty())
            && self.auth_token.as_ref().is_some_and(|token| !token.expose_secret().trim().is_empty())
    }
}

impl AppConfig {
    /// Defaults, then the TOML file, then `HAGGLE_*` variables, then explicit overrides.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match find_config_file(options.config_path.as_deref()) {
            Some(path) => read_file_layer(&path)?.merge_into(&mut config),
            None if options.require_file => {
                return Err(ConfigError::MissingConfigFile(
                    options.config_path.unwrap_or_else(|| PathBuf::from("haggle.toml")),
                ));
            }
            None => {}
        }

        config.merge_env()?;
        options.overrides.merge_into(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn merge_env(&mut self) -> Result<(), ConfigError> {
        let database = &mut self.database;
        set(&mut database.url, env_text("HAGGLE_DATABASE_URL"));
        set(&mut database.max_connections, env_parsed("HAGGLE_DATABASE_MAX_CONNECTIONS")?);
        set(&mut database.timeout_secs, env_parsed("HAGGLE_DATABASE_TIMEOUT_SECS")?);

        let llm = &mut self.llm;
        if let Some(provider) = env_text("HAGGLE_LLM_PROVIDER") {
            llm.provider = provider.parse()?;
        }
        set_some(&mut llm.api_key, env_text("HAGGLE_LLM_API_KEY").map(SecretString::from));
        set_some(&mut llm.base_url, env_text("HAGGLE_LLM_BASE_URL"));
        set(&mut llm.model, env_text("HAGGLE_LLM_MODEL"));
        set(&mut llm.max_tokens, env_parsed("HAGGLE_LLM_MAX_TOKENS")?);
        set(&mut llm.timeout_secs, env_parsed("HAGGLE_LLM_TIMEOUT_SECS")?);

        let server = &mut self.server;
        set(&mut server.bind_address, env_text("HAGGLE_SERVER_BIND_ADDRESS"));
        set(&mut server.port, env_parsed("HAGGLE_SERVER_PORT")?);
        set(&mut server.graceful_shutdown_secs, env_parsed("HAGGLE_SERVER_GRACEFUL_SHUTDOWN_SECS")?);

        let sms = &mut self.sms;
        set_some(&mut sms.account_sid, env_text("HAGGLE_SMS_ACCOUNT_SID"));
        set_some(&mut sms.auth_token, env_text("HAGGLE_SMS_AUTH_TOKEN").map(SecretString::from));
        set_some(&mut sms.messaging_service_sid, env_text("HAGGLE_SMS_MESSAGING_SERVICE_SID"));
        set_some(&mut sms.webhook_url, env_text("HAGGLE_SMS_WEBHOOK_URL"));
        set(&mut sms.api_base_url, env_text("HAGGLE_SMS_API_BASE_URL"));
        set(&mut sms.messaging_base_url, env_text("HAGGLE_SMS_MESSAGING_BASE_URL"));

        let email = &mut self.email;
        set_some(
            &mut email.access_token,
            env_text("HAGGLE_EMAIL_ACCESS_TOKEN").map(SecretString::from),
        );
        set(&mut email.api_base_url, env_text("HAGGLE_EMAIL_API_BASE_URL"));

        let provisioning = &mut self.provisioning;
        set(&mut provisioning.enabled, env_parsed("HAGGLE_PROVISIONING_ENABLED")?);
        set(&mut provisioning.default_area_code, env_text("HAGGLE_PROVISIONING_DEFAULT_AREA_CODE"));
        set(&mut provisioning.poll_interval_secs, env_parsed("HAGGLE_PROVISIONING_POLL_INTERVAL_SECS")?);
        set(&mut provisioning.max_retries, env_parsed("HAGGLE_PROVISIONING_MAX_RETRIES")?);
        set(
            &mut provisioning.retry_base_delay_secs,
            env_parsed("HAGGLE_PROVISIONING_RETRY_BASE_DELAY_SECS")?,
        );

        // `HAGGLE_LOG_*` are accepted as short aliases.
        set(
            &mut self.logging.level,
            env_text("HAGGLE_LOGGING_LEVEL").or_else(|| env_text("HAGGLE_LOG_LEVEL")),
        );
        if let Some(format) =
            env_text("HAGGLE_LOGGING_FORMAT").or_else(|| env_text("HAGGLE_LOG_FORMAT"))
        {
            self.logging.format = format.parse()?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_sms(&self.sms)?;
        validate_provisioning(&self.provisioning)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

impl ConfigOverrides {
    fn merge_into(self, config: &mut AppConfig) {
        set(&mut config.database.url, self.database_url);
        set(&mut config.logging.level, self.log_level);
        set(&mut config.llm.provider, self.llm_provider);
        set(&mut config.llm.model, self.llm_model);
        set(&mut config.server.bind_address, self.bind_address);
        set(&mut config.server.port, self.port);
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn set_some<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// An explicit path must exist; otherwise the first of the well-known locations is used.
fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => ["haggle.toml", "config/haggle.toml"]
            .into_iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists()),
    }
}

fn read_file_layer(path: &Path) -> Result<FileLayer, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let expanded = expand_env_references(&raw)?;
    toml::from_str(&expanded)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Replaces each `${NAME}` with the value of the environment variable `NAME`.
fn expand_env_references(input: &str) -> Result<String, ConfigError> {
    let mut expanded = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("${") {
        expanded.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let close = after_open.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let name = &after_open[..close];
        let value = env::var(name)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: name.to_string() })?;
        expanded.push_str(&value);
        rest = &after_open[close + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation("llm.max_tokens must be greater than zero".to_string()));
    }

    match llm.provider {
        LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the anthropic provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_sms(sms: &SmsConfig) -> Result<(), ConfigError> {
    if sms.has_credentials() {
        let service_sid = sms.messaging_service_sid.as_deref().map(str::trim).unwrap_or_default();
        if service_sid.is_empty() {
            return Err(ConfigError::Validation(
                "sms.messaging_service_sid is required when sms credentials are configured"
                    .to_string(),
            ));
        }
        if !service_sid.starts_with("MG") || service_sid.len() != 34 {
            return Err(ConfigError::Validation(
                "sms.messaging_service_sid must start with `MG` and be 34 characters long"
                    .to_string(),
            ));
        }
    }

    if let Some(url) = &sms.webhook_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "sms.webhook_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_provisioning(provisioning: &ProvisioningConfig) -> Result<(), ConfigError> {
    if !is_valid_area_code(provisioning.default_area_code.trim()) {
        return Err(ConfigError::Validation(
            "provisioning.default_area_code must be three digits".to_string(),
        ));
    }

    if provisioning.poll_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "provisioning.poll_interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn env_text(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    env_text(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
                key: key.to_string(),
                value: value.clone(),
            })
        })
        .transpose()
}

/// Shape of `haggle.toml`; every key is optional and only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileLayer {
    database: DatabaseSection,
    llm: LlmSection,
    server: ServerSection,
    sms: SmsSection,
    email: EmailSection,
    provisioning: ProvisioningSection,
    logging: LoggingSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DatabaseSection {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LlmSection {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SmsSection {
    account_sid: Option<String>,
    auth_token: Option<String>,
    messaging_service_sid: Option<String>,
    webhook_url: Option<String>,
    api_base_url: Option<String>,
    messaging_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EmailSection {
    access_token: Option<String>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProvisioningSection {
    enabled: Option<bool>,
    default_area_code: Option<String>,
    poll_interval_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingSection {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl FileLayer {
    fn merge_into(self, config: &mut AppConfig) {
        let Self { database, llm, server, sms, email, provisioning, logging } = self;

        set(&mut config.database.url, database.url);
        set(&mut config.database.max_connections, database.max_connections);
        set(&mut config.database.timeout_secs, database.timeout_secs);

        set(&mut config.llm.provider, llm.provider);
        set_some(&mut config.llm.api_key, llm.api_key.map(SecretString::from));
        set_some(&mut config.llm.base_url, llm.base_url);
        set(&mut config.llm.model, llm.model);
        set(&mut config.llm.max_tokens, llm.max_tokens);
        set(&mut config.llm.timeout_secs, llm.timeout_secs);

        set(&mut config.server.bind_address, server.bind_address);
        set(&mut config.server.port, server.port);
        set(&mut config.server.graceful_shutdown_secs, server.graceful_shutdown_secs);

        set_some(&mut config.sms.account_sid, sms.account_sid);
        set_some(&mut config.sms.auth_token, sms.auth_token.map(SecretString::from));
        set_some(&mut config.sms.messaging_service_sid, sms.messaging_service_sid);
        set_some(&mut config.sms.webhook_url, sms.webhook_url);
        set(&mut config.sms.api_base_url, sms.api_base_url);
        set(&mut config.sms.messaging_base_url, sms.messaging_base_url);

        set_some(&mut config.email.access_token, email.access_token.map(SecretString::from));
        set(&mut config.email.api_base_url, email.api_base_url);

        set(&mut config.provisioning.enabled, provisioning.enabled);
        set(&mut config.provisioning.default_area_code, provisioning.default_area_code);
        set(&mut config.provisioning.poll_interval_secs, provisioning.poll_interval_secs);
        set(&mut config.provisioning.max_retries, provisioning.max_retries);
        set(&mut config.provisioning.retry_base_delay_secs, provisioning.retry_base_delay_secs);

        set(&mut config.logging.level, logging.level);
        set(&mut config.logging.format, logging.format);
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        expand_env_references, AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions,
        LogFormat,
    };

    const SERVICE_SID: &str = "MG0123456789abcdef0123456789abcdef";

    /// Runs `body` with exactly `vars` set among the variables it names, restoring them after.
    fn with_env<T>(vars: &[(&str, &str)], body: impl FnOnce() -> T) -> T {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        let _guard = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for (key, value) in vars {
            env::set_var(key, value);
        }
        let result = body();
        for (key, _) in vars {
            env::remove_var(key);
        }
        result
    }

    fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("haggle.toml");
        fs::write(&path, contents).expect("write config file");
        path
    }

    #[test]
    fn defaults_load_without_file_or_env() {
        let config = with_env(&[], || AppConfig::load(LoadOptions::default())).expect("defaults");

        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.provisioning.default_area_code, "415");
        assert!(config.provisioning.enabled);
        assert!(!config.sms.has_credentials());
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn file_values_expand_environment_references() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_config(
            &dir,
            &format!(
                "[sms]\naccount_sid = \"AC123\"\nauth_token = \"${{HAGGLE_TEST_TWILIO_TOKEN}}\"\n\
                 messaging_service_sid = \"{SERVICE_SID}\"\n\
                 webhook_url = \"https://haggle.test/api/v1/webhooks/sms/inbound\"\n"
            ),
        );

        let config = with_env(&[("HAGGLE_TEST_TWILIO_TOKEN", "token-from-env")], || {
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
        })
        .expect("config with interpolation");

        let token = config.sms.auth_token.as_ref().map(|token| token.expose_secret().to_string());
        assert_eq!(token.as_deref(), Some("token-from-env"));
        assert!(config.sms.has_credentials());
    }

    #[test]
    fn unset_or_unterminated_references_fail() {
        assert!(matches!(
            expand_env_references("key = \"${HAGGLE_TEST_NEVER_SET}\""),
            Err(ConfigError::MissingEnvInterpolation { ref var }) if var == "HAGGLE_TEST_NEVER_SET"
        ));
        assert!(matches!(
            expand_env_references("key = \"${OPEN\""),
            Err(ConfigError::UnterminatedInterpolation)
        ));
        assert_eq!(expand_env_references("plain $ text").expect("no references"), "plain $ text");
    }

    #[test]
    fn short_logging_aliases_apply() {
        let config = with_env(&[("HAGGLE_LOG_LEVEL", "warn"), ("HAGGLE_LOG_FORMAT", "pretty")], || {
            AppConfig::load(LoadOptions::default())
        })
        .expect("config");

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn overrides_beat_env_which_beats_the_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_config(
            &dir,
            "[database]\nurl = \"sqlite://from-file.db\"\n\n\
             [server]\nport = 7070\nbind_address = \"0.0.0.0\"\n\n\
             [logging]\nlevel = \"warn\"\n",
        );

        let config = with_env(
            &[("HAGGLE_DATABASE_URL", "sqlite://from-env.db"), ("HAGGLE_SERVER_PORT", "9090")],
            || {
                AppConfig::load(LoadOptions {
                    config_path: Some(path),
                    overrides: ConfigOverrides {
                        database_url: Some("sqlite://from-override.db".to_string()),
                        log_level: Some("debug".to_string()),
                        ..ConfigOverrides::default()
                    },
                    ..LoadOptions::default()
                })
            },
        )
        .expect("layered config");

        assert_eq!(config.database.url, "sqlite://from-override.db");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.bind_address, "0.0.0.0");
    }

    #[test]
    fn unparseable_numbers_name_the_variable() {
        let result = with_env(&[("HAGGLE_PROVISIONING_MAX_RETRIES", "many")], || {
            AppConfig::load(LoadOptions::default())
        });

        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "HAGGLE_PROVISIONING_MAX_RETRIES"
        ));
    }

    #[test]
    fn messaging_service_sid_is_checked_once_credentials_exist() {
        let result = with_env(
            &[
                ("HAGGLE_SMS_ACCOUNT_SID", "AC123"),
                ("HAGGLE_SMS_AUTH_TOKEN", "token"),
                ("HAGGLE_SMS_MESSAGING_SERVICE_SID", "PN0123"),
            ],
            || AppConfig::load(LoadOptions::default()),
        );

        assert!(matches!(
            result,
            Err(ConfigError::Validation(ref message)) if message.contains("messaging_service_sid")
        ));
    }

    #[test]
    fn anthropic_needs_an_api_key() {
        let missing = with_env(&[("HAGGLE_LLM_PROVIDER", "anthropic")], || {
            AppConfig::load(LoadOptions::default())
        });
        assert!(matches!(
            missing,
            Err(ConfigError::Validation(ref message)) if message.contains("llm.api_key")
        ));

        let config = with_env(
            &[("HAGGLE_LLM_PROVIDER", "anthropic"), ("HAGGLE_LLM_API_KEY", "sk-ant-test")],
            || AppConfig::load(LoadOptions::default()),
        )
        .expect("anthropic with key");
        assert_eq!(config.llm.provider, LlmProvider::Anthropic);
    }

    #[test]
    fn two_digit_area_code_is_rejected() {
        let result = with_env(&[("HAGGLE_PROVISIONING_DEFAULT_AREA_CODE", "41")], || {
            AppConfig::load(LoadOptions::default())
        });

        assert!(matches!(
            result,
            Err(ConfigError::Validation(ref message)) if message.contains("default_area_code")
        ));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = with_env(
            &[
                ("HAGGLE_EMAIL_ACCESS_TOKEN", "ya29-secret-value"),
                ("HAGGLE_LLM_API_KEY", "sk-secret-value"),
            ],
            || AppConfig::load(LoadOptions::default()),
        )
        .expect("config");

        let debug = format!("{config:?}");
        assert!(!debug.contains("ya29-secret-value"));
        assert!(!debug.contains("sk-secret-value"));
    }
}
