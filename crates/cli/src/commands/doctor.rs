use haggle_core::config::{AppConfig, LlmProvider};
use haggle_db::connect_with_config;
use serde::Serialize;

use crate::commands::{load_config, runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match load_config() {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.push(check_database_connectivity(&config));
            checks.push(check_generator(&config));
            checks.push(check_sms(&config));
            checks.push(check_email(&config));
        }
        Err(failure) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, failure.message));
            for name in ["database_connectivity", "response_generator", "sms_channel", "email_channel"] {
                checks.push(DoctorCheck::new(
                    name,
                    CheckStatus::Skipped,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    // Unconfigured channels are skipped, not failed; only a failure fails the run.
    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let (overall_status, summary) = if failed {
        (CheckStatus::Fail, "doctor: one or more readiness checks failed")
    } else {
        (CheckStatus::Pass, "doctor: all readiness checks passed")
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(failure) => {
            return DoctorCheck::new("database_connectivity", CheckStatus::Fail, failure.message);
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let pending = haggle_db::migrations::pending_count(&pool)
            .await
            .map_err(|error| format!("database query failed: {error}"));
        pool.close().await;
        pending
    });

    match result {
        Ok(0) => DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!("connected using `{}`, schema up to date", config.database.url),
        ),
        Ok(pending) => DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!(
                "connected using `{}`, {pending} migration(s) pending (run `haggle migrate`)",
                config.database.url
            ),
        ),
        Err(error) => DoctorCheck::new("database_connectivity", CheckStatus::Fail, error),
    }
}

fn check_generator(config: &AppConfig) -> DoctorCheck {
    let details = match config.llm.provider {
        LlmProvider::Anthropic => format!("anthropic model `{}` with api key present", config.llm.model),
        LlmProvider::Ollama => format!(
            "ollama model `{}` at {}",
            config.llm.model,
            config.llm.base_url.as_deref().unwrap_or("the default local endpoint")
        ),
    };
    DoctorCheck::new("response_generator", CheckStatus::Pass, details)
}

fn check_sms(config: &AppConfig) -> DoctorCheck {
    if !config.sms.has_credentials() {
        return DoctorCheck::new(
            "sms_channel",
            CheckStatus::Skipped,
            "no sms credentials; sms replies and number purchases are disabled",
        );
    }
    match config.sms.messaging_service_sid.as_deref() {
        Some(sid) => DoctorCheck::new(
            "sms_channel",
            CheckStatus::Pass,
            format!("credentials present, messaging service {sid}"),
        ),
        None => DoctorCheck::new(
            "sms_channel",
            CheckStatus::Pass,
            "credentials present; purchased numbers will not join a messaging service",
        ),
    }
}

fn check_email(config: &AppConfig) -> DoctorCheck {
    if config.email.access_token.is_some() {
        DoctorCheck::new("email_channel", CheckStatus::Pass, "send token present")
    } else {
        DoctorCheck::new("email_channel", CheckStatus::Skipped, "no send token; email replies are disabled")
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
