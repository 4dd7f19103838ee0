use chrono::Utc;
use haggle_core::channels::phone::is_valid_area_code;
use haggle_core::config::ProvisioningConfig;
use haggle_core::domain::buyer::BuyerId;
use haggle_core::domain::provisioning::{PhoneNumberRequest, ProvisioningKind};
use haggle_core::provisioning::{ProvisioningEngine, ProvisioningEngineConfig};
use haggle_db::{BuyerRepository, ProvisioningRepository, SqlBuyerRepository, SqlProvisioningRepository};
use serde_json::{json, Value};

use crate::commands::{
    load_config, open_store, runtime, storage_failure, CommandResult, Failure, EXIT_INVALID_INPUT,
};

/// Queues a task for the server's provisioning worker; nothing is purchased here.
pub fn run(buyer_id: &str, area_code: Option<&str>) -> CommandResult {
    match enqueue(buyer_id, area_code) {
        Ok((message, data)) => CommandResult::success_with("provision", message, Some(data)),
        Err(failure) => failure.into_result("provision"),
    }
}

fn enqueue(buyer_id: &str, area_code: Option<&str>) -> Result<(String, Value), Failure> {
    let area_code = area_code.map(str::trim).filter(|code| !code.is_empty());
    if let Some(code) = area_code.filter(|code| !is_valid_area_code(code)) {
        return Err(Failure::new(
            "invalid_input",
            format!("area code `{code}` must be three digits"),
            EXIT_INVALID_INPUT,
        ));
    }

    let config = load_config()?;
    runtime()?.block_on(async {
        let pool = open_store(&config).await?;
        let outcome = queue_for_buyer(&pool, &config.provisioning, buyer_id, area_code).await;
        pool.close().await;
        outcome
    })
}

async fn queue_for_buyer(
    pool: &haggle_db::DbPool,
    settings: &ProvisioningConfig,
    buyer_id: &str,
    area_code: Option<&str>,
) -> Result<(String, Value), Failure> {
    let buyer_id = BuyerId(buyer_id.trim().to_string());
    let buyer = SqlBuyerRepository::new(pool.clone())
        .find_by_id(&buyer_id)
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| {
            Failure::new("not_found", format!("buyer `{}` does not exist", buyer_id.0), EXIT_INVALID_INPUT)
        })?;

    if let Some(number) = buyer.phone_number.filter(|number| !number.trim().is_empty()) {
        return Ok((
            format!("buyer `{}` already has a number", buyer_id.0),
            json!({ "phone_number": number }),
        ));
    }

    let engine = ProvisioningEngine::with_config(ProvisioningEngineConfig {
        default_max_retries: settings.max_retries,
        ..ProvisioningEngineConfig::default()
    });
    let task = engine.create_task(
        buyer_id.clone(),
        ProvisioningKind::PhoneNumber,
        PhoneNumberRequest { area_code: area_code.map(str::to_string) }.to_payload(),
        Utc::now(),
    );
    let task = SqlProvisioningRepository::new(pool.clone()).enqueue(task).await.map_err(storage_failure)?;

    Ok((
        format!("provisioning task `{}` is {}", task.id.0, task.state.as_str()),
        json!({
            "task_id": task.id.0,
            "state": task.state.as_str(),
            "idempotency_key": task.idempotency_key.0,
            "retry_count": task.retry_count,
        }),
    ))
}
