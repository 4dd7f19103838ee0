use chrono::Utc;
use haggle_core::domain::buyer::{Buyer, BuyerId, VehiclePreferences};
use haggle_db::{BuyerRepository, RepositoryError, SqlBuyerRepository};
use serde_json::json;
use uuid::Uuid;

use crate::commands::{
    load_config, open_store, runtime, storage_failure, CommandResult, Failure, EXIT_INVALID_INPUT,
    EXIT_STORAGE,
};

#[derive(Debug, Clone)]
pub struct NewBuyer {
    pub id: Option<String>,
    pub email: String,
    pub inbox_email: String,
    pub zip_code: Option<String>,
}

pub fn create(input: NewBuyer) -> CommandResult {
    match create_buyer(input) {
        Ok(buyer) => CommandResult::success_with(
            "buyer.create",
            format!("registered buyer `{}`", buyer.id.0),
            Some(json!(buyer)),
        ),
        Err(failure) => failure.into_result("buyer.create"),
    }
}

pub fn list() -> CommandResult {
    let result = load_config().and_then(|config| {
        runtime()?.block_on(async {
            let pool = open_store(&config).await?;
            let buyers = SqlBuyerRepository::new(pool.clone()).list().await.map_err(storage_failure);
            pool.close().await;
            buyers
        })
    });

    match result {
        Ok(buyers) => CommandResult::success_with(
            "buyer.list",
            format!("{} buyer(s)", buyers.len()),
            Some(json!(buyers)),
        ),
        Err(failure) => failure.into_result("buyer.list"),
    }
}

fn create_buyer(input: NewBuyer) -> Result<Buyer, Failure> {
    let buyer = build_buyer(input)?;
    let config = load_config()?;

    runtime()?.block_on(async {
        let pool = open_store(&config).await?;
        let saved = insert_new(&SqlBuyerRepository::new(pool.clone()), &buyer).await;
        pool.close().await;

        match saved {
            Ok(()) => Ok(buyer),
            Err(RepositoryError::Conflict(detail)) => Err(Failure::new(
                "conflict",
                format!("buyer could not be registered: {detail}"),
                EXIT_STORAGE,
            )),
            Err(error) => Err(storage_failure(error)),
        }
    })
}

/// `save` upserts by id; creation must not overwrite an existing buyer.
async fn insert_new(repository: &SqlBuyerRepository, buyer: &Buyer) -> Result<(), RepositoryError> {
    if repository.find_by_id(&buyer.id).await?.is_some() {
        return Err(RepositoryError::Conflict(format!("buyer id `{}` already exists", buyer.id.0)));
    }
    repository.save(buyer.clone()).await
}

fn build_buyer(input: NewBuyer) -> Result<Buyer, Failure> {
    let email = required_address(&input.email, "email")?;
    let inbox_email = required_address(&input.inbox_email, "inbox_email")?;
    let id = input
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = Utc::now();

    Ok(Buyer {
        id: BuyerId(id),
        email,
        inbox_email,
        phone_number: None,
        zip_code: input.zip_code.map(|zip| zip.trim().to_string()).filter(|zip| !zip.is_empty()),
        preferences: VehiclePreferences::default(),
        created_at: now,
        updated_at: now,
    })
}

/// Inbox routing matches lowercase addresses, so they are stored lowercase.
fn required_address(value: &str, field: &str) -> Result<String, Failure> {
    let value = value.trim().to_lowercase();
    if value.is_empty() || !value.contains('@') {
        return Err(Failure::new(
            "invalid_input",
            format!("{field} must be an email address"),
            EXIT_INVALID_INPUT,
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::{build_buyer, NewBuyer};

    #[test]
    fn addresses_are_normalized_and_ids_generated() {
        let buyer = build_buyer(NewBuyer {
            id: None,
            email: " Ana@Example.com ".to_string(),
            inbox_email: "ANA@inbox.haggle.app".to_string(),
            zip_code: Some(" ".to_string()),
        })
        .expect("valid buyer");

        assert_eq!(buyer.email, "ana@example.com");
        assert_eq!(buyer.inbox_email, "ana@inbox.haggle.app");
        assert!(!buyer.id.0.is_empty());
        assert_eq!(buyer.zip_code, None);
    }

    #[test]
    fn inbox_address_is_required() {
        let failure = build_buyer(NewBuyer {
            id: Some("B-1".to_string()),
            email: "ana@example.com".to_string(),
            inbox_email: "not-an-address".to_string(),
            zip_code: None,
        })
        .expect_err("invalid inbox");

        assert_eq!(failure.class, "invalid_input");
        assert_eq!(failure.exit_code, 6);
    }
}
