use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use haggle_core::domain::buyer::{Buyer, BuyerId, VehiclePreferences};

use super::{format_timestamp, parse_timestamp, BuyerRepository, RepositoryError};
use crate::DbPool;

const BUYER_COLUMNS: &str = "id, email, inbox_email, phone_number, zip_code, pref_year, pref_make,
    pref_model, pref_body_type, pref_msrp, created_at, updated_at";

pub struct SqlBuyerRepository {
    pool: DbPool,
}

impl SqlBuyerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_where(&self, column: &str, value: &str) -> Result<Option<Buyer>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {BUYER_COLUMNS} FROM buyer WHERE {column} = ?"))
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(buyer_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl BuyerRepository for SqlBuyerRepository {
    async fn find_by_id(&self, id: &BuyerId) -> Result<Option<Buyer>, RepositoryError> {
        self.find_where("id", &id.0).await
    }

    async fn find_by_inbox_email(
        &self,
        inbox_email: &str,
    ) -> Result<Option<Buyer>, RepositoryError> {
        self.find_where("inbox_email", &inbox_email.trim().to_ascii_lowercase()).await
    }

    async fn find_by_phone_number(
        &self,
        phone_number: &str,
    ) -> Result<Option<Buyer>, RepositoryError> {
        self.find_where("phone_number", phone_number.trim()).await
    }

    async fn list(&self) -> Result<Vec<Buyer>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {BUYER_COLUMNS} FROM buyer ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(buyer_from_row).collect()
    }

    async fn save(&self, buyer: Buyer) -> Result<(), RepositoryError> {
        let preferences = &buyer.preferences;
        sqlx::query(
            "INSERT INTO buyer (
                id, email, inbox_email, phone_number, zip_code, pref_year, pref_make,
                pref_model, pref_body_type, pref_msrp, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                inbox_email = excluded.inbox_email,
                phone_number = excluded.phone_number,
                zip_code = excluded.zip_code,
                pref_year = excluded.pref_year,
                pref_make = excluded.pref_make,
                pref_model = excluded.pref_model,
                pref_body_type = excluded.pref_body_type,
                pref_msrp = excluded.pref_msrp,
                updated_at = excluded.updated_at",
        )
        .bind(&buyer.id.0)
        .bind(buyer.email.trim())
        .bind(buyer.inbox_email.trim().to_ascii_lowercase())
        .bind(buyer.phone_number.as_deref())
        .bind(buyer.zip_code.as_deref())
        .bind(preferences.year)
        .bind(preferences.make.as_deref())
        .bind(preferences.model.as_deref())
        .bind(preferences.body_type.as_deref())
        .bind(preferences.msrp.map(|msrp| msrp.to_string()))
        .bind(format_timestamp(buyer.created_at))
        .bind(format_timestamp(buyer.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|error| RepositoryError::from_write(error, "buyer email, inbox or phone"))?;

        Ok(())
    }

    async fn update_preferences(
        &self,
        id: &BuyerId,
        preferences: &VehiclePreferences,
        zip_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Buyer>, RepositoryError> {
        let updated = sqlx::query(
            "UPDATE buyer SET
                pref_year = ?,
                pref_make = ?,
                pref_model = ?,
                pref_body_type = ?,
                pref_msrp = ?,
                zip_code = COALESCE(?, zip_code),
                updated_at = ?
             WHERE id = ?",
        )
        .bind(preferences.year)
        .bind(preferences.make.as_deref())
        .bind(preferences.model.as_deref())
        .bind(preferences.body_type.as_deref())
        .bind(preferences.msrp.map(|msrp| msrp.to_string()))
        .bind(zip_code)
        .bind(format_timestamp(now))
        .bind(&id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    async fn set_phone_number(
        &self,
        id: &BuyerId,
        phone_number: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let updated = sqlx::query("UPDATE buyer SET phone_number = ?, updated_at = ? WHERE id = ?")
            .bind(phone_number.trim())
            .bind(format_timestamp(now))
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|error| RepositoryError::from_write(error, "phone number"))?
            .rows_affected();

        Ok(updated > 0)
    }
}

fn buyer_from_row(row: SqliteRow) -> Result<Buyer, RepositoryError> {
    let msrp = row
        .try_get::<Option<String>, _>("pref_msrp")?
        .map(|value| {
            Decimal::from_str(&value).map_err(|error| {
                RepositoryError::Decode(format!("invalid decimal in `pref_msrp`: `{value}` ({error})"))
            })
        })
        .transpose()?;

    Ok(Buyer {
        id: BuyerId(row.try_get("id")?),
        email: row.try_get("email")?,
        inbox_email: row.try_get("inbox_email")?,
        phone_number: row.try_get("phone_number")?,
        zip_code: row.try_get("zip_code")?,
        preferences: VehiclePreferences {
            year: row.try_get("pref_year")?,
            make: row.try_get("pref_make")?,
            model: row.try_get("pref_model")?,
            body_type: row.try_get("pref_body_type")?,
            msrp,
        },
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
