use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuyerId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buyer {
    pub id: BuyerId,
    pub email: String,
    /// Per-buyer forwarding address; routing key for inbound email.
    pub inbox_email: String,
    /// Allocated SMS number; routing key for inbound SMS.
    pub phone_number: Option<String>,
    pub zip_code: Option<String>,
    pub preferences: VehiclePreferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehiclePreferences {
    pub year: Option<i32>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub body_type: Option<String>,
    pub msrp: Option<Decimal>,
}

impl VehiclePreferences {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(year) = self.year {
            if !(1900..=2100).contains(&year) {
                return Err(DomainError::Validation("invalid year".to_string()));
            }
        }

        let blank = |value: &Option<String>| value.as_deref().map_or(true, |v| v.trim().is_empty());
        if blank(&self.make) || blank(&self.model) {
            return Err(DomainError::Validation("make and model are required".to_string()));
        }

        if let Some(msrp) = self.msrp {
            if msrp < Decimal::ZERO {
                return Err(DomainError::Validation("msrp must not be negative".to_string()));
            }
        }

        Ok(())
    }

    /// "2024 Toyota Camry", skipping whatever is unset.
    pub fn vehicle_summary(&self) -> Option<String> {
        let parts: Vec<String> = [
            self.year.map(|year| year.to_string()),
            self.make.clone(),
            self.model.clone(),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::VehiclePreferences;

    fn camry() -> VehiclePreferences {
        VehiclePreferences {
            year: Some(2024),
            make: Some("Toyota".to_string()),
            model: Some("Camry".to_string()),
            body_type: Some("Sedan".to_string()),
            msrp: Some(Decimal::new(32_000, 0)),
        }
    }

    #[test]
    fn vehicle_summary_joins_known_parts() {
        assert_eq!(camry().vehicle_summary().as_deref(), Some("2024 Toyota Camry"));

        let partial = VehiclePreferences { year: None, ..camry() };
        assert_eq!(partial.vehicle_summary().as_deref(), Some("Toyota Camry"));
        assert_eq!(VehiclePreferences::default().vehicle_summary(), None);
    }

    #[test]
    fn validation_rejects_out_of_range_year_and_missing_model() {
        assert!(camry().validate().is_ok());
        assert!(VehiclePreferences { year: Some(1850), ..camry() }.validate().is_err());
        assert!(VehiclePreferences { model: Some("  ".to_string()), ..camry() }.validate().is_err());
    }
}
