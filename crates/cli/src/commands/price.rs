use std::str::FromStr;

use haggle_core::pricing::{estimate, BrandMarginTable};
use rust_decimal::Decimal;
use serde_json::json;

use crate::commands::{CommandResult, EXIT_INVALID_INPUT};

pub fn run(msrp: &str, brand: &str, body_type: Option<&str>) -> CommandResult {
    let Ok(msrp) = Decimal::from_str(msrp.trim()) else {
        return CommandResult::failure(
            "price",
            "invalid_input",
            format!("msrp `{msrp}` is not a number"),
            EXIT_INVALID_INPUT,
        );
    };
    if brand.trim().is_empty() {
        return CommandResult::failure("price", "invalid_input", "brand is required", EXIT_INVALID_INPUT);
    }

    let table = BrandMarginTable::standard();
    let result = estimate(&table, msrp, brand, body_type.unwrap_or_default());
    let label = result.matched_brand.clone().unwrap_or_else(|| "default margins".to_string());
    CommandResult::success_with(
        "price",
        format!("estimated dealer cost using {label}"),
        Some(json!(result)),
    )
}
