use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which sticker figure the manufacturer computes holdback from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldbackBase {
    BaseMsrp,
    Msrp,
    TotalMsrp,
}

impl HoldbackBase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::BaseMsrp => "Base MSRP",
            Self::Msrp => "MSRP",
            Self::TotalMsrp => "Total MSRP",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandMarginEntry {
    pub margin_min_pct: Decimal,
    pub margin_max_pct: Decimal,
    pub holdback_pct: Decimal,
    pub holdback_base: HoldbackBase,
    /// No dealer network, so no invoice/holdback spread.
    pub direct_to_consumer: bool,
}

impl BrandMarginEntry {
    pub fn dealer(
        margin_min_tenths: i64,
        margin_max_tenths: i64,
        holdback_pct: i64,
        holdback_base: HoldbackBase,
    ) -> Self {
        Self {
            margin_min_pct: Decimal::new(margin_min_tenths, 1),
            margin_max_pct: Decimal::new(margin_max_tenths, 1),
            holdback_pct: Decimal::from(holdback_pct),
            holdback_base,
            direct_to_consumer: false,
        }
    }

    pub fn direct_to_consumer() -> Self {
        Self {
            margin_min_pct: Decimal::ZERO,
            margin_max_pct: Decimal::ZERO,
            holdback_pct: Decimal::ZERO,
            holdback_base: HoldbackBase::Msrp,
            direct_to_consumer: true,
        }
    }
}

/// Matched table row, with the brand key it was found under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrandLookup<'a> {
    pub brand: Option<&'a str>,
    pub entry: &'a BrandMarginEntry,
}

impl BrandLookup<'_> {
    pub fn is_default(&self) -> bool {
        self.brand.is_none()
    }
}

/// Immutable brand reference data. Built once at startup and handed to
/// whatever needs pricing; tests build their own tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrandMarginTable {
    entries: HashMap<String, BrandMarginEntry>,
    fallback: BrandMarginEntry,
}

impl BrandMarginTable {
    pub fn new(
        entries: impl IntoIterator<Item = (String, BrandMarginEntry)>,
        fallback: BrandMarginEntry,
    ) -> Self {
        Self { entries: entries.into_iter().collect(), fallback }
    }

    /// US market figures for the common brands.
    pub fn standard() -> Self {
        use HoldbackBase::{BaseMsrp, Msrp, TotalMsrp};

        let dealer_brands = [
            ("Acura", 50, 70, 2, BaseMsrp),
            ("Audi", 60, 80, 0, Msrp),
            ("BMW", 60, 80, 0, Msrp),
            ("Buick", 40, 60, 3, Msrp),
            ("Cadillac", 50, 70, 3, Msrp),
            ("Chevrolet", 50, 80, 3, Msrp),
            ("Chrysler", 30, 50, 3, Msrp),
            ("Dodge", 30, 50, 3, Msrp),
            ("Ford", 45, 65, 3, Msrp),
            ("GMC", 50, 80, 3, Msrp),
            ("Honda", 70, 85, 2, BaseMsrp),
            ("Hyundai", 25, 45, 2, Msrp),
            ("Kia", 25, 45, 2, Msrp),
            ("Jeep", 40, 60, 3, Msrp),
            ("Ram", 40, 60, 3, Msrp),
            ("Lexus", 60, 85, 2, BaseMsrp),
            ("Mazda", 25, 50, 2, Msrp),
            ("Mercedes-Benz", 70, 80, 2, Msrp),
            ("Nissan", 40, 60, 2, TotalMsrp),
            ("Porsche", 80, 100, 0, Msrp),
            ("Subaru", 60, 70, 2, TotalMsrp),
            ("Toyota", 70, 90, 2, BaseMsrp),
            ("Volkswagen", 40, 55, 2, Msrp),
            ("Volvo", 40, 60, 1, Msrp),
        ];

        let entries = dealer_brands
            .into_iter()
            .map(|(brand, min, max, holdback, base)| {
                (brand.to_string(), BrandMarginEntry::dealer(min, max, holdback, base))
            })
            .chain(
                ["Tesla", "Rivian", "Lucid"]
                    .into_iter()
                    .map(|brand| (brand.to_string(), BrandMarginEntry::direct_to_consumer())),
            );

        Self::new(entries, BrandMarginEntry::dealer(50, 70, 2, Msrp))
    }

    /// Exact, then title case, then upper case, then the fallback entry.
    pub fn lookup(&self, brand: &str) -> BrandLookup<'_> {
        let brand = brand.trim();
        [brand.to_string(), title_case(brand), brand.to_uppercase()]
            .iter()
            .find_map(|candidate| self.entries.get_key_value(candidate.as_str()))
            .map(|(key, entry)| BrandLookup { brand: Some(key.as_str()), entry })
            .unwrap_or(BrandLookup { brand: None, entry: &self.fallback })
    }

    pub fn brands(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for BrandMarginTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Upper-cases the first letter of every word; anything but a letter, digit or `_` starts one.
fn title_case(value: &str) -> String {
    let mut word_start = true;
    let mut titled = String::with_capacity(value.len());
    for ch in value.chars() {
        if word_start {
            titled.extend(ch.to_uppercase());
        } else {
            titled.extend(ch.to_lowercase());
        }
        word_start = !(ch.is_alphanumeric() || ch == '_');
    }
    titled
}
