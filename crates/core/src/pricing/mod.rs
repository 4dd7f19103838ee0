//! Dealer cost estimation from sticker price.
//!
//! `invoice = msrp * (1 - margin / 100)`, `holdback = msrp * holdback / 100`,
//! `net_net = invoice - holdback`. Larger vehicles carry thinner dealer
//! margins, so truck-like body types take the top of the brand's range and
//! everything else the bottom. All functions are total: non-positive MSRP
//! yields zero.

pub mod table;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use table::{BrandLookup, BrandMarginEntry, BrandMarginTable, HoldbackBase};

const TRUCK_MARKERS: &[&str] = &["truck", "pickup", "suv", "sport utility"];

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEstimate {
    /// Table key that matched, `None` when the fallback entry was used.
    pub matched_brand: Option<String>,
    pub msrp: Decimal,
    pub margin_pct: Decimal,
    pub invoice: Decimal,
    pub holdback: Decimal,
    pub holdback_base: HoldbackBase,
    pub net_net: Decimal,
    pub direct_to_consumer: bool,
}

pub fn is_truck_body(body_type: &str) -> bool {
    let body_type = body_type.to_lowercase();
    TRUCK_MARKERS.iter().any(|marker| body_type.contains(marker))
}

pub fn estimate_invoice_price(
    table: &BrandMarginTable,
    msrp: Decimal,
    brand: &str,
    body_type: &str,
) -> Decimal {
    if msrp <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let lookup = table.lookup(brand);
    if lookup.entry.direct_to_consumer {
        return msrp;
    }

    let margin = margin_for(lookup.entry, body_type);
    msrp * (Decimal::ONE - margin / HUNDRED)
}

pub fn estimate_holdback(table: &BrandMarginTable, msrp: Decimal, brand: &str) -> Decimal {
    if msrp <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let lookup = table.lookup(brand);
    if lookup.entry.direct_to_consumer {
        return Decimal::ZERO;
    }

    msrp * lookup.entry.holdback_pct / HUNDRED
}

pub fn net_net_price(
    table: &BrandMarginTable,
    msrp: Decimal,
    brand: &str,
    body_type: &str,
) -> Decimal {
    estimate_invoice_price(table, msrp, brand, body_type) - estimate_holdback(table, msrp, brand)
}

pub fn estimate(
    table: &BrandMarginTable,
    msrp: Decimal,
    brand: &str,
    body_type: &str,
) -> PriceEstimate {
    let lookup = table.lookup(brand);
    let invoice = estimate_invoice_price(table, msrp, brand, body_type);
    let holdback = estimate_holdback(table, msrp, brand);
    let margin_pct = if lookup.entry.direct_to_consumer || msrp <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        margin_for(lookup.entry, body_type)
    };

    PriceEstimate {
        matched_brand: lookup.brand.map(str::to_string),
        msrp: msrp.max(Decimal::ZERO),
        margin_pct,
        invoice,
        holdback,
        holdback_base: lookup.entry.holdback_base,
        net_net: invoice - holdback,
        direct_to_consumer: lookup.entry.direct_to_consumer,
    }
}

fn margin_for(entry: &BrandMarginEntry, body_type: &str) -> Decimal {
    if is_truck_body(body_type) {
        entry.margin_max_pct
    } else {
        entry.margin_min_pct
    }
}
