//! Negotiation context assembly.
//!
//! Folds a thread's recent history, the buyer's vehicle preferences, a pricing
//! reference and the competitive offer ledger into the input the response
//! generator consumes. Pure: callers fetch the rows, this module only shapes
//! them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::buyer::VehiclePreferences;
use crate::domain::message::{Message, Sender};
use crate::domain::offer::SellerOffer;
use crate::domain::thread::Thread;
use crate::pricing::{self, BrandMarginTable};

/// Thread messages fed to the generator, most recent first when fetched.
pub const HISTORY_LIMIT: u32 = 10;
/// Offers across all of a buyer's threads.
pub const OFFER_LIMIT: u32 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitiveOffer {
    pub seller: String,
    pub offer_text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationContext {
    pub system_prompt: String,
    /// Alternating roles, first and last turn from the user.
    pub turns: Vec<Turn>,
    pub competitive_offers: Vec<CompetitiveOffer>,
}

pub struct ContextInput<'a> {
    pub thread: &'a Thread,
    pub preferences: &'a VehiclePreferences,
    pub pricing: &'a BrandMarginTable,
    /// Newest first, as returned by the recent-history query.
    pub history_desc: Vec<Message>,
    /// Newest first.
    pub offers: &'a [SellerOffer],
    pub user_text: &'a str,
}

pub fn assemble(input: ContextInput<'_>) -> NegotiationContext {
    let seller = input.thread.display_name();

    let competitive_offers: Vec<CompetitiveOffer> = input
        .offers
        .iter()
        .take(OFFER_LIMIT as usize)
        .map(|entry| CompetitiveOffer {
            seller: entry.seller_label().to_string(),
            offer_text: entry.offer.offer_text.clone(),
        })
        .collect();

    let mut history = input.history_desc;
    history.truncate(HISTORY_LIMIT as usize);
    history.reverse();

    let mut turns: Vec<Turn> = history.iter().map(|message| history_turn(message, &seller)).collect();
    turns.push(Turn::user(format!(
        "Here is the users message: \"{}\" . In this thread they are negotiating with {seller}. Assist the user with their request",
        input.user_text
    )));

    NegotiationContext {
        system_prompt: system_prompt(input.preferences, input.pricing, &seller, &competitive_offers),
        turns: merge_turns(turns),
        competitive_offers,
    }
}

fn history_turn(message: &Message, seller: &str) -> Turn {
    match message.sender {
        Sender::User => Turn::user(format!("User's draft message: {}", message.content)),
        Sender::Agent => Turn::assistant(message.content.clone()),
        Sender::Seller => Turn::user(format!("Seller ({seller}) said: {}", message.content)),
    }
}

/// Joins adjacent same-role turns and drops leading assistant turns so the
/// sequence strictly alternates starting with the user.
pub fn merge_turns(turns: Vec<Turn>) -> Vec<Turn> {
    let mut merged: Vec<Turn> = Vec::with_capacity(turns.len());

    for turn in turns {
        if merged.is_empty() && turn.role == Role::Assistant {
            continue;
        }
        match merged.last_mut() {
            Some(last) if last.role == turn.role => {
                last.text.push_str("\n\n");
                last.text.push_str(&turn.text);
            }
            _ => merged.push(turn),
        }
    }

    merged
}

fn system_prompt(
    preferences: &VehiclePreferences,
    table: &BrandMarginTable,
    seller: &str,
    offers: &[CompetitiveOffer],
) -> String {
    let mut prompt = String::from(
        "You are an expert car negotiation assistant helping a buyer communicate with car sellers.\n\
         Your goal is to secure the best possible deal while keeping communication professional and respectful.\n",
    );

    let requirements: Vec<String> = [
        preferences.year.map(|year| format!("- Year: {year}")),
        preferences.make.as_ref().map(|make| format!("- Make: {make}")),
        preferences.model.as_ref().map(|model| format!("- Model: {model}")),
        preferences.body_type.as_ref().map(|body| format!("- Body type: {body}")),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !requirements.is_empty() {
        prompt.push_str("\nUser's Requirements:\n");
        prompt.push_str(&requirements.join("\n"));
        prompt.push('\n');
    }

    if let Some(reference) = pricing_reference(preferences, table) {
        prompt.push_str(&reference);
    }

    prompt.push_str(&format!("\nCurrent Seller: {seller}\n"));

    if !offers.is_empty() {
        prompt.push_str("\nCompetitive Context - Offers from Other Sellers:\n");
        for offer in offers {
            prompt.push_str(&format!("- {}: {}\n", offer.seller, offer.offer_text));
        }
        prompt.push_str(
            "\nUse these offers as leverage in the negotiation. Reference competing offers without \
             revealing which seller made which offer (for example \"I have another dealer offering...\").\n",
        );
    }

    prompt.push_str(
        "\nGuidelines:\n\
         - Negotiate within the user's stated requirements\n\
         - Be firm but polite\n\
         - Keep responses around 500 characters unless the user asks for something longer\n\
         - When asked to draft a message, return ONLY the message content with no preamble or commentary\n",
    );

    prompt
}

fn pricing_reference(preferences: &VehiclePreferences, table: &BrandMarginTable) -> Option<String> {
    let make = preferences.make.as_deref().filter(|make| !make.trim().is_empty())?;
    let msrp = preferences.msrp.filter(|msrp| *msrp > Decimal::ZERO)?;
    let body_type = preferences.body_type.as_deref().unwrap_or_default();

    let estimate = pricing::estimate(table, msrp, make, body_type);
    let mut reference = String::from("\nPricing Reference (estimates for the buyer, never quote as fact):\n");
    reference.push_str(&format!("- MSRP: {}\n", usd(estimate.msrp)));
    if estimate.direct_to_consumer {
        reference.push_str("- Sold direct to consumer: no dealer invoice or holdback\n");
    } else {
        reference.push_str(&format!("- Estimated invoice: {}\n", usd(estimate.invoice)));
        reference.push_str(&format!(
            "- Estimated holdback: {} ({})\n",
            usd(estimate.holdback),
            estimate.holdback_base.label()
        ));
        reference.push_str(&format!("- Estimated net-net: {}\n", usd(estimate.net_net)));
    }
    Some(reference)
}

fn usd(value: Decimal) -> String {
    format!("${}", value.round_dp(2))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use rust_decimal::Decimal;

    use super::{assemble, merge_turns, ContextInput, Role, Turn};
    use crate::domain::buyer::{BuyerId, VehiclePreferences};
    use crate::domain::message::{Message, MessageId, Sender};
    use crate::domain::offer::{OfferId, SellerOffer, TrackedOffer};
    use crate::domain::thread::{SellerType, Thread, ThreadId};
    use crate::pricing::BrandMarginTable;

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn thread() -> Thread {
        Thread::new(
            ThreadId("T-1".to_string()),
            BuyerId("B-1".to_string()),
            "Bay Toyota",
            SellerType::Dealership,
            None,
            ts("2026-03-01T12:00:00Z"),
        )
        .expect("thread")
    }

    fn message(index: i64, sender: Sender, content: &str) -> Message {
        Message::chat(
            MessageId(format!("M-{index}")),
            BuyerId("B-1".to_string()),
            ThreadId("T-1".to_string()),
            sender,
            content,
            ts("2026-03-01T12:00:00Z") + Duration::minutes(index),
        )
    }

    fn preferences() -> VehiclePreferences {
        VehiclePreferences {
            year: Some(2025),
            make: Some("Toyota".to_string()),
            model: Some("Camry".to_string()),
            body_type: Some("Sedan".to_string()),
            msrp: Some(Decimal::from(40_000)),
        }
    }

    fn offer(text: &str, seller: Option<&str>) -> SellerOffer {
        SellerOffer {
            offer: TrackedOffer::new(
                OfferId(format!("O-{text}")),
                ThreadId("T-2".to_string()),
                None,
                text,
                ts("2026-03-01T12:00:00Z"),
            )
            .expect("offer"),
            seller_display_name: seller.map(str::to_string),
            seller_type: None,
        }
    }

    #[test]
    fn history_is_reversed_and_mapped_by_sender() {
        let table = BrandMarginTable::standard();
        let thread = thread();
        let preferences = preferences();
        let history_desc = vec![
            message(3, Sender::Agent, "Counter at $31k"),
            message(2, Sender::Seller, "Best I can do is $33k"),
            message(1, Sender::User, "Is $30k possible?"),
        ];

        let context = assemble(ContextInput {
            thread: &thread,
            preferences: &preferences,
            pricing: &table,
            history_desc,
            offers: &[],
            user_text: "Push harder",
        });

        assert_eq!(context.turns.len(), 3);
        assert_eq!(context.turns[0].role, Role::User);
        assert_eq!(
            context.turns[0].text,
            "User's draft message: Is $30k possible?\n\nSeller (Bay Toyota) said: Best I can do is $33k"
        );
        assert_eq!(context.turns[1], Turn { role: Role::Assistant, text: "Counter at $31k".to_string() });
        assert_eq!(
            context.turns[2].text,
            "Here is the users message: \"Push harder\" . In this thread they are negotiating with Bay Toyota. Assist the user with their request"
        );
    }

    #[test]
    fn history_is_capped_to_most_recent_ten() {
        let table = BrandMarginTable::standard();
        let thread = thread();
        let preferences = VehiclePreferences::default();
        let history_desc: Vec<Message> = (0..15)
            .rev()
            .map(|index| message(index, Sender::Seller, &format!("msg {index}")))
            .collect();

        let context = assemble(ContextInput {
            thread: &thread,
            preferences: &preferences,
            pricing: &table,
            history_desc,
            offers: &[],
            user_text: "hi",
        });

        assert_eq!(context.turns.len(), 1);
        assert!(context.turns[0].text.starts_with("Seller (Bay Toyota) said: msg 5\n\n"));
        assert!(!context.turns[0].text.contains("msg 4\n"));
    }

    #[test]
    fn system_prompt_carries_preferences_pricing_and_offers() {
        let table = BrandMarginTable::standard();
        let thread = thread();
        let preferences = preferences();
        let offers = vec![offer("$29,900 OTD", Some("Valley Toyota")), offer("$30,500", None)];

        let context = assemble(ContextInput {
            thread: &thread,
            preferences: &preferences,
            pricing: &table,
            history_desc: Vec::new(),
            offers: &offers,
            user_text: "hi",
        });

        let prompt = &context.system_prompt;
        assert!(prompt.contains("- Make: Toyota"));
        assert!(prompt.contains("- Estimated invoice: $37200"));
        assert!(prompt.contains("Current Seller: Bay Toyota"));
        assert!(prompt.contains("- Valley Toyota: $29,900 OTD"));
        assert!(prompt.contains("- Unknown Seller: $30,500"));
        assert!(prompt.contains("without revealing which seller"));
        assert_eq!(context.competitive_offers.len(), 2);
    }

    #[test]
    fn pricing_reference_needs_make_and_msrp() {
        let table = BrandMarginTable::standard();
        let thread = thread();
        let preferences = VehiclePreferences { msrp: None, ..preferences() };

        let context = assemble(ContextInput {
            thread: &thread,
            preferences: &preferences,
            pricing: &table,
            history_desc: Vec::new(),
            offers: &[],
            user_text: "hi",
        });

        assert!(!context.system_prompt.contains("Pricing Reference"));
        assert!(!context.system_prompt.contains("Competitive Context"));
    }

    #[test]
    fn merge_drops_leading_assistant_and_joins_runs() {
        let merged = merge_turns(vec![
            Turn { role: Role::Assistant, text: "stale".to_string() },
            Turn { role: Role::User, text: "a".to_string() },
            Turn { role: Role::User, text: "b".to_string() },
            Turn { role: Role::Assistant, text: "c".to_string() },
            Turn { role: Role::Assistant, text: "d".to_string() },
            Turn { role: Role::User, text: "e".to_string() },
        ]);

        assert_eq!(
            merged,
            vec![
                Turn { role: Role::User, text: "a\n\nb".to_string() },
                Turn { role: Role::Assistant, text: "c\n\nd".to_string() },
                Turn { role: Role::User, text: "e".to_string() },
            ]
        );
    }
}
