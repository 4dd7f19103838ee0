//! Channel plumbing between provider webhooks, storage and provider APIs.
//!
//! `ingest` admits normalized inbound messages, `dispatch` sends buyer
//! replies back out over email or SMS, and `provisioning` allocates the
//! buyer's SMS number.

pub mod dispatch;
pub mod ingest;
pub mod provisioning;

pub use dispatch::{
    email_sender, sms_sender, DispatchError, DispatchOutcome, EmailSender, GmailSender,
    OutboundDispatcher, SmsSender, TwilioSmsSender, UnconfiguredSender,
};
pub use ingest::{InboundIngestor, IngestError, IngestOutcome};
pub use provisioning::{
    number_provider, PhoneNumberProvider, PhoneProvisioner, ProvisionError, PurchasedNumber,
    TwilioNumberProvider,
};
