//! Domain core for the haggle negotiation backend.
//!
//! Everything here is synchronous and storage-agnostic: payload
//! normalization, negotiation context assembly, dealer cost estimation,
//! reply planning and the provisioning task state machine. Persistence lives
//! in `haggle-db`, transports in `haggle-channels`, generation in
//! `haggle-agent`.

pub mod channels;
pub mod config;
pub mod context;
pub mod domain;
pub mod errors;
pub mod outbound;
pub mod pricing;
pub mod provisioning;

pub use channels::{normalize_email, normalize_sms, EmailPayload, InboundMessage, SmsPayload};
pub use context::{assemble, ContextInput, NegotiationContext, Role, Turn};
pub use domain::buyer::{Buyer, BuyerId, VehiclePreferences};
pub use domain::message::{
    Channel, ExternalMessageId, Message, MessageId, MessagePage, PageRequest, Sender,
};
pub use domain::offer::{OfferId, SellerOffer, TrackedOffer};
pub use domain::provisioning::{ProvisioningKind, ProvisioningTask, ProvisioningTaskState};
pub use domain::thread::{SellerType, Thread, ThreadId, ThreadSummary};
pub use domain::RecordStatus;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use outbound::{EmailReply, SmsReply};
pub use pricing::{BrandMarginTable, PriceEstimate};
pub use provisioning::ProvisioningEngine;
