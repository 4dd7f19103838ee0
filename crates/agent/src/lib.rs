//! Negotiation response generation.
//!
//! The model only drafts wording. It receives a fully assembled
//! [`NegotiationContext`](haggle_core::context::NegotiationContext) and never
//! decides which thread, buyer or offer a reply belongs to.
//!
//! - `llm`: the [`ResponseGenerator`](llm::ResponseGenerator) seam plus HTTP
//!   clients for Anthropic and Ollama.
//! - `conversation`: provider request bodies and response extraction.
//! - `guardrails`: cleanup applied to every draft before it is stored.
//! - `runtime`: timeout and error mapping around a generator.

pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod runtime;

pub use llm::{build_generator, GenerationError, ResponseGenerator};
pub use runtime::NegotiationAgent;
