use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use haggle_core::context::NegotiationContext;
use haggle_core::errors::DomainError;

use crate::guardrails::finalize_reply;
use crate::llm::{GenerationError, ResponseGenerator};

/// Wraps a generator with the request deadline and draft cleanup.
#[derive(Clone)]
pub struct NegotiationAgent {
    generator: Arc<dyn ResponseGenerator>,
    timeout: Duration,
}

impl NegotiationAgent {
    pub fn new(generator: Arc<dyn ResponseGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    pub fn provider(&self) -> &'static str {
        self.generator.provider()
    }

    /// Runs outside any storage transaction; the caller persists the user turn first.
    pub async fn respond(
        &self,
        context: &NegotiationContext,
        correlation_id: &str,
    ) -> Result<String, DomainError> {
        let outcome = match tokio::time::timeout(self.timeout, self.generator.generate(context)).await {
            Ok(result) => result.and_then(|raw| finalize_reply(&raw)),
            Err(_) => Err(GenerationError::Timeout(self.timeout.as_secs())),
        };

        match outcome {
            Ok(reply) => {
                info!(
                    event_name = "agent.reply.generated",
                    correlation_id,
                    provider = self.provider(),
                    turns = context.turns.len(),
                    reply_chars = reply.chars().count(),
                    "negotiation reply generated"
                );
                Ok(reply)
            }
            Err(error) => {
                warn!(
                    event_name = "agent.reply.failed",
                    correlation_id,
                    provider = self.provider(),
                    error = %error,
                    "negotiation reply generation failed"
                );
                Err(DomainError::GenerationFailed(error.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use haggle_core::context::{NegotiationContext, Role, Turn};
    use haggle_core::errors::DomainError;

    use super::NegotiationAgent;
    use crate::llm::{GenerationError, ResponseGenerator};

    struct Scripted(&'static str);

    #[async_trait]
    impl ResponseGenerator for Scripted {
        async fn generate(&self, _context: &NegotiationContext) -> Result<String, GenerationError> {
            Ok(self.0.to_string())
        }

        fn provider(&self) -> &'static str {
            "scripted"
        }
    }

    struct Unavailable;

    #[async_trait]
    impl ResponseGenerator for Unavailable {
        async fn generate(&self, _context: &NegotiationContext) -> Result<String, GenerationError> {
            Err(GenerationError::Status { status: 529, body: "overloaded".to_string() })
        }

        fn provider(&self) -> &'static str {
            "unavailable"
        }
    }

    struct Stalled;

    #[async_trait]
    impl ResponseGenerator for Stalled {
        async fn generate(&self, _context: &NegotiationContext) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".to_string())
        }

        fn provider(&self) -> &'static str {
            "stalled"
        }
    }

    fn context() -> NegotiationContext {
        NegotiationContext {
            system_prompt: "negotiate".to_string(),
            turns: vec![Turn { role: Role::User, text: "help".to_string() }],
            competitive_offers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn replies_are_cleaned_before_returning() {
        let agent = NegotiationAgent::new(
            Arc::new(Scripted("Here's the draft: Would you take $31,000?")),
            Duration::from_secs(5),
        );
        let reply = agent.respond(&context(), "req-1").await.expect("reply");
        assert_eq!(reply, "Would you take $31,000?");
    }

    #[tokio::test]
    async fn provider_errors_and_empty_drafts_become_generation_failures() {
        let agent = NegotiationAgent::new(Arc::new(Unavailable), Duration::from_secs(5));
        let error = agent.respond(&context(), "req-2").await.expect_err("fails");
        assert!(matches!(error, DomainError::GenerationFailed(ref detail) if detail.contains("529")));

        let agent = NegotiationAgent::new(Arc::new(Scripted("Draft message:")), Duration::from_secs(5));
        assert!(matches!(
            agent.respond(&context(), "req-3").await,
            Err(DomainError::GenerationFailed(_))
        ));
    }

    #[tokio::test]
    async fn slow_generators_time_out() {
        let agent = NegotiationAgent::new(Arc::new(Stalled), Duration::from_millis(20));
        let error = agent.respond(&context(), "req-4").await.expect_err("times out");
        assert!(matches!(error, DomainError::GenerationFailed(ref detail) if detail.contains("timed out")));
    }
}
