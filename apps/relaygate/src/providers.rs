//! An illustrative in-memory [`Provider`] implementation. Real wire
//! adapters (one per upstream vendor) are out of scope here — this crate
//! only needs something that satisfies the trait so the scheduler/registry
//! wiring has a concrete collaborator to dispatch through. Grounded on
//! `relaygate-provider-core`'s own `FlakyProvider` test fixture.

use async_trait::async_trait;
use relaygate_protocol::{FinishReason, GatewayError, GatewayRequest, GatewayResponse, Message, Role, Usage};
use relaygate_provider_core::{DownstreamContext, Key, Provider, ProviderOutcome};

pub struct EchoProvider {
    name: String,
}

impl EchoProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, req: GatewayRequest, _key: &Key, _ctx: DownstreamContext) -> Result<ProviderOutcome, GatewayError> {
        let last_user_text = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| {
                m.content
                    .iter()
                    .filter_map(|part| match part {
                        relaygate_protocol::ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let prompt_tokens = last_user_text.split_whitespace().count() as u64;
        let reply = format!("echo: {last_user_text}");
        let completion_tokens = reply.split_whitespace().count() as u64;

        Ok(ProviderOutcome::Complete(GatewayResponse {
            model: req.model,
            message: Message::text(Role::Assistant, reply),
            finish_reason: Some(FinishReason::Stop),
            usage: Usage { prompt_tokens, completion_tokens, total_tokens: prompt_tokens + completion_tokens },
            extra: Default::default(),
        }))
    }
}
