use serde_json::Value;

use crate::error::GatewayError;
use crate::model::{GatewayRequest, GatewayResponse, StreamChunk};

use super::Dialect;
use super::openai::OpenAiDialect;

/// LiteLLM's wire shape is OpenAI's chat-completion JSON with the
/// "provider/model" convention already baked into the `model` field
/// (e.g. `"anthropic/claude-3-5-sonnet"`), so decode/encode only need to
/// delegate; [`crate::model::split_provider_model`] handles the rest.
pub struct LiteLlmDialect;

impl Dialect for LiteLlmDialect {
    fn decode_request(body: &[u8]) -> Result<GatewayRequest, GatewayError> {
        OpenAiDialect::decode_request(body)
    }

    fn encode_response(resp: &GatewayResponse) -> Value {
        OpenAiDialect::encode_response(resp)
    }

    fn encode_stream_chunk(chunk: &StreamChunk, model: &str) -> Value {
        OpenAiDialect::encode_stream_chunk(chunk, model)
    }

    fn encode_error(err: &GatewayError) -> Value {
        OpenAiDialect::encode_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_provider_prefixed_model() {
        let body = br#"{"model":"anthropic/claude-3-5-sonnet","messages":[{"role":"user","content":"hi"}]}"#;
        let req = LiteLlmDialect::decode_request(body).unwrap();
        assert_eq!(req.model, "anthropic/claude-3-5-sonnet");
    }
}
