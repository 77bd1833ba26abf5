//! Ingress dialect adapters (spec Component I).
//!
//! Each submodule decodes one wire dialect's chat-completion-shaped JSON
//! body into a [`crate::model::GatewayRequest`] and encodes a
//! [`crate::model::GatewayResponse`] / [`crate::model::StreamChunk`] /
//! [`crate::error::GatewayError`] back into that dialect's native shape.
//! Every function here is pure and stateless: no I/O, no provider calls.

pub mod anthropic;
pub mod gemini;
pub mod litellm;
pub mod openai;

use serde_json::Value;

use crate::error::GatewayError;
use crate::model::{GatewayRequest, GatewayResponse, StreamChunk};

/// Decode/encode boundary for one ingress wire dialect.
pub trait Dialect {
    fn decode_request(body: &[u8]) -> Result<GatewayRequest, GatewayError>;
    fn encode_response(resp: &GatewayResponse) -> Value;
    fn encode_stream_chunk(chunk: &StreamChunk, model: &str) -> Value;
    fn encode_error(err: &GatewayError) -> Value;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectKind {
    OpenAi,
    Anthropic,
    Gemini,
    LiteLlm,
}

pub fn decode_request(kind: DialectKind, body: &[u8]) -> Result<GatewayRequest, GatewayError> {
    match kind {
        DialectKind::OpenAi => openai::OpenAiDialect::decode_request(body),
        DialectKind::Anthropic => anthropic::AnthropicDialect::decode_request(body),
        DialectKind::Gemini => gemini::GeminiDialect::decode_request(body),
        DialectKind::LiteLlm => litellm::LiteLlmDialect::decode_request(body),
    }
}

pub fn encode_response(kind: DialectKind, resp: &GatewayResponse) -> Value {
    match kind {
        DialectKind::OpenAi => openai::OpenAiDialect::encode_response(resp),
        DialectKind::Anthropic => anthropic::AnthropicDialect::encode_response(resp),
        DialectKind::Gemini => gemini::GeminiDialect::encode_response(resp),
        DialectKind::LiteLlm => litellm::LiteLlmDialect::encode_response(resp),
    }
}

pub fn encode_error(kind: DialectKind, err: &GatewayError) -> Value {
    match kind {
        DialectKind::OpenAi => openai::OpenAiDialect::encode_error(err),
        DialectKind::Anthropic => anthropic::AnthropicDialect::encode_error(err),
        DialectKind::Gemini => gemini::GeminiDialect::encode_error(err),
        DialectKind::LiteLlm => litellm::LiteLlmDialect::encode_error(err),
    }
}

pub fn encode_stream_chunk(kind: DialectKind, chunk: &StreamChunk, model: &str) -> Value {
    match kind {
        DialectKind::OpenAi => openai::OpenAiDialect::encode_stream_chunk(chunk, model),
        DialectKind::Anthropic => anthropic::AnthropicDialect::encode_stream_chunk(chunk, model),
        DialectKind::Gemini => gemini::GeminiDialect::encode_stream_chunk(chunk, model),
        DialectKind::LiteLlm => litellm::LiteLlmDialect::encode_stream_chunk(chunk, model),
    }
}
