use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::error::{ErrorKind, GatewayError};
use crate::model::{ContentPart, FinishReason, GatewayRequest, GatewayResponse, Message, Modality, Role, StreamChunk};

use super::Dialect;

#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    role: String,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize, Default)]
struct WireGenerationConfig {
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    max_output_tokens: Option<u32>,
    #[serde(default)]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct WireRequest {
    #[serde(default)]
    contents: Vec<WireContent>,
    #[serde(default)]
    generation_config: WireGenerationConfig,
}

pub struct GeminiDialect;

impl GeminiDialect {
    /// Gemini's model name is a path segment, not a body field; callers
    /// supply it separately (mirrors the teacher's route-level extraction
    /// in the proxy router).
    pub fn decode_request_with_model(body: &[u8], model: &str, stream: bool) -> Result<GatewayRequest, GatewayError> {
        let wire: WireRequest = serde_json::from_slice(body)
            .map_err(|e| GatewayError::new(ErrorKind::InvalidRequest, format!("invalid gemini request body: {e}")))?;

        let mut messages = Vec::with_capacity(wire.contents.len());
        for c in wire.contents {
            let role = match c.role.as_str() {
                "user" => Role::User,
                "model" => Role::Assistant,
                other => {
                    return Err(GatewayError::new(
                        ErrorKind::InvalidRequest,
                        format!("unsupported content role '{other}'"),
                    ));
                }
            };
            let content = c
                .parts
                .into_iter()
                .filter_map(|p| p.text.map(|text| ContentPart::Text { text }))
                .collect();
            messages.push(Message { role, content, name: None });
        }

        Ok(GatewayRequest {
            modality: if stream {
                Modality::ChatCompletionStream
            } else {
                Modality::ChatCompletion
            },
            model: model.to_string(),
            messages,
            input: None,
            temperature: wire.generation_config.temperature,
            top_p: wire.generation_config.top_p,
            max_tokens: wire.generation_config.max_output_tokens,
            tools: Vec::new(),
            stop: wire.generation_config.stop_sequences,
            stream,
            extra: BTreeMap::new(),
        })
    }
}

impl Dialect for GeminiDialect {
    fn decode_request(body: &[u8]) -> Result<GatewayRequest, GatewayError> {
        Self::decode_request_with_model(body, "", false)
    }

    fn encode_response(resp: &GatewayResponse) -> Value {
        let text: String = resp
            .message
            .content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": finish_reason_str(resp.finish_reason),
                "index": 0,
            }],
            "usageMetadata": {
                "promptTokenCount": resp.usage.prompt_tokens,
                "candidatesTokenCount": resp.usage.completion_tokens,
                "totalTokenCount": resp.usage.total_tokens,
            },
        })
    }

    fn encode_stream_chunk(chunk: &StreamChunk, _model: &str) -> Value {
        let text: String = chunk
            .delta
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": chunk.finish_reason.and_then(finish_reason_str),
                "index": 0,
            }],
        })
    }

    fn encode_error(err: &GatewayError) -> Value {
        json!({
            "error": {
                "code": err.http_status,
                "message": err.message,
                "status": format!("{:?}", err.kind).to_uppercase(),
            }
        })
    }
}

fn finish_reason_str(reason: Option<FinishReason>) -> Option<&'static str> {
    reason.map(|r| match r {
        FinishReason::Stop => "STOP",
        FinishReason::Length => "MAX_TOKENS",
        FinishReason::ToolCalls => "STOP",
        FinishReason::ContentFilter => "SAFETY",
        FinishReason::Cancelled => "STOP",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_contents_with_model_role() {
        let body = br#"{"contents":[{"role":"user","parts":[{"text":"hi"}]}]}"#;
        let req = GeminiDialect::decode_request_with_model(body, "gemini-2.0-flash", false).unwrap();
        assert_eq!(req.model, "gemini-2.0-flash");
        assert_eq!(req.messages[0].role, Role::User);
    }
}
