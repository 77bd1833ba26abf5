use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::error::{ErrorKind, GatewayError};
use crate::model::{ContentPart, FinishReason, GatewayRequest, GatewayResponse, Message, Modality, Role, StreamChunk, ToolSpec, Usage};

use super::Dialect;

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireTool {
    #[serde(rename = "type")]
    _type: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct WireRequest {
    model: String,
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    max_completion_tokens: Option<u32>,
    #[serde(default)]
    tools: Vec<WireTool>,
    #[serde(default)]
    stop: Option<Vec<String>>,
    #[serde(default)]
    stream: bool,
}

fn role_from_wire(role: &str) -> Result<Role, GatewayError> {
    match role {
        "system" | "developer" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" | "function" => Ok(Role::Tool),
        other => Err(GatewayError::new(
            ErrorKind::InvalidRequest,
            format!("unsupported message role '{other}'"),
        )),
    }
}

fn content_from_wire(content: Option<Value>) -> Vec<ContentPart> {
    match content {
        Some(Value::String(text)) => vec![ContentPart::Text { text }],
        Some(Value::Array(parts)) => parts
            .into_iter()
            .filter_map(|part| {
                let obj = part.as_object()?;
                match obj.get("type").and_then(Value::as_str) {
                    Some("text") => obj
                        .get("text")
                        .and_then(Value::as_str)
                        .map(|t| ContentPart::Text { text: t.to_string() }),
                    Some("image_url") => obj
                        .get("image_url")
                        .and_then(|v| v.get("url"))
                        .and_then(Value::as_str)
                        .map(|u| ContentPart::ImageUrl { url: u.to_string() }),
                    _ => None,
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub struct OpenAiDialect;

impl Dialect for OpenAiDialect {
    fn decode_request(body: &[u8]) -> Result<GatewayRequest, GatewayError> {
        let wire: WireRequest = serde_json::from_slice(body)
            .map_err(|e| GatewayError::new(ErrorKind::InvalidRequest, format!("invalid openai request body: {e}")))?;

        let mut messages = Vec::with_capacity(wire.messages.len());
        for m in wire.messages {
            messages.push(Message {
                role: role_from_wire(&m.role)?,
                content: content_from_wire(m.content),
                name: m.name,
            });
        }

        let tools = wire
            .tools
            .into_iter()
            .map(|t| ToolSpec {
                name: t.function.name,
                description: t.function.description,
                parameters: t.function.parameters,
            })
            .collect();

        Ok(GatewayRequest {
            modality: if wire.stream {
                Modality::ChatCompletionStream
            } else {
                Modality::ChatCompletion
            },
            model: wire.model,
            messages,
            input: None,
            temperature: wire.temperature,
            top_p: wire.top_p,
            max_tokens: wire.max_tokens.or(wire.max_completion_tokens),
            tools,
            stop: wire.stop,
            stream: wire.stream,
            extra: BTreeMap::new(),
        })
    }

    fn encode_response(resp: &GatewayResponse) -> Value {
        let content = resp
            .message
            .content
            .iter()
            .find_map(|p| match p {
                ContentPart::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default();

        json!({
            "id": format!("chatcmpl-{}", uuid_like()),
            "object": "chat.completion",
            "model": resp.model,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": finish_reason_str(resp.finish_reason),
            }],
            "usage": {
                "prompt_tokens": resp.usage.prompt_tokens,
                "completion_tokens": resp.usage.completion_tokens,
                "total_tokens": resp.usage.total_tokens,
            },
        })
    }

    fn encode_stream_chunk(chunk: &StreamChunk, model: &str) -> Value {
        let content: String = chunk
            .delta
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        json!({
            "id": format!("chatcmpl-{}", uuid_like()),
            "object": "chat.completion.chunk",
            "model": model,
            "choices": [{
                "index": 0,
                "delta": if chunk.is_final { json!({}) } else { json!({ "content": content }) },
                "finish_reason": chunk.finish_reason.map(finish_reason_str),
            }],
        })
    }

    fn encode_error(err: &GatewayError) -> Value {
        json!({
            "error": {
                "message": err.message,
                "type": format!("{:?}", err.kind).to_lowercase(),
                "code": err.provider_code,
            }
        })
    }
}

fn finish_reason_str(reason: Option<FinishReason>) -> Option<&'static str> {
    reason.map(|r| match r {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
        FinishReason::Cancelled => "stop",
    })
}

/// Deterministic placeholder id; a real deployment would use `uuid`.
/// Kept free of time/random sources per this crate's purity requirement.
fn uuid_like() -> &'static str {
    "0"
}

#[allow(dead_code)]
fn unused_usage_hint() -> Usage {
    Usage::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_chat_request() {
        let body = br#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#;
        let req = OpenAiDialect::decode_request(body).unwrap();
        assert_eq!(req.model, "gpt-4o");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
        assert!(!req.stream);
    }

    #[test]
    fn decode_rejects_unknown_role() {
        let body = br#"{"model":"gpt-4o","messages":[{"role":"narrator","content":"hi"}]}"#;
        let err = OpenAiDialect::decode_request(body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn encode_response_round_trips_content() {
        let resp = GatewayResponse {
            model: "gpt-4o".into(),
            message: Message::text(Role::Assistant, "hello"),
            finish_reason: Some(FinishReason::Stop),
            usage: Usage { prompt_tokens: 1, completion_tokens: 2, total_tokens: 3 },
            extra: BTreeMap::new(),
        };
        let encoded = OpenAiDialect::encode_response(&resp);
        assert_eq!(encoded["choices"][0]["message"]["content"], "hello");
        assert_eq!(encoded["usage"]["total_tokens"], 3);
    }
}
