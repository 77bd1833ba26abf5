use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::error::{ErrorKind, GatewayError};
use crate::model::{ContentPart, FinishReason, GatewayRequest, GatewayResponse, Message, Modality, Role, StreamChunk, ToolSpec};

use super::Dialect;

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: String,
    content: Value,
}

#[derive(Debug, Deserialize)]
struct WireTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct WireRequest {
    model: String,
    #[serde(default)]
    system: Option<Value>,
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    tools: Vec<WireTool>,
    #[serde(default)]
    stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    stream: bool,
}

fn content_from_wire(content: Value) -> Vec<ContentPart> {
    match content {
        Value::String(text) => vec![ContentPart::Text { text }],
        Value::Array(parts) => parts
            .into_iter()
            .filter_map(|part| {
                let obj = part.as_object()?;
                match obj.get("type").and_then(Value::as_str) {
                    Some("text") => obj
                        .get("text")
                        .and_then(Value::as_str)
                        .map(|t| ContentPart::Text { text: t.to_string() }),
                    Some("tool_use") => Some(ContentPart::ToolUse {
                        id: obj.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                        name: obj.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                        input: obj.get("input").cloned().unwrap_or(Value::Null),
                    }),
                    Some("tool_result") => Some(ContentPart::ToolResult {
                        tool_use_id: obj
                            .get("tool_use_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        content: obj.get("content").and_then(Value::as_str).unwrap_or_default().to_string(),
                        is_error: obj.get("is_error").and_then(Value::as_bool).unwrap_or(false),
                    }),
                    _ => None,
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub struct AnthropicDialect;

impl Dialect for AnthropicDialect {
    fn decode_request(body: &[u8]) -> Result<GatewayRequest, GatewayError> {
        let wire: WireRequest = serde_json::from_slice(body)
            .map_err(|e| GatewayError::new(ErrorKind::InvalidRequest, format!("invalid anthropic request body: {e}")))?;

        let mut messages = Vec::new();
        if let Some(system) = wire.system {
            let text = match system {
                Value::String(s) => s,
                other => other.to_string(),
            };
            messages.push(Message::text(Role::System, text));
        }
        for m in wire.messages {
            let role = match m.role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                other => {
                    return Err(GatewayError::new(
                        ErrorKind::InvalidRequest,
                        format!("unsupported message role '{other}'"),
                    ));
                }
            };
            messages.push(Message {
                role,
                content: content_from_wire(m.content),
                name: None,
            });
        }

        let tools = wire
            .tools
            .into_iter()
            .map(|t| ToolSpec {
                name: t.name,
                description: t.description,
                parameters: t.input_schema,
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
            max_tokens: wire.max_tokens,
            tools,
            stop: wire.stop_sequences,
            stream: wire.stream,
            extra: BTreeMap::new(),
        })
    }

    fn encode_response(resp: &GatewayResponse) -> Value {
        let content: Vec<Value> = resp
            .message
            .content
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                ContentPart::ToolUse { id, name, input } => {
                    json!({ "type": "tool_use", "id": id, "name": name, "input": input })
                }
                ContentPart::ToolResult { tool_use_id, content, is_error } => {
                    json!({ "type": "tool_result", "tool_use_id": tool_use_id, "content": content, "is_error": is_error })
                }
                ContentPart::ImageUrl { url } => json!({ "type": "text", "text": url }),
            })
            .collect();

        json!({
            "id": "msg_0",
            "type": "message",
            "role": "assistant",
            "model": resp.model,
            "content": content,
            "stop_reason": stop_reason_str(resp.finish_reason),
            "usage": {
                "input_tokens": resp.usage.prompt_tokens,
                "output_tokens": resp.usage.completion_tokens,
            },
        })
    }

    fn encode_stream_chunk(chunk: &StreamChunk, _model: &str) -> Value {
        if chunk.is_final {
            return json!({
                "type": "message_delta",
                "delta": { "stop_reason": stop_reason_str(chunk.finish_reason) },
                "usage": {
                    "output_tokens": chunk.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
                },
            });
        }
        let text: String = chunk
            .delta
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": text },
        })
    }

    fn encode_error(err: &GatewayError) -> Value {
        json!({
            "type": "error",
            "error": {
                "type": format!("{:?}", err.kind).to_lowercase(),
                "message": err.message,
            }
        })
    }
}

fn stop_reason_str(reason: Option<FinishReason>) -> Option<&'static str> {
    reason.map(|r| match r {
        FinishReason::Stop => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
        FinishReason::ContentFilter => "end_turn",
        FinishReason::Cancelled => "end_turn",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_system_plus_user_message() {
        let body = br#"{"model":"claude-3","system":"be terse","max_tokens":100,"messages":[{"role":"user","content":"hi"}]}"#;
        let req = AnthropicDialect::decode_request(body).unwrap();
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[1].role, Role::User);
    }
}
