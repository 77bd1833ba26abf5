use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The operation a [`GatewayRequest`] asks a provider to perform.
///
/// Each variant names both the non-streaming and (where applicable)
/// streaming shape of one operation; `Stream` fields carry the same payload
/// as their non-stream sibling plus a `stream: true` marker honored by
/// dialect encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    TextCompletion,
    ChatCompletion,
    ChatCompletionStream,
    Responses,
    ResponsesStream,
    Embedding,
    Speech,
    SpeechStream,
    Transcription,
    TranscriptionStream,
}

impl Modality {
    pub fn is_streaming(self) -> bool {
        matches!(
            self,
            Modality::ChatCompletionStream
                | Modality::ResponsesStream
                | Modality::SpeechStream
                | Modality::TranscriptionStream
        )
    }

    /// The non-streaming modality that shares this one's payload shape.
    pub fn base(self) -> Modality {
        match self {
            Modality::ChatCompletionStream => Modality::ChatCompletion,
            Modality::ResponsesStream => Modality::Responses,
            Modality::SpeechStream => Modality::Speech,
            Modality::TranscriptionStream => Modality::Transcription,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { url: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String, is_error: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text { text: text.into() }],
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Cancelled,
}

/// The normalized request shape every component downstream of ingress
/// decoding operates on, regardless of which wire dialect it arrived in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub modality: Modality,
    /// "provider/model" convention; provider may be empty when resolved
    /// later by the fallback driver's first target.
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    /// Fields the dialect defined but this model does not name explicitly;
    /// round-tripped through encode() for the originating dialect so
    /// provider-specific knobs are never silently dropped.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl GatewayRequest {
    /// A stable projection used for cache-key fingerprinting: only the
    /// fields that affect the answer, in deterministic (BTreeMap) order.
    pub fn fingerprint_projection(&self) -> Value {
        serde_json::json!({
            "modality": self.modality.base(),
            "model": self.model,
            "messages": self.messages,
            "input": self.input,
            "temperature": self.temperature,
            "top_p": self.top_p,
            "max_tokens": self.max_tokens,
            "tools": self.tools,
            "stop": self.stop,
            "extra": self.extra,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub model: String,
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    pub usage: Usage,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// One piece of a streaming answer. `chunk_index` is assigned by the
/// streaming pipeline (§4.G) and strictly increases within a stream;
/// exactly one chunk in a stream has `is_final = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub chunk_index: u64,
    pub delta: Vec<ContentPart>,
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn text(chunk_index: u64, text: impl Into<String>) -> Self {
        Self {
            chunk_index,
            delta: vec![ContentPart::Text { text: text.into() }],
            is_final: false,
            finish_reason: None,
            usage: None,
        }
    }

    pub fn terminal(chunk_index: u64, finish_reason: FinishReason, usage: Usage) -> Self {
        Self {
            chunk_index,
            delta: Vec::new(),
            is_final: true,
            finish_reason: Some(finish_reason),
            usage: Some(usage),
        }
    }
}

/// Splits a "provider/model" string into its two halves. A request whose
/// model has no "/" is treated as provider-less: the fallback driver's
/// first target supplies the provider.
pub fn split_provider_model(spec: &str) -> (Option<&str>, &str) {
    match spec.split_once('/') {
        Some((provider, model)) => (Some(provider), model),
        None => (None, spec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_provider_model_with_slash() {
        assert_eq!(split_provider_model("openai/gpt-4o"), (Some("openai"), "gpt-4o"));
    }

    #[test]
    fn split_provider_model_without_slash() {
        assert_eq!(split_provider_model("gpt-4o"), (None, "gpt-4o"));
    }

    #[test]
    fn fingerprint_projection_ignores_stream_flag() {
        let mut a = GatewayRequest {
            modality: Modality::ChatCompletion,
            model: "openai/gpt-4o".into(),
            messages: vec![Message::text(Role::User, "hi")],
            input: None,
            temperature: Some(0.0),
            top_p: None,
            max_tokens: None,
            tools: Vec::new(),
            stop: None,
            stream: false,
            extra: BTreeMap::new(),
        };
        let mut b = a.clone();
        b.stream = true;
        b.modality = Modality::ChatCompletionStream;
        assert_eq!(a.fingerprint_projection(), b.fingerprint_projection());
        a.temperature = Some(0.1);
        assert_ne!(a.fingerprint_projection(), b.fingerprint_projection());
    }
}
