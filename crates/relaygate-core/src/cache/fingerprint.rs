use relaygate_protocol::GatewayRequest;

/// Stable cache key (spec §4.H): a hash of `(provider, model, normalized
/// params including extra-params sorted, input payload)`. `extra` is
/// already a `BTreeMap` and `fingerprint_projection()` only includes
/// answer-affecting fields, so `serde_json::to_vec` on the projection is
/// already deterministic — no manual key sorting needed here.
pub fn fingerprint(req: &GatewayRequest) -> String {
    let projection = req.fingerprint_projection();
    let bytes = serde_json::to_vec(&projection).expect("fingerprint projection always serializes");
    blake3::hash(&bytes).to_hex().to_string()
}

/// The text a semantic embedder should see: the latest user-authored
/// content, concatenated. Never includes system/assistant history, so two
/// requests that differ only in system prompt but ask the same question
/// still land near each other in embedding space.
pub fn user_visible_text(req: &GatewayRequest) -> String {
    if let Some(input) = &req.input {
        return input.clone();
    }
    req.messages
        .iter()
        .rev()
        .find(|m| m.role == relaygate_protocol::Role::User)
        .map(|m| {
            m.content
                .iter()
                .filter_map(|part| match part {
                    relaygate_protocol::ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_protocol::{Message, Modality, Role};
    use std::collections::BTreeMap;

    fn req(temp: Option<f64>) -> GatewayRequest {
        GatewayRequest {
            modality: Modality::ChatCompletion,
            model: "openai/gpt-4o".into(),
            messages: vec![Message::text(Role::User, "hi")],
            input: None,
            temperature: temp,
            top_p: None,
            max_tokens: None,
            tools: Vec::new(),
            stop: None,
            stream: false,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn identical_requests_fingerprint_identically() {
        assert_eq!(fingerprint(&req(Some(0.5))), fingerprint(&req(Some(0.5))));
    }

    #[test]
    fn differing_params_fingerprint_differently() {
        assert_ne!(fingerprint(&req(Some(0.5))), fingerprint(&req(Some(0.6))));
    }

    #[test]
    fn user_visible_text_ignores_system_messages() {
        let mut r = req(None);
        r.messages.insert(0, Message::text(Role::System, "be nice"));
        assert_eq!(user_visible_text(&r), "hi");
    }
}
