//! Component H: the content-addressed response cache (spec §4.H).

mod embedder;
mod fingerprint;
mod single_flight;

pub use embedder::{Embedder, InMemoryVectorStore, VectorStore};
pub use fingerprint::fingerprint;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use relaygate_protocol::{GatewayError, GatewayRequest, GatewayResponse};
use serde::Serialize;
use tokio::sync::RwLock;

use fingerprint::user_visible_text;
use single_flight::SingleFlight;

/// Attached to a response's `extra_fields.cache_debug` (spec §4.H) so
/// metrics/UI layers downstream can observe cache effectiveness without
/// re-deriving it.
#[derive(Debug, Clone, Serialize)]
pub struct CacheDebug {
    pub hit: bool,
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

impl CacheDebug {
    fn miss() -> Self {
        Self { hit: false, mode: "miss", similarity: None, threshold: None }
    }

    fn direct_hit() -> Self {
        Self { hit: true, mode: "direct", similarity: None, threshold: None }
    }

    fn semantic_hit(similarity: f64, threshold: f64) -> Self {
        Self { hit: true, mode: "semantic", similarity: Some(similarity), threshold: Some(threshold) }
    }

    pub fn attach(&self, resp: &mut GatewayResponse) {
        if let Ok(value) = serde_json::to_value(self) {
            resp.extra.insert("cache_debug".to_string(), value);
        }
    }
}

struct Entry {
    response: GatewayResponse,
    expires_at: Instant,
}

pub struct SemanticConfig {
    pub embedder: Arc<dyn Embedder>,
    pub vector_store: Arc<dyn VectorStore>,
    pub similarity_threshold: f64,
}

/// Component H. `get_or_compute` is the entry point for unary dispatch: it
/// checks direct and (if configured) semantic mode, and on a full miss runs
/// `compute` under single-flight so concurrent identical requests share one
/// upstream call (spec's testable property 3).
///
/// Streaming responses don't go through `get_or_compute` at all — the
/// streaming pipeline looks up with `lookup` before dispatch and calls
/// `store` itself once the accumulated stream reaches `is_final`, per
/// spec §4.H ("partial streams are not cached"). A streaming single-flight
/// would need to fan one upstream byte stream out to N client streams,
/// which spec §4.H never asks for — only unary lookups single-flight here.
pub struct ResponseCache {
    store: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
    single_flight: SingleFlight,
    semantic: Option<SemanticConfig>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self { store: RwLock::new(HashMap::new()), ttl, single_flight: SingleFlight::new(), semantic: None }
    }

    pub fn with_semantic(mut self, semantic: SemanticConfig) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub async fn lookup(&self, req: &GatewayRequest) -> Option<(GatewayResponse, CacheDebug)> {
        let key = fingerprint(req);
        if let Some(resp) = self.direct_get(&key).await {
            return Some((resp, CacheDebug::direct_hit()));
        }

        let semantic = self.semantic.as_ref()?;
        let text = user_visible_text(req);
        if text.is_empty() {
            return None;
        }
        let vector = semantic.embedder.embed(&text).await.ok()?;
        let (nearest_key, similarity) = semantic.vector_store.query_nearest(&vector).await?;
        if similarity < semantic.similarity_threshold {
            return None;
        }
        let resp = self.direct_get(&nearest_key).await?;
        Some((resp, CacheDebug::semantic_hit(similarity, semantic.similarity_threshold)))
    }

    /// Unary dispatch entry point (spec control flow step "H(lookup)"
    /// through "H(store)"): a cache hit short-circuits `compute` entirely; a
    /// miss single-flights `compute` and stores its result on success.
    pub async fn get_or_compute<F, Fut>(&self, req: &GatewayRequest, compute: F) -> Result<(GatewayResponse, CacheDebug), GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GatewayResponse, GatewayError>>,
    {
        if let Some(hit) = self.lookup(req).await {
            return Ok(hit);
        }

        let key = fingerprint(req);
        let text = user_visible_text(req);
        let resp = self.single_flight.execute(&key, compute).await?;
        self.store(&key, &text, resp.clone()).await;
        Ok((resp, CacheDebug::miss()))
    }

    /// Writes only happen on success (spec §4.H); called directly by the
    /// streaming pipeline once the accumulated stream reaches `is_final`.
    pub async fn store(&self, key: &str, user_text: &str, response: GatewayResponse) {
        self.direct_put(key, response).await;
        if let Some(semantic) = &self.semantic {
            if !user_text.is_empty() {
                if let Ok(vector) = semantic.embedder.embed(user_text).await {
                    semantic.vector_store.upsert(key.to_string(), vector).await;
                }
            }
        }
    }

    pub fn key_and_text(&self, req: &GatewayRequest) -> (String, String) {
        (fingerprint(req), user_visible_text(req))
    }

    async fn direct_get(&self, key: &str) -> Option<GatewayResponse> {
        let store = self.store.read().await;
        let entry = store.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.response.clone())
    }

    async fn direct_put(&self, key: &str, response: GatewayResponse) {
        let mut store = self.store.write().await;
        store.insert(key.to_string(), Entry { response, expires_at: Instant::now() + self.ttl });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedder::InMemoryVectorStore;
    use relaygate_protocol::{ErrorKind, Message, Modality, Role, Usage};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn req(text: &str) -> GatewayRequest {
        GatewayRequest {
            modality: Modality::ChatCompletion,
            model: "openai/gpt-4o".into(),
            messages: vec![Message::text(Role::User, text)],
            input: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            tools: Vec::new(),
            stop: None,
            stream: false,
            extra: BTreeMap::new(),
        }
    }

    fn response(text: &str) -> GatewayResponse {
        GatewayResponse {
            model: "gpt-4o".into(),
            message: Message::text(Role::Assistant, text),
            finish_reason: None,
            usage: Usage::default(),
            extra: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn direct_hit_after_store() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let r = req("capital of france?");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let (resp, debug) = cache
            .get_or_compute(&r, || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(response("Paris"))
            })
            .await
            .unwrap();
        assert!(!debug.hit);
        assert_eq!(resp.message.content.len(), 1);

        let (_resp2, debug2) = cache
            .get_or_compute(&r, || async { Ok(response("should not run")) })
            .await
            .unwrap();
        assert!(debug2.hit);
        assert_eq!(debug2.mode, "direct");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct FixedEmbedder(Vec<f32>);

    #[async_trait::async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, GatewayError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn semantic_hit_above_threshold() {
        let cache = ResponseCache::new(Duration::from_secs(60)).with_semantic(SemanticConfig {
            embedder: Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            vector_store: Arc::new(InMemoryVectorStore::new()),
            similarity_threshold: 0.9,
        });

        let primed = req("What is the capital of France?");
        cache
            .get_or_compute(&primed, || async { Ok(response("Paris")) })
            .await
            .unwrap();

        let follow_up = req("capital of France?");
        let (resp, debug) = cache
            .get_or_compute(&follow_up, || async {
                Err(GatewayError::new(ErrorKind::Internal, "should not reach upstream"))
            })
            .await
            .unwrap();
        assert!(debug.hit);
        assert_eq!(debug.mode, "semantic");
        assert_eq!(resp.message.content.len(), 1);
    }
}
