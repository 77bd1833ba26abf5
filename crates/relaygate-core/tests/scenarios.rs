//! Engine-level integration tests for the literal request/response
//! scenarios the control flow in `engine.rs`'s module doc is meant to
//! satisfy: a fallback after a non-retriable-but-fallback-allowed error,
//! streaming chunk ordering end to end, governance denying a request
//! before any provider is ever called, and the cache's single-flight
//! property observed through `GatewayEngine` rather than `ResponseCache`
//! directly.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relaygate_core::governance::{Budget, VirtualKey};
use relaygate_core::{GatewayEngine, GovernanceGate, GovernanceSnapshot, ResponseCache, StaticPriceTable};
use relaygate_core::engine::DispatchRequest;
use relaygate_protocol::{
    ContentPart, ErrorKind, FinishReason, GatewayError, GatewayRequest, GatewayResponse, Message, Modality, Role,
    StreamChunk, Usage,
};
use relaygate_provider_core::{
    DownstreamContext, Key, KeyPool, EventHub, PluginChain, ProviderOutcome, ProviderRegistry, WorkerPoolScheduler,
};
use relaygate_storage::MemoryStorage;
use tokio::sync::mpsc;

fn chat_request(provider_model: &str, text: &str) -> GatewayRequest {
    GatewayRequest {
        modality: Modality::ChatCompletion,
        model: provider_model.into(),
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

fn ok_response(provider_model: &str) -> ProviderOutcome {
    ProviderOutcome::Complete(GatewayResponse {
        model: provider_model.into(),
        message: Message::text(Role::Assistant, "ok"),
        finish_reason: Some(FinishReason::Stop),
        usage: Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 },
        extra: BTreeMap::new(),
    })
}

/// A provider that counts calls and always fails with a fixed, non-retriable
/// error — so the worker pool returns on the first attempt and any fallback
/// has to come from `FallbackDriver`, not from within-target retry.
struct FailingProvider {
    name: String,
    calls: Arc<AtomicUsize>,
    kind: ErrorKind,
}

#[async_trait]
impl relaygate_provider_core::Provider for FailingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _req: GatewayRequest, _key: &Key, _ctx: DownstreamContext) -> Result<ProviderOutcome, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(GatewayError::new(self.kind, "upstream refused"))
    }
}

/// A provider that counts calls and always succeeds.
struct CountingProvider {
    name: String,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl relaygate_provider_core::Provider for CountingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, req: GatewayRequest, _key: &Key, _ctx: DownstreamContext) -> Result<ProviderOutcome, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // A real upstream has latency; give concurrent dispatches a window
        // in which they'd all miss the cache if single-flight didn't exist.
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(ok_response(&req.model))
    }
}

/// A provider that streams three chunks, reassigned into arrival order by
/// the streaming pipeline regardless of the indices it hands in.
struct StreamingProvider {
    name: String,
}

#[async_trait]
impl relaygate_provider_core::Provider for StreamingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _req: GatewayRequest, _key: &Key, _ctx: DownstreamContext) -> Result<ProviderOutcome, GatewayError> {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            let _ = tx.send(Ok(StreamChunk::text(9, "hello "))).await;
            let _ = tx.send(Ok(StreamChunk::text(9, "world"))).await;
            let _ = tx
                .send(Ok(StreamChunk::terminal(9, FinishReason::Stop, Usage { prompt_tokens: 3, completion_tokens: 2, total_tokens: 5 })))
                .await;
        });
        Ok(ProviderOutcome::Streaming(rx))
    }
}

async fn key_pool_with(provider: &str) -> Arc<KeyPool> {
    let keys = KeyPool::new(EventHub::new(8));
    keys.insert(provider, Key { id: 1, value: "secret".into(), models: Vec::new(), weight: 1.0, provider_config: serde_json::Value::Null })
        .await;
    keys
}

fn engine(registry: ProviderRegistry, keys: Arc<KeyPool>) -> GatewayEngine {
    let scheduler = Arc::new(WorkerPoolScheduler::new(Arc::new(registry), keys));
    let plugins = Arc::new(PluginChain::new(Vec::new()));
    let gate = Arc::new(GovernanceGate::new(Arc::new(GovernanceSnapshot::new()), Arc::new(MemoryStorage::new()), Arc::new(StaticPriceTable::default())));
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
    GatewayEngine::new(scheduler, plugins, gate, cache)
}

/// S1: a request whose primary target fails with a fallback-allowed error
/// (content filtered, not retriable within a target) is retried against the
/// configured fallback and succeeds from there.
#[tokio::test]
async fn unary_fallback_success() {
    let primary_calls = Arc::new(AtomicUsize::new(0));
    let fallback_calls = Arc::new(AtomicUsize::new(0));

    let registry = ProviderRegistry::new();
    registry.register(Arc::new(FailingProvider { name: "primary".into(), calls: primary_calls.clone(), kind: ErrorKind::ContentFiltered }));
    registry.register(Arc::new(CountingProvider { name: "fallback".into(), calls: fallback_calls.clone() }));

    let keys = KeyPool::new(EventHub::new(8));
    keys.insert("primary", Key { id: 1, value: "a".into(), models: Vec::new(), weight: 1.0, provider_config: serde_json::Value::Null }).await;
    keys.insert("fallback", Key { id: 2, value: "b".into(), models: Vec::new(), weight: 1.0, provider_config: serde_json::Value::Null }).await;

    let engine = engine(registry, keys);
    let call = DispatchRequest {
        req: chat_request("primary/model-x", "hi"),
        bearer: None,
        fallback_models: vec!["fallback/model-x".into()],
        ctx: DownstreamContext::default(),
    };

    let resp = engine.dispatch_unary(call).await.expect("fallback should succeed");
    assert_eq!(resp.model, "fallback/model-x");
    assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
}

/// A governance denial never reaches a provider at all (spec's testable
/// property "governance denial implies zero upstream calls").
#[tokio::test]
async fn governance_denial_short_circuits_before_any_upstream_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = ProviderRegistry::new();
    registry.register(Arc::new(CountingProvider { name: "primary".into(), calls: calls.clone() }));
    let keys = key_pool_with("primary").await;

    let scheduler = Arc::new(WorkerPoolScheduler::new(Arc::new(registry), keys));
    let plugins = Arc::new(PluginChain::new(Vec::new()));

    let snapshot = Arc::new(GovernanceSnapshot::new());
    snapshot.put_budget(Budget {
        id: "b_1".into(),
        max_limit: 1.0,
        current_usage: 5.0,
        reset_duration: time::Duration::seconds(3600),
        last_reset: time::OffsetDateTime::now_utc(),
    });
    snapshot.put_virtual_key(VirtualKey {
        id: "vk_1".into(),
        value: "sk-vk-1".into(),
        team_id: None,
        customer_id: None,
        budget_id: Some("b_1".into()),
        rate_limit_id: None,
        allowed_models: Vec::new(),
        provider_overrides: serde_json::Value::Null,
    });
    let gate = Arc::new(GovernanceGate::new(snapshot, Arc::new(MemoryStorage::new()), Arc::new(StaticPriceTable::default())));
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
    let engine = GatewayEngine::new(scheduler, plugins, gate, cache);

    let call = DispatchRequest {
        req: chat_request("primary/model-x", "hi"),
        bearer: Some("sk-vk-1".into()),
        fallback_models: Vec::new(),
        ctx: DownstreamContext::default(),
    };

    let err = engine.dispatch_unary(call).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BudgetExceeded);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// S2: streaming chunks are reassigned strictly-increasing indices in
/// arrival order regardless of what the provider tagged them with, and the
/// terminal chunk carries the accumulated usage.
#[tokio::test]
async fn streaming_chunks_arrive_in_order_with_terminal_usage() {
    let registry = ProviderRegistry::new();
    registry.register(Arc::new(StreamingProvider { name: "primary".into() }));
    let keys = key_pool_with("primary").await;
    let engine = engine(registry, keys);

    let call = DispatchRequest {
        req: chat_request("primary/model-x", "hi"),
        bearer: None,
        fallback_models: Vec::new(),
        ctx: DownstreamContext::default(),
    };

    let mut stream = engine.dispatch_streaming(call).await.expect("stream should start");
    let first = stream.recv().await.unwrap().unwrap();
    let second = stream.recv().await.unwrap().unwrap();
    let third = stream.recv().await.unwrap().unwrap();

    assert_eq!((first.chunk_index, second.chunk_index, third.chunk_index), (0, 1, 2));
    assert!(!first.is_final && !second.is_final);
    assert!(third.is_final);
    assert_eq!(third.usage.as_ref().unwrap().total_tokens, 5);
    assert!(stream.recv().await.is_none());

    match &first.delta[0] {
        ContentPart::Text { text } => assert_eq!(text, "hello "),
        other => panic!("unexpected content part: {other:?}"),
    }
}

/// Testable property 3: N concurrent identical unary requests against a
/// cold cache collapse into exactly one upstream call.
#[tokio::test]
async fn concurrent_identical_requests_single_flight_through_the_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = ProviderRegistry::new();
    registry.register(Arc::new(CountingProvider { name: "primary".into(), calls: calls.clone() }));
    let keys = key_pool_with("primary").await;
    let engine = Arc::new(engine(registry, keys));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let call = DispatchRequest {
                req: chat_request("primary/model-x", "identical prompt"),
                bearer: None,
                fallback_models: Vec::new(),
                ctx: DownstreamContext::default(),
            };
            engine.dispatch_unary(call).await
        }));
    }

    for handle in handles {
        handle.await.unwrap().expect("every caller should still get a response");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Symmetric plugin unwinding (spec's testable property 1): `after` runs in
/// exactly the reverse of the order `before` entered, for a successful
/// dispatch.
#[tokio::test]
async fn plugins_unwind_in_reverse_of_entry_order() {
    struct RecordingPlugin {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl relaygate_provider_core::Plugin for RecordingPlugin {
        fn name(&self) -> &str {
            self.name
        }

        async fn before(&self, req: GatewayRequest, _ctx: &DownstreamContext) -> Result<relaygate_provider_core::BeforeOutcome, GatewayError> {
            self.log.lock().unwrap().push(format!("before:{}", self.name));
            Ok(relaygate_provider_core::BeforeOutcome::Continue(req))
        }

        async fn after(
            &self,
            resp: Option<GatewayResponse>,
            err: Option<GatewayError>,
            _ctx: &DownstreamContext,
        ) -> (Option<GatewayResponse>, Option<GatewayError>) {
            self.log.lock().unwrap().push(format!("after:{}", self.name));
            (resp, err)
        }
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = ProviderRegistry::new();
    registry.register(Arc::new(CountingProvider { name: "primary".into(), calls }));
    let keys = key_pool_with("primary").await;

    let scheduler = Arc::new(WorkerPoolScheduler::new(Arc::new(registry), keys));
    let plugins = Arc::new(PluginChain::new(vec![
        Arc::new(RecordingPlugin { name: "a", log: log.clone() }),
        Arc::new(RecordingPlugin { name: "b", log: log.clone() }),
    ]));
    let gate = Arc::new(GovernanceGate::new(Arc::new(GovernanceSnapshot::new()), Arc::new(MemoryStorage::new()), Arc::new(StaticPriceTable::default())));
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
    let engine = GatewayEngine::new(scheduler, plugins, gate, cache);

    let call = DispatchRequest {
        req: chat_request("primary/model-x", "hi"),
        bearer: None,
        fallback_models: Vec::new(),
        ctx: DownstreamContext::default(),
    };
    engine.dispatch_unary(call).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["before:a", "before:b", "after:b", "after:a"]);
}

/// Cancellation mid-stream never bills: the terminal chunk is an error, so
/// `tap_for_accounting` never reaches the `finish_reason` branch that calls
/// `gate.account`.
#[tokio::test]
async fn cancellation_mid_stream_does_not_reach_accounting() {
    struct HangingProvider;

    #[async_trait]
    impl relaygate_provider_core::Provider for HangingProvider {
        fn name(&self) -> &str {
            "primary"
        }

        async fn call(&self, _req: GatewayRequest, _key: &Key, _ctx: DownstreamContext) -> Result<ProviderOutcome, GatewayError> {
            let (_tx, rx) = mpsc::channel(1);
            // Never sends; the pipeline only progresses via cancellation.
            Ok(ProviderOutcome::Streaming(rx))
        }
    }

    let registry = ProviderRegistry::new();
    registry.register(Arc::new(HangingProvider));
    let keys = key_pool_with("primary").await;
    let engine = engine(registry, keys);

    let cancel = relaygate_provider_core::Cancellation::new();
    let mut ctx = DownstreamContext::default();
    ctx.cancel = cancel.clone();

    let call = DispatchRequest { req: chat_request("primary/model-x", "hi"), bearer: None, fallback_models: Vec::new(), ctx };
    let mut stream = engine.dispatch_streaming(call).await.expect("stream should start");

    cancel.cancel();
    let item = tokio::time::timeout(Duration::from_millis(200), stream.recv())
        .await
        .expect("stream should close promptly")
        .expect("a terminal cancelled chunk should be emitted");
    assert_eq!(item.unwrap_err().kind, ErrorKind::Cancelled);
    assert!(stream.recv().await.is_none());
}
