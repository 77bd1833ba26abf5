use std::collections::HashMap;
use std::sync::Arc;

use relaygate_protocol::{ErrorKind, GatewayError, GatewayRequest};
use tokio::sync::RwLock;

use crate::config::{ConcurrencyConfig, NetworkConfig};
use crate::pool::KeyPool;
use crate::provider::{DownstreamContext, ProviderOutcome};
use crate::registry::ProviderRegistry;
use crate::traffic::{NoopTrafficSink, SharedTrafficSink};
use crate::workerpool::ProviderPool;

/// Component C: dispatches to the right provider's bounded worker pool
/// (spec §4.C). The scheduler itself holds no queues — it owns the
/// per-provider [`ProviderPool`]s (created lazily from whatever
/// [`ConcurrencyConfig`]/[`NetworkConfig`] `configure_provider` was last
/// called with, or the defaults if it never was) and forwards each
/// dispatch to the one matching the target provider.
pub struct WorkerPoolScheduler {
    registry: Arc<ProviderRegistry>,
    keys: Arc<KeyPool>,
    pools: RwLock<HashMap<String, Arc<ProviderPool>>>,
    networks: RwLock<HashMap<String, NetworkConfig>>,
    traffic: SharedTrafficSink,
}

impl WorkerPoolScheduler {
    pub fn new(registry: Arc<ProviderRegistry>, keys: Arc<KeyPool>) -> Self {
        Self {
            registry,
            keys,
            pools: RwLock::new(HashMap::new()),
            networks: RwLock::new(HashMap::new()),
            traffic: Arc::new(NoopTrafficSink),
        }
    }

    /// Per-attempt upstream traffic records from every provider pool this
    /// scheduler creates go to `traffic` instead of being dropped (spec §6).
    pub fn with_traffic_sink(mut self, traffic: SharedTrafficSink) -> Self {
        self.traffic = traffic;
        self
    }

    /// (Re)configures the worker pool and retry/backoff policy for one
    /// provider, matching its `ProviderEntry.concurrency`/`.network` (spec
    /// §3). Replacing an existing pool drops the old one; its workers
    /// finish any job already in hand and then exit, since dropping the
    /// pool closes its intake channel (the two-phase shutdown of spec
    /// §4.C) — no new work is ever silently lost, it simply dispatches
    /// against the new pool from that point on.
    pub async fn configure_provider(&self, name: &str, concurrency: ConcurrencyConfig, network: NetworkConfig) {
        let pool = ProviderPool::with_traffic_sink(concurrency, self.traffic.clone());
        self.pools.write().await.insert(name.to_string(), pool);
        self.networks.write().await.insert(name.to_string(), network);
    }

    async fn pool_for(&self, name: &str) -> Arc<ProviderPool> {
        if let Some(pool) = self.pools.read().await.get(name) {
            return pool.clone();
        }
        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(name) {
            return pool.clone();
        }
        let pool = ProviderPool::with_traffic_sink(ConcurrencyConfig::default(), self.traffic.clone());
        pools.insert(name.to_string(), pool.clone());
        pool
    }

    async fn network_for(&self, name: &str) -> NetworkConfig {
        self.networks.read().await.get(name).cloned().unwrap_or_default()
    }

    pub async fn dispatch(
        &self,
        provider_name: &str,
        req: GatewayRequest,
        ctx: DownstreamContext,
    ) -> Result<ProviderOutcome, GatewayError> {
        let provider = self.registry.get(provider_name).ok_or_else(|| {
            GatewayError::new(ErrorKind::NotFound, format!("unknown provider '{provider_name}'")).no_fallback()
        })?;
        let pool = self.pool_for(provider_name).await;
        let network = self.network_for(provider_name).await;
        pool.enqueue(provider, self.keys.clone(), network, req, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHub;
    use crate::key::Key;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl crate::provider::Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn call(
            &self,
            req: GatewayRequest,
            _key: &Key,
            _ctx: DownstreamContext,
        ) -> Result<ProviderOutcome, GatewayError> {
            if self.failures_left.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(GatewayError::new(ErrorKind::RateLimited, "try again"));
            }
            Ok(ProviderOutcome::Complete(relaygate_protocol::GatewayResponse {
                model: req.model,
                message: relaygate_protocol::Message::text(relaygate_protocol::Role::Assistant, "ok"),
                finish_reason: Some(relaygate_protocol::FinishReason::Stop),
                usage: relaygate_protocol::Usage::default(),
                extra: Default::default(),
            }))
        }
    }

    #[tokio::test]
    async fn retries_across_workers_after_rate_limit() {
        let hub = EventHub::new(8);
        let keys = KeyPool::new(hub);
        keys.insert(
            "flaky",
            Key {
                id: 1,
                value: "a".into(),
                models: Vec::new(),
                weight: 1.0,
                provider_config: serde_json::Value::Null,
            },
        )
        .await;
        keys.insert(
            "flaky",
            Key {
                id: 2,
                value: "b".into(),
                models: Vec::new(),
                weight: 1.0,
                provider_config: serde_json::Value::Null,
            },
        )
        .await;

        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(FlakyProvider {
            failures_left: AtomicU32::new(1),
        }));

        let scheduler = WorkerPoolScheduler::new(registry, keys);
        let req = relaygate_protocol::GatewayRequest {
            modality: relaygate_protocol::Modality::ChatCompletion,
            model: "flaky/model-x".into(),
            messages: vec![relaygate_protocol::Message::text(
                relaygate_protocol::Role::User,
                "hi",
            )],
            input: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            tools: Vec::new(),
            stop: None,
            stream: false,
            extra: Default::default(),
        };
        let result = scheduler
            .dispatch("flaky", req, DownstreamContext::default())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unknown_provider_fails_fast() {
        let registry = Arc::new(ProviderRegistry::new());
        let keys = KeyPool::new(EventHub::new(8));
        let scheduler = WorkerPoolScheduler::new(registry, keys);
        let req = relaygate_protocol::GatewayRequest {
            modality: relaygate_protocol::Modality::ChatCompletion,
            model: "ghost/model-x".into(),
            messages: Vec::new(),
            input: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            tools: Vec::new(),
            stop: None,
            stream: false,
            extra: Default::default(),
        };
        let err = scheduler.dispatch("ghost", req, DownstreamContext::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
