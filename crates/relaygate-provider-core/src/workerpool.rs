//! Component C: the per-provider worker pool (spec §4.C).
//!
//! One [`ProviderPool`] per provider owns a bounded intake channel (depth
//! `queue_depth`) and a fixed set of `worker_count` long-lived worker
//! tasks reading from it. `enqueue` hands a request + a one-shot response
//! slot to the channel; if the channel is already full it waits for (a) a
//! slot to free, (b) the call's context to cancel, or (c) the configured
//! intake-wait deadline to elapse — in which case it returns
//! `UpstreamTimeout` without ever touching a worker. Workers retry within
//! the same target (same provider, rotating keys) with exponential
//! backoff and jitter; crossing to a *different* target is the fallback
//! driver's job (component F), not this one's.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use relaygate_protocol::{ErrorKind, GatewayError, GatewayRequest};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::config::{ConcurrencyConfig, NetworkConfig};
use crate::key::UnavailableReason;
use crate::pool::{AcquireError, KeyPool};
use crate::provider::{DownstreamContext, Provider, ProviderOutcome};
use crate::traffic::{build_upstream_event, NoopTrafficSink, SharedTrafficSink};

struct Job {
    provider: Arc<dyn Provider>,
    keys: Arc<KeyPool>,
    network: NetworkConfig,
    req: GatewayRequest,
    ctx: DownstreamContext,
    respond_to: oneshot::Sender<Result<ProviderOutcome, GatewayError>>,
    traffic: SharedTrafficSink,
}

/// A bounded intake queue plus its fixed worker set for one provider.
/// Dropping the pool closes the intake channel, which drains existing
/// workers (they finish their current job, see the channel close, and
/// exit) without cancelling in-flight calls — the two-phase shutdown
/// spec §4.C describes.
pub struct ProviderPool {
    intake: mpsc::Sender<Job>,
    intake_wait: Duration,
    workers: Vec<JoinHandle<()>>,
    traffic: SharedTrafficSink,
}

impl Drop for ProviderPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl ProviderPool {
    pub fn new(concurrency: ConcurrencyConfig) -> Arc<Self> {
        Self::with_traffic_sink(concurrency, Arc::new(NoopTrafficSink))
    }

    /// Same as [`Self::new`], but per-attempt upstream traffic records go to
    /// `traffic` instead of being dropped (spec §6 telemetry).
    pub fn with_traffic_sink(concurrency: ConcurrencyConfig, traffic: SharedTrafficSink) -> Arc<Self> {
        let queue_depth = concurrency.queue_depth.max(1);
        let worker_count = concurrency.worker_count.max(1);
        let (tx, rx) = mpsc::channel(queue_depth);
        let rx = Arc::new(AsyncMutex::new(rx));

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let rx = rx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(job) = job else { break };
                    run_job(job).await;
                }
            }));
        }

        Arc::new(Self {
            intake: tx,
            intake_wait: Duration::from_millis(concurrency.intake_wait_ms.max(1)),
            workers,
            traffic,
        })
    }

    /// Admits one request onto the intake queue and awaits its result.
    /// Blocks on a full queue up to `intake_wait`, or until `ctx` cancels.
    pub async fn enqueue(
        &self,
        provider: Arc<dyn Provider>,
        keys: Arc<KeyPool>,
        network: NetworkConfig,
        req: GatewayRequest,
        ctx: DownstreamContext,
    ) -> Result<ProviderOutcome, GatewayError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let job = Job { provider, keys, network, req, ctx: ctx.clone(), respond_to: resp_tx, traffic: self.traffic.clone() };

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return Err(GatewayError::new(ErrorKind::Cancelled, "cancelled while waiting for an intake slot"));
            }
            sent = self.intake.send(job) => {
                if sent.is_err() {
                    return Err(GatewayError::new(ErrorKind::Internal, "provider pool shut down").no_fallback());
                }
            }
            _ = tokio::time::sleep(self.intake_wait) => {
                return Err(GatewayError::new(
                    ErrorKind::UpstreamTimeout,
                    format!("intake queue full for {}ms", self.intake_wait.as_millis()),
                ));
            }
        }

        match resp_rx.await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::new(ErrorKind::Internal, "worker dropped without responding")),
        }
    }
}

async fn run_job(job: Job) {
    let Job { provider, keys, network, req, ctx, respond_to, traffic } = job;
    let max_attempts = network.max_retries.max(1) + 1;
    let mut last_err: Option<GatewayError> = None;

    for attempt in 0..max_attempts {
        if ctx.cancel.is_cancelled() {
            let _ = respond_to.send(Err(GatewayError::new(ErrorKind::Cancelled, "cancelled before dispatch")));
            return;
        }

        let key = match keys.acquire(provider.name(), &req.model).await {
            Ok(key) => key,
            Err(AcquireError) => {
                let err = last_err.unwrap_or_else(|| {
                    GatewayError::new(ErrorKind::Overloaded, format!("no available worker for provider '{}'", provider.name()))
                });
                let _ = respond_to.send(Err(err));
                return;
            }
        };

        let upstream_ctx = ctx.upstream(attempt);
        let started = Instant::now();
        match provider.call(req.clone(), &key, ctx.clone()).await {
            Ok(outcome) => {
                let usage = match &outcome {
                    ProviderOutcome::Complete(resp) => Some(resp.usage.clone()),
                    ProviderOutcome::Streaming(_) => None,
                };
                let event = build_upstream_event(
                    &upstream_ctx,
                    provider.name(),
                    Some(key.id),
                    &req.model,
                    true,
                    usage,
                    None,
                    started.elapsed().as_millis() as u64,
                );
                traffic.record_upstream(event).await;
                let _ = respond_to.send(Ok(outcome));
                return;
            }
            Err(err) => {
                let event = build_upstream_event(
                    &upstream_ctx,
                    provider.name(),
                    Some(key.id),
                    &req.model,
                    false,
                    None,
                    Some(format!("{:?}", err.kind)),
                    started.elapsed().as_millis() as u64,
                );
                traffic.record_upstream(event).await;

                let is_last_attempt = attempt + 1 >= max_attempts;
                if err.is_retriable() && !is_last_attempt {
                    let reason = classify_reason(&err);
                    keys.mark_model_unavailable(key.id, &req.model, reason, cooldown_for(reason)).await;
                    let delay = backoff_delay(attempt, network.backoff_initial_ms, network.backoff_max_ms);
                    last_err = Some(err);
                    tokio::time::sleep(delay).await;
                    continue;
                }
                let _ = respond_to.send(Err(err));
                return;
            }
        }
    }

    let _ = respond_to.send(Err(last_err.unwrap_or_else(|| GatewayError::new(ErrorKind::Overloaded, "worker pool exhausted"))));
}

fn classify_reason(err: &GatewayError) -> UnavailableReason {
    match err.kind {
        ErrorKind::RateLimited => UnavailableReason::RateLimit,
        ErrorKind::UpstreamTimeout => UnavailableReason::Timeout,
        ErrorKind::UpstreamServerError | ErrorKind::UpstreamNetwork => UnavailableReason::Upstream5xx,
        ErrorKind::AuthFailed => UnavailableReason::AuthInvalid,
        _ => UnavailableReason::Unknown,
    }
}

fn cooldown_for(reason: UnavailableReason) -> Duration {
    match reason {
        UnavailableReason::RateLimit => Duration::from_secs(30),
        UnavailableReason::Timeout | UnavailableReason::Upstream5xx => Duration::from_secs(10),
        UnavailableReason::AuthInvalid => Duration::from_secs(9_999 * 365 * 24 * 60 * 60),
        _ => Duration::from_secs(10),
    }
}

/// Exponential backoff from `initial_ms` doubling to `max_ms`, with ±20%
/// jitter (spec §4.C).
fn backoff_delay(attempt: u32, initial_ms: u64, max_ms: u64) -> Duration {
    let base = initial_ms.saturating_mul(1u64 << attempt.min(20)).min(max_ms.max(initial_ms));
    let jitter_frac = rand::rng().random_range(-0.2..=0.2);
    let jittered = (base as f64) * (1.0 + jitter_frac);
    Duration::from_millis(jittered.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHub;
    use crate::key::Key;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    struct SlowProvider {
        delay: Duration,
    }

    #[async_trait]
    impl Provider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn call(&self, req: GatewayRequest, _key: &Key, _ctx: DownstreamContext) -> Result<ProviderOutcome, GatewayError> {
            tokio::time::sleep(self.delay).await;
            Ok(ProviderOutcome::Complete(relaygate_protocol::GatewayResponse {
                model: req.model,
                message: relaygate_protocol::Message::text(relaygate_protocol::Role::Assistant, "ok"),
                finish_reason: Some(relaygate_protocol::FinishReason::Stop),
                usage: relaygate_protocol::Usage::default(),
                extra: Default::default(),
            }))
        }
    }

    fn sample_req() -> GatewayRequest {
        GatewayRequest {
            modality: relaygate_protocol::Modality::ChatCompletion,
            model: "slow/model-x".into(),
            messages: vec![relaygate_protocol::Message::text(relaygate_protocol::Role::User, "hi")],
            input: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            tools: Vec::new(),
            stop: None,
            stream: false,
            extra: Default::default(),
        }
    }

    async fn single_key_pool() -> Arc<KeyPool> {
        let keys = KeyPool::new(EventHub::new(8));
        keys.insert("slow", Key { id: 1, value: "a".into(), models: Vec::new(), weight: 1.0, provider_config: serde_json::Value::Null }).await;
        keys
    }

    /// Scenario S5: worker_count=1, queue_depth=1, intake_wait=100ms,
    /// upstream takes 300ms. req1 starts immediately, req2 fills the one
    /// queue slot, req3 finds no room and times out after ~100ms.
    #[tokio::test]
    async fn backpressure_times_out_third_concurrent_request() {
        let pool = ProviderPool::new(ConcurrencyConfig { worker_count: 1, queue_depth: 1, intake_wait_ms: 100 });
        let provider: Arc<dyn Provider> = Arc::new(SlowProvider { delay: Duration::from_millis(300) });
        let keys = single_key_pool().await;
        let network = NetworkConfig { max_retries: 0, ..NetworkConfig::default() };

        let p1 = pool.clone();
        let prov1 = provider.clone();
        let keys1 = keys.clone();
        let net1 = network.clone();
        let h1 = tokio::spawn(async move { p1.enqueue(prov1, keys1, net1, sample_req(), DownstreamContext::default()).await });

        // Give req1 a moment to actually be pulled off the queue by the
        // single worker before req2/req3 are submitted.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let p2 = pool.clone();
        let prov2 = provider.clone();
        let keys2 = keys.clone();
        let net2 = network.clone();
        let h2 = tokio::spawn(async move { p2.enqueue(prov2, keys2, net2, sample_req(), DownstreamContext::default()).await });

        tokio::time::sleep(Duration::from_millis(20)).await;

        let start = Instant::now();
        let result3 = pool.enqueue(provider.clone(), keys.clone(), network.clone(), sample_req(), DownstreamContext::default()).await;
        let elapsed = start.elapsed();

        let err = result3.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamTimeout);
        assert!(elapsed >= Duration::from_millis(90), "expected ~100ms intake wait, got {elapsed:?}");
        assert!(elapsed < Duration::from_millis(250), "intake timeout should fire well before upstream returns, got {elapsed:?}");

        assert!(h1.await.unwrap().is_ok());
        assert!(h2.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancellation_unblocks_intake_wait() {
        let pool = ProviderPool::new(ConcurrencyConfig { worker_count: 1, queue_depth: 1, intake_wait_ms: 5_000 });
        let provider: Arc<dyn Provider> = Arc::new(SlowProvider { delay: Duration::from_secs(5) });
        let keys = single_key_pool().await;
        let network = NetworkConfig::default();

        // Occupy the only worker.
        let p1 = pool.clone();
        let prov1 = provider.clone();
        let keys1 = keys.clone();
        let net1 = network.clone();
        tokio::spawn(async move { p1.enqueue(prov1, keys1, net1, sample_req(), DownstreamContext::default()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Occupy the one queue slot.
        let p2 = pool.clone();
        let prov2 = provider.clone();
        let keys2 = keys.clone();
        let net2 = network.clone();
        tokio::spawn(async move { p2.enqueue(prov2, keys2, net2, sample_req(), DownstreamContext::default()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cancel = crate::provider::Cancellation::new();
        let mut ctx = DownstreamContext::default();
        ctx.cancel = cancel.clone();

        let waiter = tokio::spawn({
            let pool = pool.clone();
            let provider = provider.clone();
            let keys = keys.clone();
            let network = network.clone();
            async move { pool.enqueue(provider, keys, network, sample_req(), ctx).await }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(200), waiter).await.expect("should not time out").unwrap();
        assert_eq!(result.unwrap_err().kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn retries_within_target_after_retriable_error() {
        struct FlakyProvider {
            failures_left: AtomicU32,
        }
        #[async_trait]
        impl Provider for FlakyProvider {
            fn name(&self) -> &str {
                "flaky"
            }
            async fn call(&self, req: GatewayRequest, _key: &Key, _ctx: DownstreamContext) -> Result<ProviderOutcome, GatewayError> {
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

        let pool = ProviderPool::new(ConcurrencyConfig { worker_count: 1, queue_depth: 4, intake_wait_ms: 5_000 });
        let provider: Arc<dyn Provider> = Arc::new(FlakyProvider { failures_left: AtomicU32::new(1) });
        let keys = KeyPool::new(EventHub::new(8));
        keys.insert("flaky", Key { id: 1, value: "a".into(), models: Vec::new(), weight: 1.0, provider_config: serde_json::Value::Null }).await;
        keys.insert("flaky", Key { id: 2, value: "b".into(), models: Vec::new(), weight: 1.0, provider_config: serde_json::Value::Null }).await;
        let network = NetworkConfig { max_retries: 4, backoff_initial_ms: 1, backoff_max_ms: 5, ..NetworkConfig::default() };

        let mut req = sample_req();
        req.model = "flaky/model-x".into();
        let result = pool.enqueue(provider, keys, network, req, DownstreamContext::default()).await;
        assert!(result.is_ok());
    }
}
