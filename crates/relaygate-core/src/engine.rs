//! Wires components D (plugin chain), E (governance), F (fallback), C (the
//! worker pool scheduler, owned by `relaygate-provider-core`), G (the
//! streaming pipeline) and H (the response cache) into the control flow
//! spec §2 describes for one downstream request:
//!
//! `I -> D(pre) -> E(gate) -> H(lookup) -> F -> C -> wire adapter -> upstream
//! -> wire adapter -> D(post) -> E(accounting) -> H(store) -> I`
//!
//! This module owns none of those components' internals — it only
//! sequences calls across the seams the other modules already expose.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use relaygate_protocol::{
    split_provider_model, ErrorKind, FinishReason, GatewayError, GatewayRequest, GatewayResponse, StreamChunk,
};
use relaygate_provider_core::{
    build_downstream_event, ChunkStream, DownstreamContext, NoopTrafficSink, PluginChain, PreChainOutcome,
    ProviderOutcome, SharedTrafficSink, StreamingPipeline, WorkerPoolScheduler,
};
use tokio::sync::mpsc;

use crate::cache::ResponseCache;
use crate::fallback::{FallbackDriver, Target};
use crate::governance::GovernanceGate;

const STREAM_WRAP_CAPACITY: usize = 2;

/// One client-facing call, not yet bound to any particular provider.
pub struct DispatchRequest {
    pub req: GatewayRequest,
    /// `Authorization` bearer, already stripped of any `Bearer ` prefix.
    pub bearer: Option<String>,
    /// Additional "provider/model" targets tried, in order, if the primary
    /// (`req.model`) fails with a retriable/fallback-allowed error.
    pub fallback_models: Vec<String>,
    pub ctx: DownstreamContext,
}

fn parse_target(spec: &str) -> Result<Target, GatewayError> {
    let (provider, model) = split_provider_model(spec);
    let provider = provider.ok_or_else(|| {
        GatewayError::new(
            ErrorKind::InvalidRequest,
            format!("model '{spec}' is not provider-qualified (expected 'provider/model')"),
        )
        .no_fallback()
    })?;
    Ok(Target::new(provider, model))
}

fn one_shot_stream(resp: GatewayResponse) -> ChunkStream {
    let (tx, rx) = mpsc::channel(STREAM_WRAP_CAPACITY);
    tokio::spawn(async move {
        let delta = resp.message.content.clone();
        if !delta.is_empty() {
            let _ = tx
                .send(Ok(StreamChunk {
                    chunk_index: 0,
                    delta,
                    is_final: false,
                    finish_reason: None,
                    usage: None,
                }))
                .await;
        }
        let _ = tx
            .send(Ok(StreamChunk::terminal(
                1,
                resp.finish_reason.unwrap_or(FinishReason::Stop),
                resp.usage,
            )))
            .await;
    });
    rx
}

/// Component wiring for one gateway deployment. Cheap to clone (every field
/// is an `Arc`), so a single instance is shared across all inbound requests.
#[derive(Clone)]
pub struct GatewayEngine {
    scheduler: Arc<WorkerPoolScheduler>,
    plugins: Arc<PluginChain>,
    gate: Arc<GovernanceGate>,
    cache: Arc<ResponseCache>,
    traffic: SharedTrafficSink,
}

impl GatewayEngine {
    pub fn new(
        scheduler: Arc<WorkerPoolScheduler>,
        plugins: Arc<PluginChain>,
        gate: Arc<GovernanceGate>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self { scheduler, plugins, gate, cache, traffic: Arc::new(NoopTrafficSink) }
    }

    /// Per-call downstream traffic records go to `traffic` instead of being
    /// dropped (spec §6) — a cache hit is still a served call and is
    /// recorded, even though it is never billed against governance.
    pub fn with_traffic_sink(mut self, traffic: SharedTrafficSink) -> Self {
        self.traffic = traffic;
        self
    }

    fn build_driver(&self, req: &GatewayRequest, fallback_models: &[String]) -> Result<FallbackDriver, GatewayError> {
        let primary = parse_target(&req.model)?;
        let mut fallbacks = Vec::with_capacity(fallback_models.len());
        for spec in fallback_models {
            fallbacks.push(parse_target(spec)?);
        }
        Ok(FallbackDriver::new(primary, fallbacks))
    }

    /// One attempt against a single target: pre-hooks, dispatch (or
    /// short-circuit), post-hooks. Used by both unary and streaming
    /// dispatch, each folding its own notion of "the upstream call" in.
    async fn attempt_unary(
        &self,
        target: &Target,
        req: GatewayRequest,
        ctx: &DownstreamContext,
    ) -> Result<GatewayResponse, GatewayError> {
        let mut req = req;
        req.model = format!("{}/{}", target.provider, target.model);

        let pre = self.plugins.run_before(req, ctx).await;
        let (entered, dispatch_result) = match pre {
            PreChainOutcome::Fatal { error, .. } => return Err(error),
            PreChainOutcome::ShortCircuit { response, entered } => (entered, Ok(response)),
            PreChainOutcome::Proceed { req, entered } => {
                let outcome = self.scheduler.dispatch(&target.provider, req, ctx.clone()).await;
                let result = match outcome {
                    Ok(ProviderOutcome::Complete(resp)) => Ok(resp),
                    Ok(ProviderOutcome::Streaming(_)) => {
                        Err(GatewayError::new(ErrorKind::Internal, "provider returned a stream for a unary request").no_fallback())
                    }
                    Err(err) => Err(err),
                };
                (entered, result)
            }
        };

        let (resp, err) = match dispatch_result {
            Ok(resp) => self.plugins.run_after(&entered, Some(resp), None, ctx).await,
            Err(err) => self.plugins.run_after(&entered, None, Some(err), ctx).await,
        };
        match (resp, err) {
            (Some(resp), _) => Ok(resp),
            (None, Some(err)) => Err(err),
            (None, None) => Err(GatewayError::new(ErrorKind::Internal, "plugin chain produced neither a response nor an error")),
        }
    }

    /// Full unary control flow. Governance is evaluated once against the
    /// primary target (spec §4.F rule 1); the cache short-circuits the
    /// entire fallback/dispatch path on a hit, and a hit is never billed —
    /// accounting only runs against an actual upstream call.
    pub async fn dispatch_unary(&self, call: DispatchRequest) -> Result<GatewayResponse, GatewayError> {
        let started = Instant::now();
        let driver = self.build_driver(&call.req, &call.fallback_models)?;
        let primary = &driver.targets()[0];
        let outcome = self.gate.admit(call.bearer.as_deref(), &primary.provider, &primary.model)?;

        let used_target: Arc<Mutex<Option<Target>>> = Arc::new(Mutex::new(None));
        let used_target_for_compute = used_target.clone();
        let req = call.req.clone();
        let ctx = call.ctx.clone();

        let result = self
            .cache
            .get_or_compute(&call.req, || async move {
                let cancel = ctx.cancel.clone();
                let cancelled = move || cancel.is_cancelled();
                let result = driver
                    .run(&cancelled, |target, _idx| self.attempt_unary(target, req.clone(), &ctx))
                    .await;
                match result {
                    Ok((target, resp)) => {
                        *used_target_for_compute.lock().expect("used_target mutex poisoned") = Some(target);
                        Ok(resp)
                    }
                    Err(err) => Err(err),
                }
            })
            .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        let billed = used_target.lock().expect("used_target mutex poisoned").clone().unwrap_or_else(|| primary.clone());

        let (resp, debug) = match result {
            Ok(pair) => pair,
            Err(err) => {
                let event = build_downstream_event(
                    &call.ctx,
                    &billed.provider,
                    &billed.model,
                    false,
                    relaygate_protocol::Usage::default(),
                    latency_ms,
                );
                self.traffic.record_downstream(event).await;
                return Err(err);
            }
        };

        let mut resp = resp;
        debug.attach(&mut resp);

        if !debug.hit {
            self.gate.account(&outcome, &billed.provider, &billed.model, &resp.usage).await;
        }

        let event = build_downstream_event(&call.ctx, &billed.provider, &billed.model, true, resp.usage.clone(), latency_ms);
        self.traffic.record_downstream(event).await;

        Ok(resp)
    }

    /// Full streaming control flow (spec §4.G). A cache hit is replayed as a
    /// single-chunk synthetic stream; a miss dispatches for real and, once
    /// the stream reaches its terminal chunk, stores the accumulated
    /// response and runs governance accounting — partial (cancelled)
    /// streams are neither cached nor billed.
    pub async fn dispatch_streaming(&self, call: DispatchRequest) -> Result<ChunkStream, GatewayError> {
        let driver = self.build_driver(&call.req, &call.fallback_models)?;
        let primary = &driver.targets()[0];
        let outcome = self.gate.admit(call.bearer.as_deref(), &primary.provider, &primary.model)?;

        if let Some((resp, debug)) = self.cache.lookup(&call.req).await {
            let mut resp = resp;
            debug.attach(&mut resp);
            return Ok(one_shot_stream(resp));
        }

        let (cache_key, cache_text) = self.cache.key_and_text(&call.req);
        let req = call.req.clone();
        let ctx = call.ctx.clone();
        let cancel = call.ctx.cancel.clone();
        let cancelled = move || cancel.is_cancelled();

        let (target, (entered, raw_stream)) = driver
            .run(&cancelled, |target, _idx| {
                let mut req = req.clone();
                req.model = format!("{}/{}", target.provider, target.model);
                let ctx = ctx.clone();
                async move {
                    let pre = self.plugins.run_before(req, &ctx).await;
                    match pre {
                        PreChainOutcome::Fatal { error, .. } => Err(error),
                        PreChainOutcome::ShortCircuit { response, entered } => Ok((entered, one_shot_stream(response))),
                        PreChainOutcome::Proceed { req, entered } => {
                            match self.scheduler.dispatch(&target.provider, req, ctx.clone()).await {
                                Ok(ProviderOutcome::Streaming(raw)) => Ok((entered, raw)),
                                Ok(ProviderOutcome::Complete(resp)) => Ok((entered, one_shot_stream(resp))),
                                Err(err) => Err(err),
                            }
                        }
                    }
                }
            })
            .await?;

        let pipeline = StreamingPipeline::new(self.plugins.clone());
        let piped = pipeline.spawn(raw_stream, entered, call.ctx.clone());

        Ok(self.tap_for_accounting(piped, target, outcome, cache_key, cache_text, call.ctx.clone()))
    }

    /// Interposes between the streaming pipeline's output and the caller so
    /// the terminal chunk can trigger cache storage, governance accounting
    /// and the downstream traffic record without the caller having to know
    /// any of the three exist. A stream that ends without ever reaching a
    /// terminal chunk (cancelled, or the connection dropped) is never
    /// cached, billed, or recorded — it didn't complete a call.
    fn tap_for_accounting(
        &self,
        mut piped: mpsc::Receiver<Result<StreamChunk, GatewayError>>,
        target: Target,
        outcome: crate::governance::AdmitOutcome,
        cache_key: String,
        cache_text: String,
        ctx: DownstreamContext,
    ) -> ChunkStream {
        let (tx, rx) = mpsc::channel(STREAM_WRAP_CAPACITY.max(4));
        let engine = self.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let model = format!("{}/{}", target.provider, target.model);
            let mut content = Vec::new();
            let mut finish_reason = None;
            let mut usage = relaygate_protocol::Usage::default();

            while let Some(item) = piped.recv().await {
                let is_final = matches!(&item, Ok(chunk) if chunk.is_final);
                let is_err = item.is_err();
                if let Ok(chunk) = &item {
                    content.extend(chunk.delta.clone());
                    if let Some(reason) = chunk.finish_reason {
                        finish_reason = Some(reason);
                    }
                    if let Some(chunk_usage) = &chunk.usage {
                        usage = chunk_usage.clone();
                    }
                }
                let stop = tx.send(item).await.is_err();
                if stop || is_err {
                    return;
                }
                if is_final {
                    break;
                }
            }

            if let Some(finish_reason) = finish_reason {
                let full = GatewayResponse {
                    model: model.clone(),
                    message: relaygate_protocol::Message { role: relaygate_protocol::Role::Assistant, content, name: None },
                    finish_reason: Some(finish_reason),
                    usage: usage.clone(),
                    extra: Default::default(),
                };
                engine.cache.store(&cache_key, &cache_text, full).await;
                engine.gate.account(&outcome, &target.provider, &target.model, &usage).await;
                let latency_ms = started.elapsed().as_millis() as u64;
                let event = build_downstream_event(&ctx, &target.provider, &target.model, true, usage, latency_ms);
                engine.traffic.record_downstream(event).await;
            }
        });
        rx
    }
}
