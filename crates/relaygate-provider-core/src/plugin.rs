use std::sync::Arc;

use async_trait::async_trait;
use relaygate_protocol::{GatewayError, GatewayRequest, GatewayResponse, StreamChunk};

use crate::headers::Headers;
use crate::provider::DownstreamContext;

/// What a plugin's `before` hook decided to do with one request (spec
/// §4.D). `ShortCircuit` and a fatal `Err` both stop the chain and skip the
/// upstream call; they differ only in whether the post-chain receives a
/// synthetic *response* or a synthetic *error* to unwind with.
pub enum BeforeOutcome {
    Continue(GatewayRequest),
    ShortCircuit(GatewayResponse),
}

/// Component D: a pre/post hook point around a provider dispatch.
///
/// Every method has a no-op default so a plugin only needs to implement the
/// hooks it cares about (a rate limiter only needs `before`; a redaction
/// filter only needs `after`/`after_chunk`).
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Runs before dispatch, in registration order. `Ok(Continue)` passes
    /// the (possibly mutated) request to the next plugin. `Ok(ShortCircuit)`
    /// stops the chain immediately and treats the carried response as if it
    /// came from upstream — skipping the call and entering the post-chain.
    /// `Err` is a fatal error: the chain stops, the request never reaches
    /// the scheduler, and the post-chain runs with that error for every
    /// plugin that had already entered (this plugin's own `before` did not
    /// complete, so it does not count as entered).
    async fn before(
        &self,
        req: GatewayRequest,
        _ctx: &DownstreamContext,
    ) -> Result<BeforeOutcome, GatewayError> {
        Ok(BeforeOutcome::Continue(req))
    }

    /// Runs after dispatch — success or failure — in reverse registration
    /// order (symmetric with `before`). Receives exactly one of `resp`/`err`.
    /// A plugin that wants to replace the error returns a different one;
    /// returning the input unchanged preserves it (spec §7: "the plugin
    /// chain never swallows errors silently").
    async fn after(
        &self,
        resp: Option<GatewayResponse>,
        err: Option<GatewayError>,
        _ctx: &DownstreamContext,
    ) -> (Option<GatewayResponse>, Option<GatewayError>) {
        (resp, err)
    }

    /// Runs once per chunk of a streaming dispatch, in reverse registration order.
    async fn after_chunk(&self, _chunk: &mut StreamChunk, _ctx: &DownstreamContext) {}

    /// Runs once per attempt, just before the HTTP call, in declared order
    /// (spec §4.D "transport interceptor"). The wire adapter (out of scope)
    /// is the actual caller; this crate only carries the hook point.
    fn intercept_transport(&self, _url: &str, headers: Headers, body: Vec<u8>) -> (Headers, Vec<u8>) {
        (headers, body)
    }
}

/// Outcome of running every plugin's `before` hook once.
pub enum PreChainOutcome {
    /// Every plugin continued; dispatch proceeds with the final request.
    Proceed { req: GatewayRequest, entered: Vec<usize> },
    /// A plugin short-circuited with a synthetic response.
    ShortCircuit { response: GatewayResponse, entered: Vec<usize> },
    /// A plugin's `before` itself failed.
    Fatal { error: GatewayError, entered: Vec<usize> },
}

/// An ordered set of plugins, run around one dispatch.
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginChain {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Runs every plugin's `before` hook in order. `entered` is returned
    /// already reversed, so callers can feed it straight into `run_after`.
    pub async fn run_before(&self, mut req: GatewayRequest, ctx: &DownstreamContext) -> PreChainOutcome {
        let mut entered = Vec::with_capacity(self.plugins.len());
        for (idx, plugin) in self.plugins.iter().enumerate() {
            match plugin.before(req, ctx).await {
                Ok(BeforeOutcome::Continue(next_req)) => {
                    entered.push(idx);
                    req = next_req;
                }
                Ok(BeforeOutcome::ShortCircuit(response)) => {
                    entered.push(idx);
                    entered.reverse();
                    return PreChainOutcome::ShortCircuit { response, entered };
                }
                Err(error) => {
                    entered.reverse();
                    return PreChainOutcome::Fatal { error, entered };
                }
            }
        }
        entered.reverse();
        PreChainOutcome::Proceed { req, entered }
    }

    /// Runs `entered` plugins' `after` hook in reverse-of-`before` order
    /// (already the order `entered` is stored in). Exactly one of
    /// `resp`/`err` should be `Some` on entry; a plugin may replace either
    /// as it unwinds.
    pub async fn run_after(
        &self,
        entered: &[usize],
        mut resp: Option<GatewayResponse>,
        mut err: Option<GatewayError>,
        ctx: &DownstreamContext,
    ) -> (Option<GatewayResponse>, Option<GatewayError>) {
        for &idx in entered {
            let (next_resp, next_err) = self.plugins[idx].after(resp, err, ctx).await;
            resp = next_resp;
            err = next_err;
        }
        (resp, err)
    }

    pub async fn run_after_chunk(&self, entered: &[usize], chunk: &mut StreamChunk, ctx: &DownstreamContext) {
        for &idx in entered {
            self.plugins[idx].after_chunk(chunk, ctx).await;
        }
    }

    /// Transport interceptors run in declared order (not reversed), once
    /// per upstream attempt, just before the HTTP call (spec §4.D).
    pub fn intercept_transport(&self, url: &str, mut headers: Headers, mut body: Vec<u8>) -> (Headers, Vec<u8>) {
        for plugin in &self.plugins {
            let (next_headers, next_body) = plugin.intercept_transport(url, headers, body);
            headers = next_headers;
            body = next_body;
        }
        (headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        id: usize,
        order: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn before(
            &self,
            req: GatewayRequest,
            _ctx: &DownstreamContext,
        ) -> Result<BeforeOutcome, GatewayError> {
            self.order.lock().unwrap().push(format!("before:{}", self.id));
            Ok(BeforeOutcome::Continue(req))
        }

        async fn after(
            &self,
            resp: Option<GatewayResponse>,
            err: Option<GatewayError>,
            _ctx: &DownstreamContext,
        ) -> (Option<GatewayResponse>, Option<GatewayError>) {
            self.order.lock().unwrap().push(format!("after:{}", self.id));
            (resp, err)
        }
    }

    struct Denying;

    #[async_trait]
    impl Plugin for Denying {
        fn name(&self) -> &str {
            "denying"
        }

        async fn before(
            &self,
            _req: GatewayRequest,
            _ctx: &DownstreamContext,
        ) -> Result<BeforeOutcome, GatewayError> {
            Err(GatewayError::new(
                relaygate_protocol::ErrorKind::VirtualKeyInvalid,
                "denied",
            ))
        }
    }

    struct ShortCircuiting;

    #[async_trait]
    impl Plugin for ShortCircuiting {
        fn name(&self) -> &str {
            "short-circuiting"
        }

        async fn before(
            &self,
            _req: GatewayRequest,
            _ctx: &DownstreamContext,
        ) -> Result<BeforeOutcome, GatewayError> {
            Ok(BeforeOutcome::ShortCircuit(GatewayResponse {
                model: "cached".into(),
                message: relaygate_protocol::Message::text(relaygate_protocol::Role::Assistant, "short-circuited"),
                finish_reason: None,
                usage: Default::default(),
                extra: Default::default(),
            }))
        }
    }

    fn sample_request() -> GatewayRequest {
        GatewayRequest {
            modality: relaygate_protocol::Modality::ChatCompletion,
            model: "openai/gpt-4o".into(),
            messages: Vec::new(),
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

    #[tokio::test]
    async fn after_hooks_run_in_reverse_of_before() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let chain = PluginChain::new(vec![
            Arc::new(Recorder { id: 1, order: order.clone() }),
            Arc::new(Recorder { id: 2, order: order.clone() }),
        ]);
        let ctx = DownstreamContext::default();
        let outcome = chain.run_before(sample_request(), &ctx).await;
        let PreChainOutcome::Proceed { req, entered } = outcome else {
            panic!("expected Proceed");
        };

        let resp = GatewayResponse {
            model: req.model.clone(),
            message: relaygate_protocol::Message::text(relaygate_protocol::Role::Assistant, "ok"),
            finish_reason: None,
            usage: Default::default(),
            extra: Default::default(),
        };
        chain.run_after(&entered, Some(resp), None, &ctx).await;

        assert_eq!(
            *order.lock().unwrap(),
            vec!["before:1", "before:2", "after:2", "after:1"]
        );
    }

    #[tokio::test]
    async fn fatal_error_skips_later_plugins_and_does_not_count_itself_entered() {
        let count = Arc::new(AtomicUsize::new(0));
        struct Counting(Arc<AtomicUsize>);
        #[async_trait]
        impl Plugin for Counting {
            fn name(&self) -> &str {
                "counting"
            }
            async fn before(
                &self,
                req: GatewayRequest,
                _ctx: &DownstreamContext,
            ) -> Result<BeforeOutcome, GatewayError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(BeforeOutcome::Continue(req))
            }
        }

        let chain = PluginChain::new(vec![Arc::new(Denying), Arc::new(Counting(count.clone()))]);
        let outcome = chain.run_before(sample_request(), &DownstreamContext::default()).await;
        match outcome {
            PreChainOutcome::Fatal { entered, .. } => assert!(entered.is_empty()),
            _ => panic!("expected Fatal"),
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn short_circuit_carries_synthetic_response_into_post_chain() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let chain = PluginChain::new(vec![
            Arc::new(Recorder { id: 1, order: order.clone() }),
            Arc::new(ShortCircuiting),
        ]);
        let ctx = DownstreamContext::default();
        let outcome = chain.run_before(sample_request(), &ctx).await;
        let PreChainOutcome::ShortCircuit { response, entered } = outcome else {
            panic!("expected ShortCircuit");
        };
        assert_eq!(entered, vec![1, 0]);
        let (resp, err) = chain.run_after(&entered, Some(response), None, &ctx).await;
        assert!(resp.is_some());
        assert!(err.is_none());
        assert_eq!(*order.lock().unwrap(), vec!["before:1", "after:1"]);
    }
}
