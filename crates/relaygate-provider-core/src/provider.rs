use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use relaygate_protocol::{GatewayError, GatewayRequest, GatewayResponse, StreamChunk};
use tokio::sync::{mpsc, Notify};

use crate::key::Key;

/// Cooperative cancellation signal threaded through a request's whole
/// lifetime (spec §5): unblocks an intake wait, aborts an in-flight
/// upstream call, and still drives one terminal post-hook pass. Cloning
/// shares the same underlying signal — every clone observes the same
/// cancellation.
#[derive(Clone, Default, Debug)]
pub struct Cancellation {
    inner: Option<Arc<CancellationInner>>,
}

#[derive(Default, Debug)]
struct CancellationInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    /// A signal that can actually be cancelled later via the returned handle.
    pub fn new() -> Self {
        Self { inner: Some(Arc::new(CancellationInner::default())) }
    }

    pub fn cancel(&self) {
        if let Some(inner) = &self.inner {
            inner.cancelled.store(true, Ordering::SeqCst);
            inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.cancelled.load(Ordering::SeqCst))
    }

    /// Resolves once `cancel()` is called; never resolves for the default
    /// (un-cancellable) signal.
    pub async fn cancelled(&self) {
        match &self.inner {
            Some(inner) => loop {
                // Register as a waiter *before* re-checking the flag, so a
                // `cancel()` racing with this loop can't be missed between
                // the load and the await (Notify's documented guarantee).
                let notified = inner.notify.notified();
                if inner.cancelled.load(Ordering::SeqCst) {
                    return;
                }
                notified.await;
            },
            None => std::future::pending::<()>().await,
        }
    }
}

/// Raw per-chunk stream a [`Provider`] hands back for a streaming dispatch,
/// before component G (the streaming pipeline) reassigns indices and runs
/// the plugin chain's `after_chunk` hook over it.
pub type ChunkStream = mpsc::Receiver<Result<StreamChunk, GatewayError>>;

/// What a dispatch produced: either a complete response, or the start of a
/// stream the caller must drain.
pub enum ProviderOutcome {
    Complete(GatewayResponse),
    Streaming(ChunkStream),
}

/// Identifying context for a single downstream (client-facing) call,
/// threaded through the plugin chain and into telemetry events.
#[derive(Debug, Clone, Default)]
pub struct DownstreamContext {
    pub trace_id: String,
    pub virtual_key_id: Option<String>,
    pub team_id: Option<String>,
    pub customer_id: Option<String>,
    /// Cancellation signal for this call (spec §5). Defaults to a signal
    /// that can never fire, so existing callers that don't wire one up
    /// behave exactly as if cancellation weren't possible.
    pub cancel: Cancellation,
}

impl DownstreamContext {
    pub fn upstream(&self, attempt_no: u32) -> UpstreamContext {
        UpstreamContext {
            trace_id: self.trace_id.clone(),
            attempt_no,
        }
    }
}

/// Identifying context for one upstream (provider-facing) attempt, nested
/// under a [`DownstreamContext`] — a single downstream call can produce
/// several upstream attempts across retries and fallbacks.
#[derive(Debug, Clone)]
pub struct UpstreamContext {
    pub trace_id: String,
    pub attempt_no: u32,
}

/// Component B/D's wire adapter seam: something that knows how to turn a
/// [`GatewayRequest`] into an actual call against one upstream provider
/// using a given [`Key`]. Implementations live outside this crate (one per
/// supported dialect/vendor); this trait is the only thing the scheduler,
/// plugin chain, and streaming pipeline depend on.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn call(
        &self,
        req: GatewayRequest,
        key: &Key,
        ctx: DownstreamContext,
    ) -> Result<ProviderOutcome, GatewayError>;
}
