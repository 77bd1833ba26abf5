use std::sync::Arc;

use relaygate_protocol::{ErrorKind, GatewayError, StreamChunk};
use tokio::sync::mpsc;

use crate::plugin::PluginChain;
use crate::provider::{ChunkStream, DownstreamContext};

/// Matches the bound on the provider's own raw chunk channel: enough to
/// absorb a burst without the upstream read loop stalling on every send.
const CHANNEL_CAPACITY: usize = 32;

/// Component G: drains a provider's raw chunk stream, assigns monotonic
/// `chunk_index`s, runs each chunk through the plugin chain's `after_chunk`
/// hook, and republishes on a bounded channel. A downstream consumer that
/// stops reading (client disconnect) closes the receiver, which makes the
/// forwarding task's `send` fail and ends the drain — that is the pipeline's
/// cancellation path, no separate cancel token needed.
pub struct StreamingPipeline {
    plugins: Arc<PluginChain>,
}

impl StreamingPipeline {
    pub fn new(plugins: Arc<PluginChain>) -> Self {
        Self { plugins }
    }

    pub fn spawn(
        &self,
        mut upstream: ChunkStream,
        entered_plugins: Vec<usize>,
        ctx: DownstreamContext,
    ) -> mpsc::Receiver<Result<StreamChunk, GatewayError>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let plugins = self.plugins.clone();

        tokio::spawn(async move {
            let mut next_index = 0u64;
            loop {
                let item = tokio::select! {
                    biased;
                    // A caller cancellation takes priority over a chunk that
                    // happened to arrive at the same instant: the pipeline
                    // must stop draining upstream and close out with a
                    // `Cancelled` terminal chunk instead (spec §4.G step 6),
                    // not silently finish the stream as if it completed.
                    _ = ctx.cancel.cancelled() => {
                        Some(Err(GatewayError::new(ErrorKind::Cancelled, "stream cancelled by caller")))
                    }
                    item = upstream.recv() => item,
                };
                let Some(item) = item else { break };

                let mut mapped = match item {
                    Ok(mut chunk) => {
                        chunk.chunk_index = next_index;
                        next_index += 1;
                        Ok(chunk)
                    }
                    Err(err) => Err(err),
                };
                if let Ok(chunk) = &mut mapped {
                    plugins.run_after_chunk(&entered_plugins, chunk, &ctx).await;
                }

                let is_terminal = matches!(&mapped, Ok(chunk) if chunk.is_final) || mapped.is_err();
                if tx.send(mapped).await.is_err() {
                    break;
                }
                if is_terminal {
                    break;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_protocol::FinishReason;

    #[tokio::test]
    async fn reassigns_chunk_indices_in_arrival_order() {
        let (tx, upstream) = mpsc::channel(4);
        tx.send(Ok(StreamChunk::text(99, "a"))).await.unwrap();
        tx.send(Ok(StreamChunk::text(1, "b"))).await.unwrap();
        tx.send(Ok(StreamChunk::terminal(
            0,
            FinishReason::Stop,
            Default::default(),
        )))
        .await
        .unwrap();
        drop(tx);

        let pipeline = StreamingPipeline::new(Arc::new(PluginChain::new(Vec::new())));
        let mut rx = pipeline.spawn(upstream, Vec::new(), DownstreamContext::default());

        let first = rx.recv().await.unwrap().unwrap();
        let second = rx.recv().await.unwrap().unwrap();
        let third = rx.recv().await.unwrap().unwrap();

        assert_eq!((first.chunk_index, second.chunk_index, third.chunk_index), (0, 1, 2));
        assert!(third.is_final);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_closes_stream_with_terminal_cancelled_chunk() {
        let (tx, upstream) = mpsc::channel(4);
        // Upstream never sends anything else; the pipeline must notice the
        // cancellation without waiting on it.
        let cancel = crate::provider::Cancellation::new();
        let mut ctx = DownstreamContext::default();
        ctx.cancel = cancel.clone();

        let pipeline = StreamingPipeline::new(Arc::new(PluginChain::new(Vec::new())));
        let mut rx = pipeline.spawn(upstream, Vec::new(), ctx);

        cancel.cancel();
        let item = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv())
            .await
            .expect("pipeline should close promptly on cancellation")
            .expect("a terminal chunk should be emitted");
        let err = item.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(rx.recv().await.is_none());
        drop(tx);
    }
}
