//! Streams a [`ChunkStream`] back to the client as dialect-encoded
//! server-sent events, with a periodic keep-alive comment so a reverse
//! proxy sitting in front of a long-lived response doesn't time it out —
//! grounded on the teacher's SSE heartbeat wrapper around its own
//! upstream-to-downstream byte streams.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use relaygate_protocol::dialect::{self, DialectKind};
use relaygate_provider_core::ChunkStream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const RELAY_CAPACITY: usize = 32;

pub fn stream_response(
    kind: DialectKind,
    model: String,
    mut stream: ChunkStream,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(RELAY_CAPACITY);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                item = stream.recv() => {
                    match item {
                        Some(Ok(chunk)) => {
                            let is_final = chunk.is_final;
                            let payload = dialect::encode_stream_chunk(kind, &chunk, &model);
                            if tx.send(Event::default().data(payload.to_string())).await.is_err() {
                                return;
                            }
                            if is_final {
                                if matches!(kind, DialectKind::OpenAi | DialectKind::LiteLlm) {
                                    let _ = tx.send(Event::default().data("[DONE]")).await;
                                }
                                return;
                            }
                        }
                        Some(Err(err)) => {
                            let payload = dialect::encode_error(kind, &err);
                            let _ = tx.send(Event::default().event("error").data(payload.to_string())).await;
                            return;
                        }
                        None => return,
                    }
                }
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    if tx.send(Event::default().comment("keep-alive")).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    Sse::new(ReceiverStream::new(rx).map(Ok)).keep_alive(KeepAlive::new())
}
