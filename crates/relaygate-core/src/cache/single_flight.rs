use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use relaygate_protocol::{ErrorKind, GatewayError, GatewayResponse};
use tokio::sync::broadcast;

/// Collapses N concurrent calls for the same key into one: the first caller
/// becomes the leader and actually runs `compute`; every other caller
/// subscribes to the leader's result. Grounded on
/// `relaygate_provider_core::events::EventHub`'s broadcast-channel idiom,
/// narrowed to a single-slot, remove-on-completion channel per key.
#[derive(Default)]
pub struct SingleFlight {
    inflight: Mutex<HashMap<String, broadcast::Sender<Result<GatewayResponse, GatewayError>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn execute<F, Fut>(&self, key: &str, compute: F) -> Result<GatewayResponse, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GatewayResponse, GatewayError>>,
    {
        let follower_rx = {
            let mut inflight = self.inflight.lock().expect("single-flight mutex poisoned");
            match inflight.get(key) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    inflight.insert(key.to_string(), tx);
                    None
                }
            }
        };

        if let Some(mut rx) = follower_rx {
            return rx.recv().await.unwrap_or_else(|_| {
                Err(GatewayError::new(ErrorKind::Internal, "single-flight leader dropped without a result"))
            });
        }

        let result = compute().await;

        let tx = self.inflight.lock().expect("single-flight mutex poisoned").remove(key);
        if let Some(tx) = tx {
            let _ = tx.send(result.clone());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_protocol::{Message, Role, Usage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_calls_for_same_key_share_one_compute() {
        let flight = Arc::new(SingleFlight::new());
        let upstream_calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let upstream_calls = upstream_calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .execute("same-key", || async {
                        upstream_calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(GatewayResponse {
                            model: "m".into(),
                            message: Message::text(Role::Assistant, "pong"),
                            finish_reason: None,
                            usage: Usage::default(),
                            extra: Default::default(),
                        })
                    })
                    .await
            }));
        }

        for handle in handles {
            let resp = handle.await.unwrap().unwrap();
            assert_eq!(resp.message.content.len(), 1);
        }

        assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
    }
}
