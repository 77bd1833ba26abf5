use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::events::{Event, EventHub, ModelUnavailableEndEvent, OperationalEvent};
use crate::key::KeyId;

struct Entry {
    until: Instant,
    key_id: KeyId,
    model: String,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.until == other.until
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.until.cmp(&self.until)
    }
}

/// Same scheduled-recovery idea as `UnavailableQueue`, but scoped to a single
/// (key, model) pair — a key can be unavailable for one model (e.g. a 404
/// "model not found" on a deployment-scoped key) while still serving others.
pub struct ModelUnavailableQueue {
    heap: Arc<Mutex<BinaryHeap<Entry>>>,
}

impl ModelUnavailableQueue {
    pub fn new() -> Self {
        Self {
            heap: Arc::new(Mutex::new(BinaryHeap::new())),
        }
    }

    pub async fn schedule(&self, key_id: KeyId, model: String, until: Instant) {
        self.heap.lock().await.push(Entry { until, key_id, model });
    }

    pub fn spawn_recovery<F>(self: Arc<Self>, events: EventHub, on_recover: F)
    where
        F: Fn(KeyId, &str) + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            loop {
                let next_deadline = {
                    let heap = self.heap.lock().await;
                    heap.peek().map(|e| e.until)
                };
                match next_deadline {
                    None => {
                        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                    }
                    Some(deadline) => {
                        tokio::time::sleep_until(deadline).await;
                        let due = {
                            let mut heap = self.heap.lock().await;
                            let mut due = Vec::new();
                            let now = Instant::now();
                            while let Some(top) = heap.peek() {
                                if top.until <= now {
                                    due.push(heap.pop().unwrap());
                                } else {
                                    break;
                                }
                            }
                            due
                        };
                        for entry in due {
                            on_recover(entry.key_id, &entry.model);
                            events
                                .emit(Event::Operational(OperationalEvent::ModelUnavailableEnd(
                                    ModelUnavailableEndEvent {
                                        at: std::time::SystemTime::now(),
                                        key_id: entry.key_id,
                                        model: entry.model,
                                    },
                                )))
                                .await;
                        }
                    }
                }
            }
        });
    }
}

impl Default for ModelUnavailableQueue {
    fn default() -> Self {
        Self::new()
    }
}
