use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::events::{Event, EventHub, OperationalEvent, UnavailableEndEvent};
use crate::key::KeyId;

struct Entry {
    until: Instant,
    key_id: KeyId,
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
        // Reverse so the BinaryHeap (a max-heap) pops the earliest deadline first.
        other.until.cmp(&self.until)
    }
}

/// Background task that clears key-level unavailability once its cooldown
/// elapses, so a scheduled recovery doesn't depend on the next `acquire`
/// call happening to notice the deadline passed. Grounded on the teacher's
/// `UnavailableQueue`.
pub struct UnavailableQueue {
    heap: Arc<Mutex<BinaryHeap<Entry>>>,
}

impl UnavailableQueue {
    pub fn new() -> Self {
        Self {
            heap: Arc::new(Mutex::new(BinaryHeap::new())),
        }
    }

    pub async fn schedule(&self, key_id: KeyId, until: Instant) {
        self.heap.lock().await.push(Entry { until, key_id });
    }

    /// Spawns the recovery loop. `on_recover` clears the key's state back to
    /// active; call sites pass a closure capturing the owning pool.
    pub fn spawn_recovery<F>(self: Arc<Self>, events: EventHub, on_recover: F)
    where
        F: Fn(KeyId) + Send + Sync + 'static,
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
                                    due.push(heap.pop().unwrap().key_id);
                                } else {
                                    break;
                                }
                            }
                            due
                        };
                        for key_id in due {
                            on_recover(key_id);
                            events
                                .emit(Event::Operational(OperationalEvent::UnavailableEnd(
                                    UnavailableEndEvent {
                                        at: std::time::SystemTime::now(),
                                        key_id,
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

impl Default for UnavailableQueue {
    fn default() -> Self {
        Self::new()
    }
}
