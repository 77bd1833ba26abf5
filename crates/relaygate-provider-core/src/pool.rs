use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::events::{
    Event, EventHub, ModelUnavailableStartEvent, OperationalEvent, UnavailableStartEvent,
};
use crate::key::{Key, KeyId, KeyState, UnavailableReason};
use crate::model_unavailable_queue::ModelUnavailableQueue;
use crate::unavailable_queue::UnavailableQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireError;

/// Component B's key selection: weighted random without replacement among
/// the keys of a provider that are active, not in cooldown, and whose
/// model allow-list permits the requested model.
pub struct KeyPool {
    keys: RwLock<HashMap<KeyId, Key>>,
    by_provider: RwLock<HashMap<String, Vec<KeyId>>>,
    states: RwLock<HashMap<KeyId, KeyState>>,
    model_states: RwLock<HashMap<(KeyId, String), KeyState>>,
    events: EventHub,
    unavailable_queue: Arc<UnavailableQueue>,
    model_unavailable_queue: Arc<ModelUnavailableQueue>,
}

impl KeyPool {
    pub fn new(events: EventHub) -> Arc<Self> {
        let pool = Arc::new(Self {
            keys: RwLock::new(HashMap::new()),
            by_provider: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            model_states: RwLock::new(HashMap::new()),
            events,
            unavailable_queue: Arc::new(UnavailableQueue::new()),
            model_unavailable_queue: Arc::new(ModelUnavailableQueue::new()),
        });

        let recovery_pool = pool.clone();
        pool.unavailable_queue.clone().spawn_recovery(
            pool.events.clone(),
            move |key_id| {
                let recovery_pool = recovery_pool.clone();
                tokio::spawn(async move {
                    recovery_pool.states.write().await.insert(key_id, KeyState::Active);
                });
            },
        );

        let recovery_pool = pool.clone();
        pool.model_unavailable_queue.clone().spawn_recovery(
            pool.events.clone(),
            move |key_id, model| {
                let recovery_pool = recovery_pool.clone();
                let model = model.to_string();
                tokio::spawn(async move {
                    recovery_pool
                        .model_states
                        .write()
                        .await
                        .insert((key_id, model), KeyState::Active);
                });
            },
        );

        pool
    }

    pub async fn insert(&self, provider: &str, key: Key) {
        let key_id = key.id;
        self.keys.write().await.insert(key_id, key);
        self.states.write().await.entry(key_id).or_insert(KeyState::Active);
        let mut by_provider = self.by_provider.write().await;
        let ids = by_provider.entry(provider.to_string()).or_default();
        if !ids.contains(&key_id) {
            ids.push(key_id);
        }
    }

    pub async fn remove(&self, provider: &str, key_id: KeyId) {
        self.keys.write().await.remove(&key_id);
        self.states.write().await.remove(&key_id);
        if let Some(ids) = self.by_provider.write().await.get_mut(provider) {
            ids.retain(|id| *id != key_id);
        }
    }

    /// Weighted random without replacement: filter to eligible keys, then
    /// sample one proportional to `weight / sum(weight)`.
    pub async fn acquire(&self, provider: &str, model: &str) -> Result<Key, AcquireError> {
        let by_provider = self.by_provider.read().await;
        let Some(ids) = by_provider.get(provider) else {
            return Err(AcquireError);
        };
        let keys = self.keys.read().await;
        let states = self.states.read().await;
        let model_states = self.model_states.read().await;

        let mut candidates: Vec<(f64, Key)> = Vec::new();
        for id in ids {
            let Some(key) = keys.get(id) else { continue };
            if !key.allows_model(model) {
                continue;
            }
            if !states.get(id).map(KeyState::is_active).unwrap_or(true) {
                continue;
            }
            if !model_states
                .get(&(*id, model.to_string()))
                .map(KeyState::is_active)
                .unwrap_or(true)
            {
                continue;
            }
            if key.weight > 0.0 {
                candidates.push((key.weight, key.clone()));
            }
        }

        drop(keys);
        drop(states);
        drop(model_states);
        drop(by_provider);

        weighted_pick(candidates).ok_or(AcquireError)
    }

    pub async fn mark_unavailable(&self, key_id: KeyId, reason: UnavailableReason, cooldown: Duration) {
        let until = Instant::now() + cooldown;
        self.states
            .write()
            .await
            .insert(key_id, KeyState::Unavailable { until, reason });
        self.unavailable_queue.schedule(key_id, until).await;
        self.events
            .emit(Event::Operational(OperationalEvent::UnavailableStart(
                UnavailableStartEvent {
                    at: SystemTime::now(),
                    key_id,
                    reason,
                    until: SystemTime::now() + cooldown,
                },
            )))
            .await;
    }

    pub async fn mark_model_unavailable(
        &self,
        key_id: KeyId,
        model: &str,
        reason: UnavailableReason,
        cooldown: Duration,
    ) {
        let until = Instant::now() + cooldown;
        self.model_states
            .write()
            .await
            .insert((key_id, model.to_string()), KeyState::Unavailable { until, reason });
        self.model_unavailable_queue
            .schedule(key_id, model.to_string(), until)
            .await;
        self.events
            .emit(Event::Operational(OperationalEvent::ModelUnavailableStart(
                ModelUnavailableStartEvent {
                    at: SystemTime::now(),
                    key_id,
                    model: model.to_string(),
                    reason,
                    until: SystemTime::now() + cooldown,
                },
            )))
            .await;
    }

    pub async fn state(&self, key_id: KeyId) -> Option<KeyState> {
        self.states.read().await.get(&key_id).cloned()
    }
}

fn weighted_pick(candidates: Vec<(f64, Key)>) -> Option<Key> {
    if candidates.is_empty() {
        return None;
    }
    let total: f64 = candidates.iter().map(|(w, _)| w).sum();
    if total <= 0.0 {
        return None;
    }
    let mut x = rand::rng().random::<f64>() * total;
    for (weight, key) in &candidates {
        if x < *weight {
            return Some(key.clone());
        }
        x -= weight;
    }
    candidates.into_iter().last().map(|(_, key)| key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: KeyId, weight: f64, models: Vec<&str>) -> Key {
        Key {
            id,
            value: format!("secret-{id}"),
            models: models.into_iter().map(String::from).collect(),
            weight,
            provider_config: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn acquire_respects_model_allow_list() {
        let pool = KeyPool::new(EventHub::new(16));
        pool.insert("openai", key(1, 1.0, vec!["gpt-4o"])).await;
        pool.insert("openai", key(2, 1.0, vec!["gpt-3.5"])).await;

        let acquired = pool.acquire("openai", "gpt-4o").await.unwrap();
        assert_eq!(acquired.id, 1);
    }

    #[tokio::test]
    async fn acquire_fails_when_all_unavailable() {
        let pool = KeyPool::new(EventHub::new(16));
        pool.insert("openai", key(1, 1.0, vec![])).await;
        pool.mark_unavailable(1, UnavailableReason::RateLimit, Duration::from_secs(60))
            .await;

        let result = pool.acquire("openai", "gpt-4o").await;
        assert!(result.is_err());
    }

    #[test]
    fn weighted_pick_skips_zero_weight() {
        let candidates = vec![
            (0.0, key(1, 0.0, vec![])),
            (5.0, key(2, 5.0, vec![])),
        ];
        let picked = weighted_pick(candidates).unwrap();
        assert_eq!(picked.id, 2);
    }
}
