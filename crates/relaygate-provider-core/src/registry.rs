use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::Provider;

/// Component B: the live set of registered providers, published behind an
/// `ArcSwap` snapshot so a config reload never blocks an in-flight request
/// against a partially-updated map (mirrors the snapshot-then-republish
/// pattern the gateway state layer uses elsewhere).
pub struct ProviderRegistry {
    snapshot: ArcSwap<HashMap<String, Arc<dyn Provider>>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    pub fn from_providers(providers: Vec<Arc<dyn Provider>>) -> Self {
        let registry = Self::new();
        registry.replace(providers);
        registry
    }

    pub fn register(&self, provider: Arc<dyn Provider>) {
        self.snapshot.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(provider.name().to_string(), provider.clone());
            Arc::new(next)
        });
    }

    pub fn deregister(&self, name: &str) {
        self.snapshot.rcu(|current| {
            let mut next = (**current).clone();
            next.remove(name);
            Arc::new(next)
        });
    }

    /// Atomically replace the whole registered set, e.g. after a config reload.
    pub fn replace(&self, providers: Vec<Arc<dyn Provider>>) {
        let mut next = HashMap::with_capacity(providers.len());
        for provider in providers {
            next.insert(provider.name().to_string(), provider);
        }
        self.snapshot.store(Arc::new(next));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.snapshot.load().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot.load().keys().cloned().collect()
    }
}
