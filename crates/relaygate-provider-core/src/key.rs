use serde::{Deserialize, Serialize};

pub type KeyId = i64;

/// Component B's `Key` entity (spec §3): one credential belonging to a
/// provider, with the model allow-list and sampling weight that `SelectKey`
/// uses to pick among several keys for the same provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub id: KeyId,
    /// The secret value, already resolved past any `"env.NAME"` reference
    /// (relaygate-common::env::resolve does that resolution at load time).
    pub value: String,
    /// Allow-list of models this key may serve; empty means "all models".
    #[serde(default)]
    pub models: Vec<String>,
    /// Sampling weight for weighted-random-without-replacement selection.
    /// Must be > 0.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Provider-specific config (region, deployment map, ...), opaque to
    /// the scheduler and passed through to the wire adapter untouched.
    #[serde(default)]
    pub provider_config: serde_json::Value,
}

fn default_weight() -> f64 {
    1.0
}

impl Key {
    pub fn allows_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnavailableReason {
    RateLimit,
    Timeout,
    Upstream5xx,
    AuthInvalid,
    ModelDisallow,
    Manual,
    Unknown,
}

#[derive(Debug, Clone)]
pub enum KeyState {
    Active,
    Unavailable {
        until: tokio::time::Instant,
        reason: UnavailableReason,
    },
}

impl KeyState {
    pub fn is_active(&self) -> bool {
        matches!(self, KeyState::Active)
    }
}
