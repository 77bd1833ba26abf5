use serde::{Deserialize, Serialize};

use crate::key::Key;

/// Component B's `Provider` entity (spec §3): `{name, keys[], network,
/// concurrency, custom-provider?}`. One entry per upstream provider the
/// operator has configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub keys: Vec<Key>,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub custom_provider: Option<CustomProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub base_url_override: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 4,
            backoff_initial_ms: 200,
            backoff_max_ms: 8_000,
            base_url_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub worker_count: usize,
    pub queue_depth: usize,
    /// How long `Enqueue` blocks for a free intake slot before returning
    /// `UpstreamTimeout` (spec §4.C).
    pub intake_wait_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            queue_depth: 256,
            intake_wait_ms: 30_000,
        }
    }
}

/// Lets an operator stand up a provider that speaks an existing wire
/// dialect (OpenAI-, Anthropic-, or Gemini-compatible) against a
/// non-default base URL, and restrict it to a subset of modalities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomProviderConfig {
    pub base_provider: String,
    #[serde(default)]
    pub allowed_modalities: Vec<String>,
}

impl CustomProviderConfig {
    pub fn allows_modality(&self, modality: &str) -> bool {
        self.allowed_modalities.is_empty()
            || self.allowed_modalities.iter().any(|m| m == modality)
    }
}
