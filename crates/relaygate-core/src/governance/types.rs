use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type BudgetId = String;
pub type RateLimitId = String;
pub type TeamId = String;
pub type CustomerId = String;
pub type VirtualKeyId = String;

/// Component E's `Budget` entity (spec §3): `{id, max_limit (dollars),
/// current_usage (dollars), reset_duration, last_reset}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub id: BudgetId,
    pub max_limit: f64,
    pub current_usage: f64,
    pub reset_duration: time::Duration,
    #[serde(with = "time::serde::rfc3339")]
    pub last_reset: OffsetDateTime,
}

impl Budget {
    /// True when `last_reset + reset_duration <= now`, i.e. this budget's
    /// window has lapsed and should be treated as reset for the purposes of
    /// the pre-gate check (the actual zeroing happens lazily here or
    /// proactively via the sweeper — spec's Open Question 1: this can admit
    /// more than `max_limit` of cost within one window under heavy skew).
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.last_reset + self.reset_duration <= now
    }

    pub fn reset_if_expired(&mut self, now: OffsetDateTime) {
        if self.is_expired(now) {
            self.current_usage = 0.0;
            self.last_reset = now;
        }
    }

    /// Pre-gate check: a budget at or past its reset boundary always
    /// admits, since the sweeper/lazy-reset path hasn't zeroed it yet.
    pub fn admits(&self, now: OffsetDateTime) -> bool {
        self.is_expired(now) || self.current_usage <= self.max_limit
    }
}

/// Component E's `RateLimit` entity: independent token and request counters,
/// each on its own reset window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    pub id: RateLimitId,
    pub request_max: Option<u64>,
    pub request_current: u64,
    pub request_reset_duration: time::Duration,
    #[serde(with = "time::serde::rfc3339")]
    pub request_last_reset: OffsetDateTime,
    pub token_max: Option<u64>,
    pub token_current: u64,
    pub token_reset_duration: time::Duration,
    #[serde(with = "time::serde::rfc3339")]
    pub token_last_reset: OffsetDateTime,
}

impl RateLimit {
    pub fn reset_if_expired(&mut self, now: OffsetDateTime) {
        if now - self.request_last_reset >= self.request_reset_duration {
            self.request_current = 0;
            self.request_last_reset = now;
        }
        if now - self.token_last_reset >= self.token_reset_duration {
            self.token_current = 0;
            self.token_last_reset = now;
        }
    }

    pub fn admits_request(&self) -> bool {
        self.request_max.map(|max| self.request_current < max).unwrap_or(true)
    }
}

/// Component E's `Team` entity: `{id, customer_id?, budget_id?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub customer_id: Option<CustomerId>,
    pub budget_id: Option<BudgetId>,
}

/// Component E's `Customer` entity: `{id, budget_id?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub budget_id: Option<BudgetId>,
}

/// Component E's `VirtualKey` entity: `{id, value (opaque bearer), team_id?,
/// customer_id?, budget_id?, rate_limit_id?, allowed_keys[],
/// per-provider config overrides}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualKey {
    pub id: VirtualKeyId,
    /// The opaque bearer token value clients present. Looked up by this
    /// value, not by `id`, on the hot path.
    pub value: String,
    pub team_id: Option<TeamId>,
    pub customer_id: Option<CustomerId>,
    pub budget_id: Option<BudgetId>,
    pub rate_limit_id: Option<RateLimitId>,
    /// Model/provider allow-list; empty means no restriction.
    #[serde(default)]
    pub allowed_models: Vec<String>,
    #[serde(default)]
    pub provider_overrides: serde_json::Value,
}

impl VirtualKey {
    pub fn allows_model(&self, model: &str) -> bool {
        self.allowed_models.is_empty() || self.allowed_models.iter().any(|m| m == model)
    }
}
