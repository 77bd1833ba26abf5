use std::sync::Arc;

use relaygate_protocol::{ErrorKind, GatewayError, Usage};
use relaygate_storage::Storage;
use time::OffsetDateTime;

use super::snapshot::GovernanceSnapshot;
use super::types::{Budget, BudgetId, RateLimit, RateLimitId, VirtualKey};
use crate::pricing::PriceTable;

/// Everything the accounting step (post-hook, spec §4.E) needs to know
/// about the admitted request: which budgets were checked (in hierarchy
/// order: VK, Team, Customer) and which rate limit, if any. Carried on
/// `DownstreamContext`-adjacent call state from admission through to the
/// terminal accounting call; never re-derived per fallback attempt (spec
/// §4.F rule 1: "governance is evaluated once against the originating
/// virtual key").
#[derive(Debug, Clone, Default)]
pub struct AdmitOutcome {
    pub virtual_key_id: Option<String>,
    pub team_id: Option<String>,
    pub customer_id: Option<String>,
    budget_ids: Vec<BudgetId>,
    rate_limit_id: Option<RateLimitId>,
}

/// Component E: resolves a bearer token to a virtual key, checks the
/// hierarchical budget and the rate limit, and on success accrues cost and
/// counters back through storage and into the hot-path snapshot.
pub struct GovernanceGate {
    snapshot: Arc<GovernanceSnapshot>,
    storage: Arc<dyn Storage>,
    prices: Arc<dyn PriceTable>,
    /// When false, the gate admits every request unconditionally — the
    /// spec's "when enabled and a bearer token accompanies the request".
    pub enabled: bool,
}

impl GovernanceGate {
    pub fn new(snapshot: Arc<GovernanceSnapshot>, storage: Arc<dyn Storage>, prices: Arc<dyn PriceTable>) -> Self {
        Self { snapshot, storage, prices, enabled: true }
    }

    /// Pre-gate check (spec §4.E). `bearer` is the token from the
    /// `Authorization` header, already stripped of any `Bearer ` prefix by
    /// the ingress layer.
    pub fn admit(&self, bearer: Option<&str>, provider: &str, model: &str) -> Result<AdmitOutcome, GatewayError> {
        if !self.enabled {
            return Ok(AdmitOutcome::default());
        }
        let Some(bearer) = bearer else {
            return Ok(AdmitOutcome::default());
        };

        let vk = self
            .snapshot
            .lookup_virtual_key(bearer)
            .ok_or_else(|| GatewayError::new(ErrorKind::VirtualKeyInvalid, "unknown virtual key").no_fallback())?;

        if !allows(&vk, provider, model) {
            return Err(GatewayError::new(
                ErrorKind::InvalidRequest,
                format!("virtual key '{}' is not allowed to use '{provider}/{model}'", vk.id),
            )
            .no_fallback());
        }

        let now = OffsetDateTime::now_utc();
        let budgets = self.hierarchy_budgets(&vk);
        for (level, budget) in &budgets {
            if !budget.admits(now) {
                return Err(GatewayError::new(
                    ErrorKind::BudgetExceeded,
                    format!("{level} budget '{}' exceeded its limit", budget.id),
                )
                .no_fallback());
            }
        }

        if let Some(rl_id) = &vk.rate_limit_id {
            if let Some(rl) = self.snapshot.rate_limit(rl_id) {
                let mut rl = (*rl).clone();
                rl.reset_if_expired(now);
                if !rl.admits_request() {
                    return Err(GatewayError::new(
                        ErrorKind::RateLimited,
                        format!("rate limit '{rl_id}' request quota exhausted"),
                    )
                    .no_fallback());
                }
            }
        }

        Ok(AdmitOutcome {
            virtual_key_id: Some(vk.id.clone()),
            team_id: vk.team_id.clone(),
            customer_id: vk.customer_id.clone(),
            budget_ids: budgets.into_iter().map(|(_, b)| b.id.clone()).collect(),
            rate_limit_id: vk.rate_limit_id.clone(),
        })
    }

    /// Up to three budgets, VK → Team → Customer, per spec §3 invariant 1.
    fn hierarchy_budgets(&self, vk: &VirtualKey) -> Vec<(&'static str, Arc<Budget>)> {
        let mut out = Vec::with_capacity(3);
        if let Some(id) = &vk.budget_id {
            if let Some(b) = self.snapshot.budget(id) {
                out.push(("virtual-key", b));
            }
        }
        if let Some(team_id) = &vk.team_id {
            if let Some(team) = self.snapshot.team(team_id) {
                if let Some(id) = &team.budget_id {
                    if let Some(b) = self.snapshot.budget(id) {
                        out.push(("team", b));
                    }
                }
                if let Some(customer_id) = team.customer_id.clone().or_else(|| vk.customer_id.clone()) {
                    if let Some(customer) = self.snapshot.customer(&customer_id) {
                        if let Some(id) = &customer.budget_id {
                            if let Some(b) = self.snapshot.budget(id) {
                                out.push(("customer", b));
                            }
                        }
                    }
                }
                return out;
            }
        }
        if let Some(customer_id) = &vk.customer_id {
            if let Some(customer) = self.snapshot.customer(customer_id) {
                if let Some(id) = &customer.budget_id {
                    if let Some(b) = self.snapshot.budget(id) {
                        out.push(("customer", b));
                    }
                }
            }
        }
        out
    }

    /// Post-success accounting (spec §4.E "Accounting (post)"). Reloads each
    /// affected row through storage (which itself locks per-row), so
    /// concurrent requests against the same hierarchy serialize on the
    /// innermost row rather than racing in the cache.
    pub async fn account(&self, outcome: &AdmitOutcome, provider: &str, model: &str, usage: &Usage) {
        if outcome.budget_ids.is_empty() && outcome.rate_limit_id.is_none() {
            return;
        }
        let cost = self.prices.cost(provider, model, usage);
        let now = OffsetDateTime::now_utc();

        for budget_id in &outcome.budget_ids {
            match self.storage.accrue_budget(budget_id, cost, now).await {
                Ok(record) => self.snapshot.put_budget(record_to_budget(record)),
                Err(err) => {
                    tracing::warn!(budget_id, error = %err, "failed to accrue budget");
                }
            }
        }

        if let Some(rl_id) = &outcome.rate_limit_id {
            let tokens = usage.total_tokens;
            match self.storage.accrue_rate_limit(rl_id, 1, tokens, now).await {
                Ok(record) => self.snapshot.put_rate_limit(record_to_rate_limit(record)),
                Err(err) => {
                    tracing::warn!(rate_limit_id = rl_id.as_str(), error = %err, "failed to accrue rate limit");
                }
            }
        }
    }
}

fn allows(vk: &VirtualKey, provider: &str, model: &str) -> bool {
    if vk.allowed_models.is_empty() {
        return true;
    }
    let qualified = format!("{provider}/{model}");
    vk.allowed_models.iter().any(|allowed| allowed == model || allowed == &qualified)
}

pub(crate) fn record_to_budget(record: relaygate_storage::BudgetRecord) -> Budget {
    Budget {
        id: record.id,
        max_limit: record.max_limit,
        current_usage: record.current_usage,
        reset_duration: time::Duration::seconds(record.reset_duration_secs),
        last_reset: record.last_reset,
    }
}

pub(crate) fn record_to_rate_limit(record: relaygate_storage::RateLimitRecord) -> RateLimit {
    RateLimit {
        id: record.id,
        request_max: record.request_max.map(|v| v.max(0) as u64),
        request_current: record.request_current.max(0) as u64,
        request_reset_duration: time::Duration::seconds(record.request_reset_duration_secs),
        request_last_reset: record.request_last_reset,
        token_max: record.token_max.map(|v| v.max(0) as u64),
        token_current: record.token_current.max(0) as u64,
        token_reset_duration: time::Duration::seconds(record.token_reset_duration_secs),
        token_last_reset: record.token_last_reset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::StaticPriceTable;
    use relaygate_storage::MemoryStorage;

    fn gate() -> GovernanceGate {
        GovernanceGate::new(
            Arc::new(GovernanceSnapshot::new()),
            Arc::new(MemoryStorage::new()),
            Arc::new(StaticPriceTable::default()),
        )
    }

    #[test]
    fn missing_bearer_admits_when_disabled() {
        let mut g = gate();
        g.enabled = false;
        let outcome = g.admit(None, "openai", "gpt-4o").unwrap();
        assert!(outcome.virtual_key_id.is_none());
    }

    #[test]
    fn unknown_bearer_is_denied() {
        let g = gate();
        let err = g.admit(Some("sk-nope"), "openai", "gpt-4o").unwrap_err();
        assert_eq!(err.kind, ErrorKind::VirtualKeyInvalid);
    }

    #[test]
    fn disallowed_model_is_denied() {
        let g = gate();
        g.snapshot.put_virtual_key(VirtualKey {
            id: "vk_1".into(),
            value: "sk-vk-1".into(),
            team_id: None,
            customer_id: None,
            budget_id: None,
            rate_limit_id: None,
            allowed_models: vec!["claude-3".into()],
            provider_overrides: serde_json::Value::Null,
        });
        let err = g.admit(Some("sk-vk-1"), "openai", "gpt-4o").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn budget_exceeded_denies_admission() {
        let g = gate();
        g.snapshot.put_budget(Budget {
            id: "b_1".into(),
            max_limit: 1.0,
            current_usage: 1.01,
            reset_duration: time::Duration::hours(1),
            last_reset: OffsetDateTime::now_utc(),
        });
        g.snapshot.put_virtual_key(VirtualKey {
            id: "vk_1".into(),
            value: "sk-vk-1".into(),
            team_id: None,
            customer_id: None,
            budget_id: Some("b_1".into()),
            rate_limit_id: None,
            allowed_models: Vec::new(),
            provider_overrides: serde_json::Value::Null,
        });
        let err = g.admit(Some("sk-vk-1"), "openai", "gpt-4o").unwrap_err();
        assert_eq!(err.kind, ErrorKind::BudgetExceeded);
    }

    #[test]
    fn rate_limit_exhausted_denies_admission() {
        let g = gate();
        g.snapshot.put_rate_limit(RateLimit {
            id: "rl_1".into(),
            request_max: Some(1),
            request_current: 1,
            request_reset_duration: time::Duration::seconds(3600),
            request_last_reset: OffsetDateTime::now_utc(),
            token_max: None,
            token_current: 0,
            token_reset_duration: time::Duration::seconds(3600),
            token_last_reset: OffsetDateTime::now_utc(),
        });
        g.snapshot.put_virtual_key(VirtualKey {
            id: "vk_1".into(),
            value: "sk-vk-1".into(),
            team_id: None,
            customer_id: None,
            budget_id: None,
            rate_limit_id: Some("rl_1".into()),
            allowed_models: Vec::new(),
            provider_overrides: serde_json::Value::Null,
        });
        let err = g.admit(Some("sk-vk-1"), "openai", "gpt-4o").unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited);
    }

    /// Once the rate limit's window has elapsed, `admit` treats it as reset
    /// even though the stored counter is still at its cap — the same lazy,
    /// read-time reset `Budget::admits` uses (spec §4.E).
    #[test]
    fn rate_limit_admits_again_once_its_window_elapses() {
        let g = gate();
        g.snapshot.put_rate_limit(RateLimit {
            id: "rl_1".into(),
            request_max: Some(1),
            request_current: 1,
            request_reset_duration: time::Duration::seconds(1),
            request_last_reset: OffsetDateTime::now_utc() - time::Duration::seconds(10),
            token_max: None,
            token_current: 0,
            token_reset_duration: time::Duration::seconds(1),
            token_last_reset: OffsetDateTime::now_utc() - time::Duration::seconds(10),
        });
        g.snapshot.put_virtual_key(VirtualKey {
            id: "vk_1".into(),
            value: "sk-vk-1".into(),
            team_id: None,
            customer_id: None,
            budget_id: None,
            rate_limit_id: Some("rl_1".into()),
            allowed_models: Vec::new(),
            provider_overrides: serde_json::Value::Null,
        });
        assert!(g.admit(Some("sk-vk-1"), "openai", "gpt-4o").is_ok());
    }

    #[test]
    fn expired_budget_admits_unconditionally() {
        let g = gate();
        g.snapshot.put_budget(Budget {
            id: "b_1".into(),
            max_limit: 1.0,
            current_usage: 50.0,
            reset_duration: time::Duration::seconds(1),
            last_reset: OffsetDateTime::now_utc() - time::Duration::seconds(10),
        });
        g.snapshot.put_virtual_key(VirtualKey {
            id: "vk_1".into(),
            value: "sk-vk-1".into(),
            team_id: None,
            customer_id: None,
            budget_id: Some("b_1".into()),
            rate_limit_id: None,
            allowed_models: Vec::new(),
            provider_overrides: serde_json::Value::Null,
        });
        assert!(g.admit(Some("sk-vk-1"), "openai", "gpt-4o").is_ok());
    }
}
