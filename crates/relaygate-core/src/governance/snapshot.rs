use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::types::{Budget, BudgetId, Customer, CustomerId, RateLimit, RateLimitId, Team, TeamId, VirtualKey};

#[derive(Debug, Clone, Default)]
struct Data {
    /// Virtual keys indexed by their opaque bearer value — the lookup the
    /// hot path actually does on every request. `VirtualKey::id` is only
    /// used for admin CRUD and cross-referencing.
    virtual_keys_by_value: HashMap<String, Arc<VirtualKey>>,
    teams: HashMap<TeamId, Arc<Team>>,
    customers: HashMap<CustomerId, Arc<Customer>>,
    budgets: HashMap<BudgetId, Arc<Budget>>,
    rate_limits: HashMap<RateLimitId, Arc<RateLimit>>,
}

/// Component E's in-memory authority for the hot path (spec §3's
/// "lifecycles": "the persistent store is the authority for durability; the
/// cache is the authority for the hot path"). Mirrors
/// `relaygate_provider_core::registry::ProviderRegistry`'s
/// load-whole-map/republish-whole-map pattern: readers never block on a
/// writer and never see a partially-updated hierarchy.
pub struct GovernanceSnapshot {
    data: ArcSwap<Data>,
}

impl Default for GovernanceSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl GovernanceSnapshot {
    pub fn new() -> Self {
        Self {
            data: ArcSwap::new(Arc::new(Data::default())),
        }
    }

    pub fn lookup_virtual_key(&self, bearer_value: &str) -> Option<Arc<VirtualKey>> {
        self.data.load().virtual_keys_by_value.get(bearer_value).cloned()
    }

    pub fn team(&self, id: &str) -> Option<Arc<Team>> {
        self.data.load().teams.get(id).cloned()
    }

    pub fn customer(&self, id: &str) -> Option<Arc<Customer>> {
        self.data.load().customers.get(id).cloned()
    }

    pub fn budget(&self, id: &str) -> Option<Arc<Budget>> {
        self.data.load().budgets.get(id).cloned()
    }

    pub fn rate_limit(&self, id: &str) -> Option<Arc<RateLimit>> {
        self.data.load().rate_limits.get(id).cloned()
    }

    pub fn put_virtual_key(&self, key: VirtualKey) {
        self.data.rcu(|current| {
            let mut next = (**current).clone();
            next.virtual_keys_by_value.insert(key.value.clone(), Arc::new(key.clone()));
            Arc::new(next)
        });
    }

    pub fn remove_virtual_key(&self, bearer_value: &str) {
        self.data.rcu(|current| {
            let mut next = (**current).clone();
            next.virtual_keys_by_value.remove(bearer_value);
            Arc::new(next)
        });
    }

    pub fn put_team(&self, team: Team) {
        self.data.rcu(|current| {
            let mut next = (**current).clone();
            next.teams.insert(team.id.clone(), Arc::new(team.clone()));
            Arc::new(next)
        });
    }

    pub fn remove_team(&self, id: &str) {
        self.data.rcu(|current| {
            let mut next = (**current).clone();
            next.teams.remove(id);
            Arc::new(next)
        });
    }

    pub fn put_customer(&self, customer: Customer) {
        self.data.rcu(|current| {
            let mut next = (**current).clone();
            next.customers.insert(customer.id.clone(), Arc::new(customer.clone()));
            Arc::new(next)
        });
    }

    pub fn remove_customer(&self, id: &str) {
        self.data.rcu(|current| {
            let mut next = (**current).clone();
            next.customers.remove(id);
            Arc::new(next)
        });
    }

    pub fn put_budget(&self, budget: Budget) {
        self.data.rcu(|current| {
            let mut next = (**current).clone();
            next.budgets.insert(budget.id.clone(), Arc::new(budget.clone()));
            Arc::new(next)
        });
    }

    pub fn remove_budget(&self, id: &str) {
        self.data.rcu(|current| {
            let mut next = (**current).clone();
            next.budgets.remove(id);
            Arc::new(next)
        });
    }

    pub fn put_rate_limit(&self, rate_limit: RateLimit) {
        self.data.rcu(|current| {
            let mut next = (**current).clone();
            next.rate_limits.insert(rate_limit.id.clone(), Arc::new(rate_limit.clone()));
            Arc::new(next)
        });
    }

    pub fn remove_rate_limit(&self, id: &str) {
        self.data.rcu(|current| {
            let mut next = (**current).clone();
            next.rate_limits.remove(id);
            Arc::new(next)
        });
    }

    pub fn replace_all(
        &self,
        virtual_keys: Vec<VirtualKey>,
        teams: Vec<Team>,
        customers: Vec<Customer>,
        budgets: Vec<Budget>,
        rate_limits: Vec<RateLimit>,
    ) {
        let mut next = Data::default();
        for vk in virtual_keys {
            next.virtual_keys_by_value.insert(vk.value.clone(), Arc::new(vk));
        }
        for team in teams {
            next.teams.insert(team.id.clone(), Arc::new(team));
        }
        for customer in customers {
            next.customers.insert(customer.id.clone(), Arc::new(customer));
        }
        for budget in budgets {
            next.budgets.insert(budget.id.clone(), Arc::new(budget));
        }
        for rate_limit in rate_limits {
            next.rate_limits.insert(rate_limit.id.clone(), Arc::new(rate_limit));
        }
        self.data.store(Arc::new(next));
    }

    /// Snapshot of every budget id reachable from the hierarchy, used by
    /// the background sweeper to walk all rows without a DB round-trip.
    pub fn all_budget_ids(&self) -> Vec<BudgetId> {
        self.data.load().budgets.keys().cloned().collect()
    }

    pub fn all_rate_limit_ids(&self) -> Vec<RateLimitId> {
        self.data.load().rate_limits.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_bearer_value() {
        let snap = GovernanceSnapshot::new();
        snap.put_virtual_key(VirtualKey {
            id: "vk_1".into(),
            value: "sk-vk-1".into(),
            team_id: None,
            customer_id: None,
            budget_id: None,
            rate_limit_id: None,
            allowed_models: Vec::new(),
            provider_overrides: serde_json::Value::Null,
        });
        assert!(snap.lookup_virtual_key("sk-vk-1").is_some());
        assert!(snap.lookup_virtual_key("sk-missing").is_none());
    }
}
