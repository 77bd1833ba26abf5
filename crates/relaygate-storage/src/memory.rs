use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::storage::{
    BudgetRecord, CustomerRecord, GlobalConfigRecord, KeyRecord, LogQueryFilter, LogQueryResult,
    LogRecord, LogRecordKind, PluginConfigRecord, ProviderRecord, RateLimitRecord, Storage,
    StorageSnapshot, TeamRecord, UsageAggregate, UsageAggregateFilter, VirtualKeyRecord,
};

/// Entirely in-process `Storage` backend: no durability across restarts,
/// used for tests and for running the gateway without a configured DSN.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
    next_provider_id: AtomicI64,
    next_key_id: AtomicI64,
    next_plugin_id: AtomicI64,
    next_log_id: AtomicI64,
}

#[derive(Default)]
struct Inner {
    global_config: Option<GlobalConfigRecord>,
    providers: HashMap<i64, ProviderRecord>,
    budgets: HashMap<String, BudgetRecord>,
    rate_limits: HashMap<String, RateLimitRecord>,
    teams: HashMap<String, TeamRecord>,
    customers: HashMap<String, CustomerRecord>,
    virtual_keys: HashMap<String, VirtualKeyRecord>,
    plugin_configs: HashMap<i64, PluginConfigRecord>,
    logs: Vec<LogRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfigRecord>> {
        Ok(self.inner.read().await.global_config.clone())
    }

    async fn upsert_global_config(&self, config: GlobalConfigRecord) -> StorageResult<()> {
        self.inner.write().await.global_config = Some(config);
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
        let inner = self.inner.read().await;
        Ok(StorageSnapshot {
            providers: inner.providers.values().cloned().collect(),
            budgets: inner.budgets.values().cloned().collect(),
            rate_limits: inner.rate_limits.values().cloned().collect(),
            teams: inner.teams.values().cloned().collect(),
            customers: inner.customers.values().cloned().collect(),
            virtual_keys: inner.virtual_keys.values().cloned().collect(),
            plugin_configs: inner.plugin_configs.values().cloned().collect(),
        })
    }

    async fn upsert_provider(&self, mut provider: ProviderRecord) -> StorageResult<ProviderRecord> {
        let mut inner = self.inner.write().await;
        if provider.id == 0 {
            provider.id = self.next_provider_id.fetch_add(1, Ordering::SeqCst) + 1;
        }
        inner.providers.insert(provider.id, provider.clone());
        Ok(provider)
    }

    async fn delete_provider(&self, id: i64) -> StorageResult<()> {
        self.inner.write().await.providers.remove(&id);
        Ok(())
    }

    async fn upsert_key(&self, provider_id: i64, mut key: KeyRecord) -> StorageResult<KeyRecord> {
        let mut inner = self.inner.write().await;
        if key.id == 0 {
            key.id = self.next_key_id.fetch_add(1, Ordering::SeqCst) + 1;
        }
        key.provider_id = provider_id;
        let Some(provider) = inner.providers.get_mut(&provider_id) else {
            return Err(StorageError::NotFound(format!("provider {provider_id}")));
        };
        if let Some(existing) = provider.keys.iter_mut().find(|k| k.id == key.id) {
            *existing = key.clone();
        } else {
            provider.keys.push(key.clone());
        }
        Ok(key)
    }

    async fn set_key_enabled(&self, id: i64, enabled: bool) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        for provider in inner.providers.values_mut() {
            if let Some(key) = provider.keys.iter_mut().find(|k| k.id == id) {
                key.enabled = enabled;
                return Ok(());
            }
        }
        Err(StorageError::NotFound(format!("key {id}")))
    }

    async fn delete_key(&self, id: i64) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        for provider in inner.providers.values_mut() {
            provider.keys.retain(|k| k.id != id);
        }
        Ok(())
    }

    async fn upsert_budget(&self, budget: BudgetRecord) -> StorageResult<BudgetRecord> {
        self.inner.write().await.budgets.insert(budget.id.clone(), budget.clone());
        Ok(budget)
    }

    async fn delete_budget(&self, id: &str) -> StorageResult<()> {
        self.inner.write().await.budgets.remove(id);
        Ok(())
    }

    async fn upsert_rate_limit(&self, rate_limit: RateLimitRecord) -> StorageResult<RateLimitRecord> {
        self.inner
            .write()
            .await
            .rate_limits
            .insert(rate_limit.id.clone(), rate_limit.clone());
        Ok(rate_limit)
    }

    async fn delete_rate_limit(&self, id: &str) -> StorageResult<()> {
        self.inner.write().await.rate_limits.remove(id);
        Ok(())
    }

    async fn upsert_team(&self, team: TeamRecord) -> StorageResult<TeamRecord> {
        self.inner.write().await.teams.insert(team.id.clone(), team.clone());
        Ok(team)
    }

    async fn delete_team(&self, id: &str) -> StorageResult<()> {
        self.inner.write().await.teams.remove(id);
        Ok(())
    }

    async fn upsert_customer(&self, customer: CustomerRecord) -> StorageResult<CustomerRecord> {
        self.inner
            .write()
            .await
            .customers
            .insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn delete_customer(&self, id: &str) -> StorageResult<()> {
        self.inner.write().await.customers.remove(id);
        Ok(())
    }

    async fn upsert_virtual_key(&self, key: VirtualKeyRecord) -> StorageResult<VirtualKeyRecord> {
        self.inner
            .write()
            .await
            .virtual_keys
            .insert(key.id.clone(), key.clone());
        Ok(key)
    }

    async fn set_virtual_key_enabled(&self, id: &str, enabled: bool) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let key = inner
            .virtual_keys
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("virtual key {id}")))?;
        key.enabled = enabled;
        Ok(())
    }

    async fn delete_virtual_key(&self, id: &str) -> StorageResult<()> {
        self.inner.write().await.virtual_keys.remove(id);
        Ok(())
    }

    async fn upsert_plugin_config(&self, mut config: PluginConfigRecord) -> StorageResult<PluginConfigRecord> {
        let mut inner = self.inner.write().await;
        if config.id == 0 {
            config.id = self.next_plugin_id.fetch_add(1, Ordering::SeqCst) + 1;
        }
        inner.plugin_configs.insert(config.id, config.clone());
        Ok(config)
    }

    async fn delete_plugin_config(&self, id: i64) -> StorageResult<()> {
        self.inner.write().await.plugin_configs.remove(&id);
        Ok(())
    }

    async fn accrue_budget(&self, id: &str, cost: f64, now: OffsetDateTime) -> StorageResult<BudgetRecord> {
        let mut inner = self.inner.write().await;
        let budget = inner
            .budgets
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("budget {id}")))?;
        if now - budget.last_reset >= time::Duration::seconds(budget.reset_duration_secs) {
            budget.current_usage = 0.0;
            budget.last_reset = now;
        }
        budget.current_usage += cost;
        Ok(budget.clone())
    }

    async fn accrue_rate_limit(
        &self,
        id: &str,
        requests: u64,
        tokens: u64,
        now: OffsetDateTime,
    ) -> StorageResult<RateLimitRecord> {
        let mut inner = self.inner.write().await;
        let rl = inner
            .rate_limits
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("rate limit {id}")))?;
        if now - rl.request_last_reset >= time::Duration::seconds(rl.request_reset_duration_secs) {
            rl.request_current = 0;
            rl.request_last_reset = now;
        }
        if now - rl.token_last_reset >= time::Duration::seconds(rl.token_reset_duration_secs) {
            rl.token_current = 0;
            rl.token_last_reset = now;
        }
        rl.request_current += requests as i64;
        rl.token_current += tokens as i64;
        Ok(rl.clone())
    }

    async fn append_log(
        &self,
        kind: LogRecordKind,
        trace_id: Option<String>,
        payload: serde_json::Value,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let id = self.next_log_id.fetch_add(1, Ordering::SeqCst) + 1;
        inner.logs.push(LogRecord {
            id,
            kind,
            trace_id,
            payload,
            at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }

    async fn query_logs(&self, filter: LogQueryFilter) -> StorageResult<LogQueryResult> {
        let inner = self.inner.read().await;
        let matched: Vec<&LogRecord> = inner
            .logs
            .iter()
            .filter(|r| filter.kind.map(|k| k == r.kind).unwrap_or(true))
            .filter(|r| {
                filter
                    .trace_id
                    .as_deref()
                    .map(|t| r.trace_id.as_deref() == Some(t))
                    .unwrap_or(true)
            })
            .filter(|r| filter.since.map(|since| r.at >= since).unwrap_or(true))
            .collect();
        let total = matched.len() as u64;
        let page = matched
            .into_iter()
            .skip(filter.offset as usize)
            .take(if filter.limit == 0 { u64::MAX } else { filter.limit } as usize)
            .cloned()
            .collect();
        Ok(LogQueryResult { records: page, total })
    }

    async fn aggregate_usage(&self, _filter: UsageAggregateFilter) -> StorageResult<UsageAggregate> {
        // Usage aggregation reads the traffic log, which this in-memory
        // backend stores as opaque JSON payloads; a real deployment uses
        // the sea-orm backend's indexed aggregate query instead.
        Ok(UsageAggregate::default())
    }
}
