use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::StorageResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfigRecord {
    pub host: String,
    pub port: u16,
    pub admin_key_hash: String,
    pub proxy: Option<String>,
    pub dsn: String,
    pub event_redact_sensitive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: i64,
    pub provider_id: i64,
    pub value: String,
    pub models: Vec<String>,
    pub weight: f64,
    pub provider_config: serde_json::Value,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: i64,
    pub name: String,
    pub network: serde_json::Value,
    pub concurrency: serde_json::Value,
    pub custom_provider: Option<serde_json::Value>,
    pub enabled: bool,
    pub keys: Vec<KeyRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetRecord {
    pub id: String,
    pub max_limit: f64,
    pub current_usage: f64,
    pub reset_duration_secs: i64,
    pub last_reset: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub id: String,
    pub request_max: Option<i64>,
    pub request_current: i64,
    pub request_reset_duration_secs: i64,
    pub request_last_reset: OffsetDateTime,
    pub token_max: Option<i64>,
    pub token_current: i64,
    pub token_reset_duration_secs: i64,
    pub token_last_reset: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: String,
    pub customer_id: Option<String>,
    pub budget_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: String,
    pub budget_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualKeyRecord {
    pub id: String,
    pub value: String,
    pub team_id: Option<String>,
    pub customer_id: Option<String>,
    pub budget_id: Option<String>,
    pub rate_limit_id: Option<String>,
    pub allowed_models: Vec<String>,
    pub provider_overrides: serde_json::Value,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfigRecord {
    pub id: i64,
    pub name: String,
    pub order_index: i32,
    pub enabled: bool,
    pub config: serde_json::Value,
}

/// A full point-in-time load of everything the governance cache and
/// provider registry need to start serving traffic. `load_snapshot` reads
/// this in one pass so startup doesn't interleave with concurrent writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub providers: Vec<ProviderRecord>,
    pub budgets: Vec<BudgetRecord>,
    pub rate_limits: Vec<RateLimitRecord>,
    pub teams: Vec<TeamRecord>,
    pub customers: Vec<CustomerRecord>,
    pub virtual_keys: Vec<VirtualKeyRecord>,
    pub plugin_configs: Vec<PluginConfigRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordKind {
    Downstream,
    Upstream,
    Operational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub kind: LogRecordKind,
    pub trace_id: Option<String>,
    pub payload: serde_json::Value,
    pub at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct LogQueryFilter {
    pub kind: Option<LogRecordKind>,
    pub trace_id: Option<String>,
    pub since: Option<OffsetDateTime>,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct LogQueryResult {
    pub records: Vec<LogRecord>,
    pub total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct UsageAggregateFilter {
    pub virtual_key_id: Option<String>,
    pub team_id: Option<String>,
    pub customer_id: Option<String>,
    pub since: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageAggregate {
    pub request_count: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// Durable persistence for everything that isn't on the hot path: the
/// governance hierarchy (providers/keys/budgets/rate limits/virtual
/// keys/teams/customers/plugin configuration), plus an append-only
/// event/traffic log. The hot path reads an in-memory cache kept current by
/// the write methods here (spec §3's "persistent store is the authority for
/// durability; writes go through the store and update the cache").
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfigRecord>>;
    async fn upsert_global_config(&self, config: GlobalConfigRecord) -> StorageResult<()>;

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot>;

    async fn upsert_provider(&self, provider: ProviderRecord) -> StorageResult<ProviderRecord>;
    async fn delete_provider(&self, id: i64) -> StorageResult<()>;

    async fn upsert_key(&self, provider_id: i64, key: KeyRecord) -> StorageResult<KeyRecord>;
    async fn set_key_enabled(&self, id: i64, enabled: bool) -> StorageResult<()>;
    async fn delete_key(&self, id: i64) -> StorageResult<()>;

    async fn upsert_budget(&self, budget: BudgetRecord) -> StorageResult<BudgetRecord>;
    async fn delete_budget(&self, id: &str) -> StorageResult<()>;

    async fn upsert_rate_limit(&self, rate_limit: RateLimitRecord) -> StorageResult<RateLimitRecord>;
    async fn delete_rate_limit(&self, id: &str) -> StorageResult<()>;

    async fn upsert_team(&self, team: TeamRecord) -> StorageResult<TeamRecord>;
    async fn delete_team(&self, id: &str) -> StorageResult<()>;

    async fn upsert_customer(&self, customer: CustomerRecord) -> StorageResult<CustomerRecord>;
    async fn delete_customer(&self, id: &str) -> StorageResult<()>;

    async fn upsert_virtual_key(&self, key: VirtualKeyRecord) -> StorageResult<VirtualKeyRecord>;
    async fn set_virtual_key_enabled(&self, id: &str, enabled: bool) -> StorageResult<()>;
    async fn delete_virtual_key(&self, id: &str) -> StorageResult<()>;

    async fn upsert_plugin_config(&self, config: PluginConfigRecord) -> StorageResult<PluginConfigRecord>;
    async fn delete_plugin_config(&self, id: i64) -> StorageResult<()>;

    /// Atomically persists a budget accounting update: reloads the row under
    /// its per-row lock, resets it if expired, adds `cost`, and writes the
    /// new value back. Returns the post-update usage so the caller can
    /// mirror it into the in-memory cache.
    async fn accrue_budget(&self, id: &str, cost: f64, now: OffsetDateTime) -> StorageResult<BudgetRecord>;

    /// Same per-row-locked reload/reset/increment, for the two independent
    /// rate-limit counters.
    async fn accrue_rate_limit(
        &self,
        id: &str,
        requests: u64,
        tokens: u64,
        now: OffsetDateTime,
    ) -> StorageResult<RateLimitRecord>;

    async fn append_log(&self, kind: LogRecordKind, trace_id: Option<String>, payload: serde_json::Value) -> StorageResult<()>;
    async fn query_logs(&self, filter: LogQueryFilter) -> StorageResult<LogQueryResult>;
    async fn aggregate_usage(&self, filter: UsageAggregateFilter) -> StorageResult<UsageAggregate>;
}
