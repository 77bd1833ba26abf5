//! Gateway-specific orchestration: governance, response caching, the
//! fallback driver, and the engine that sequences them with the
//! provider-agnostic machinery in `relaygate-provider-core`.

pub mod cache;
pub mod engine;
pub mod fallback;
pub mod governance;
pub mod pricing;

pub use cache::{CacheDebug, Embedder, InMemoryVectorStore, ResponseCache, SemanticConfig, VectorStore};
pub use engine::{DispatchRequest, GatewayEngine};
pub use fallback::{FallbackDriver, Target};
pub use governance::{
    AdmitOutcome, Budget, BudgetId, Customer, CustomerId, GovernanceGate, GovernanceSnapshot, RateLimit,
    RateLimitId, Team, TeamId, VirtualKey, VirtualKeyId,
};
pub use pricing::{PriceTable, Rate, StaticPriceTable};
