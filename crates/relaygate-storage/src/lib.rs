//! Component-E/B persistence: the configuration store interface (spec §6)
//! with two backends, plus the append-only traffic/event log.
//!
//! The gateway's hot path never talks to this crate directly — it reads an
//! in-memory governance cache kept current by the write methods on
//! [`Storage`]. This crate only has to be correct and durable, not fast.

pub mod entities;
pub mod error;
pub mod memory;
pub mod seaorm;
pub mod storage;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;
pub use seaorm::SeaOrmStorage;
pub use storage::{
    BudgetRecord, CustomerRecord, GlobalConfigRecord, KeyRecord, LogQueryFilter, LogQueryResult,
    LogRecord, LogRecordKind, PluginConfigRecord, ProviderRecord, RateLimitRecord, Storage,
    StorageSnapshot, TeamRecord, UsageAggregate, UsageAggregateFilter, VirtualKeyRecord,
};
