//! Component E: virtual-key resolution, hierarchical budget/rate-limit
//! checks, and post-success cost accounting (spec §4.E).
//!
//! The hot path (`GovernanceGate::admit`/`GovernanceGate::account`) only
//! ever touches the in-memory [`GovernanceSnapshot`], published behind an
//! `ArcSwap` the same way `relaygate-provider-core::registry::ProviderRegistry`
//! publishes its provider map. Writes go through `relaygate-storage::Storage`
//! and republish a new snapshot — they never mutate the live snapshot in
//! place, so a reader never observes a half-updated hierarchy.

pub mod gate;
pub mod snapshot;
pub mod sweeper;
pub mod types;

pub use gate::{AdmitOutcome, GovernanceGate};
pub use snapshot::GovernanceSnapshot;
pub use sweeper::spawn_sweeper;
pub use types::{
    Budget, BudgetId, Customer, CustomerId, RateLimit, RateLimitId, Team, TeamId, VirtualKey,
    VirtualKeyId,
};
