//! The `/api/*` control plane (spec §6): CRUD over every governance and
//! provider entity, backed by `relaygate_storage::Storage` and mirrored into
//! the hot-path caches (`GovernanceSnapshot`) on every write so the gateway
//! never has to restart to pick up a change. Grounded on the teacher's
//! `apps/gproxy/src/admin.rs` router shape (one `AdminState`, a
//! `require_admin` gate in front of every handler, `{storage-write,
//! republish-cache}` pairs), generalized from gproxy's provider-pool/auth
//! entities to this gateway's budget/rate-limit/team/customer/virtual-key
//! hierarchy.

mod auth;
mod config;
mod governance;
mod logs;
mod plugins;
mod providers;

pub use governance::rebuild_snapshot;

use std::sync::{Arc, RwLock};

use axum::Router;
use axum::routing::{delete, get, post, put};
use relaygate_core::GovernanceSnapshot;
use relaygate_storage::Storage;

#[derive(Clone)]
pub struct AdminState {
    storage: Arc<dyn Storage>,
    snapshot: Arc<GovernanceSnapshot>,
    admin_key_hash: Arc<RwLock<String>>,
}

impl AdminState {
    pub fn admin_key_hash(&self) -> String {
        self.admin_key_hash.read().expect("admin key hash lock poisoned").clone()
    }

    pub fn set_admin_key_hash(&self, hash: String) {
        *self.admin_key_hash.write().expect("admin key hash lock poisoned") = hash;
    }
}

/// Builds the admin router. `admin_key_hash` is the hash currently in force;
/// a `PUT /config` that changes it updates `state.admin_key_hash` in place so
/// already-issued requests finish against the key they authenticated with.
pub fn admin_router(storage: Arc<dyn Storage>, snapshot: Arc<GovernanceSnapshot>, admin_key_hash: String) -> Router {
    let state = AdminState { storage, snapshot, admin_key_hash: Arc::new(RwLock::new(admin_key_hash)) };

    Router::new()
        .route("/health", get(config::health))
        .route("/config", get(config::get_config).put(config::put_config))
        .route("/reload", post(config::reload_snapshot))
        .route("/providers", get(providers::list_providers).post(providers::create_provider))
        .route("/providers/{id}", put(providers::update_provider).delete(providers::delete_provider))
        .route("/providers/{id}/keys", post(providers::create_key))
        .route("/keys/{id}/enabled", put(providers::set_key_enabled))
        .route("/keys/{id}", delete(providers::delete_key))
        .route("/budgets", get(governance::list_budgets).post(governance::upsert_budget))
        .route("/budgets/{id}", delete(governance::delete_budget))
        .route("/rate_limits", get(governance::list_rate_limits).post(governance::upsert_rate_limit))
        .route("/rate_limits/{id}", delete(governance::delete_rate_limit))
        .route("/teams", get(governance::list_teams).post(governance::upsert_team))
        .route("/teams/{id}", delete(governance::delete_team))
        .route("/customers", get(governance::list_customers).post(governance::upsert_customer))
        .route("/customers/{id}", delete(governance::delete_customer))
        .route("/virtual_keys", get(governance::list_virtual_keys).post(governance::upsert_virtual_key))
        .route("/virtual_keys/{id}/enabled", put(governance::set_virtual_key_enabled))
        .route("/virtual_keys/{id}", delete(governance::delete_virtual_key))
        .route("/plugins", get(plugins::list_plugins).post(plugins::upsert_plugin))
        .route("/plugins/{id}", delete(plugins::delete_plugin))
        .route("/logs", get(logs::query_logs))
        .route("/usage", get(logs::aggregate_usage))
        .with_state(state)
}
