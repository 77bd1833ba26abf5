//! Startup sequencing: parse CLI/ENV, connect storage, merge global config
//! (CLI > ENV > DB, persisted back to DB), load the governance hierarchy
//! into the hot-path snapshot, and assemble every component the engine
//! needs. Grounded on the teacher's `gproxy-core::bootstrap::bootstrap`,
//! generalized from gproxy's single proxy-engine wiring to this gateway's
//! scheduler/plugin-chain/governance-gate/cache quartet.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relaygate_common::{GlobalConfig, GlobalConfigPatch, hash_admin_key};
use relaygate_core::governance::spawn_sweeper;
use relaygate_core::{GatewayEngine, GovernanceGate, GovernanceSnapshot, PriceTable, ResponseCache, StaticPriceTable};
use relaygate_provider_core::{
    ConcurrencyConfig, EventHub, Key, KeyPool, NetworkConfig, PluginChain, ProviderRegistry, TerminalEventSink,
    WorkerPoolScheduler,
};
use relaygate_storage::{GlobalConfigRecord, SeaOrmStorage, Storage};

use crate::cli::CliArgs;
use crate::dsn;
use crate::providers::EchoProvider;
use crate::traffic_sink::StorageTrafficSink;

/// Background tasks and process-wide state the caller (`main`) needs to
/// keep alive or pass into the HTTP routers.
pub struct Bootstrap {
    pub storage: Arc<dyn Storage>,
    pub config: GlobalConfig,
    pub snapshot: Arc<GovernanceSnapshot>,
    pub engine: Arc<GatewayEngine>,
    pub sweeper: tokio::task::JoinHandle<()>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    let args = CliArgs::parse();
    bootstrap(args).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let dsn = dsn::sanitize_dsn_value(args.dsn.clone(), args.data_dir.as_deref());
    let host = dsn::sanitize_optional_env_value(args.host.clone());
    let port = dsn::parse_u16_env_value(args.port.clone(), "RELAYGATE_PORT")?;
    let admin_key = dsn::sanitize_optional_env_value(args.admin_key.clone());
    let proxy = dsn::sanitize_optional_env_value(args.proxy.clone());
    let event_redact_sensitive =
        dsn::parse_bool_env_value(args.event_redact_sensitive.clone(), "RELAYGATE_EVENT_REDACT_SENSITIVE")?;

    dsn::ensure_sqlite_parent_dir(&dsn)?;

    let storage = Arc::new(SeaOrmStorage::connect(&dsn).await.context("connect storage")?);
    storage.sync().await.context("schema sync")?;

    let db_global = storage.load_global_config().await.context("load db global_config")?;
    let mut merged = match db_global {
        Some(row) => GlobalConfigPatch {
            host: Some(row.host),
            port: Some(row.port),
            admin_key_hash: Some(row.admin_key_hash),
            proxy: row.proxy,
            dsn: Some(row.dsn),
            event_redact_sensitive: Some(row.event_redact_sensitive),
        },
        None => GlobalConfigPatch::default(),
    };

    // CLI/ENV admin key wins and overwrites whatever's stored; otherwise,
    // generate one on first run and print it once — it can never be
    // recovered from the hash afterward.
    let admin_key_hash_override = if let Some(key_plain) = admin_key.as_deref() {
        Some(hash_admin_key(key_plain))
    } else if merged.admin_key_hash.is_none() {
        let key_plain = uuid::Uuid::new_v4().to_string();
        eprintln!("generated admin key: {key_plain}");
        Some(hash_admin_key(&key_plain))
    } else {
        None
    };

    merged.overlay(GlobalConfigPatch {
        host,
        port,
        admin_key_hash: admin_key_hash_override,
        proxy,
        dsn: Some(dsn),
        event_redact_sensitive,
    });
    let config = merged.into_config().context("finalize merged global config")?;

    storage
        .upsert_global_config(GlobalConfigRecord {
            host: config.host.clone(),
            port: config.port,
            admin_key_hash: config.admin_key_hash.clone(),
            proxy: config.proxy.clone(),
            dsn: config.dsn.clone(),
            event_redact_sensitive: config.event_redact_sensitive,
        })
        .await
        .context("upsert global_config")?;

    let loaded = storage.load_snapshot().await.context("load snapshot")?;

    let governance_snapshot = Arc::new(GovernanceSnapshot::new());
    relaygate_admin::rebuild_snapshot(storage.as_ref(), &governance_snapshot)
        .await
        .context("populate governance snapshot")?;

    let events = EventHub::new(1024);
    events.add_sink(Arc::new(TerminalEventSink::default())).await;

    let keys = KeyPool::new(events);
    let registry = ProviderRegistry::new();
    let mut provider_policies = Vec::with_capacity(loaded.providers.len());
    for provider in &loaded.providers {
        if !provider.enabled {
            continue;
        }
        registry.register(Arc::new(EchoProvider::new(provider.name.clone())));
        for key in &provider.keys {
            if !key.enabled {
                continue;
            }
            let secret = relaygate_common::env::resolve(&key.value)
                .with_context(|| format!("resolve key {} for provider {}", key.id, provider.name))?;
            keys.insert(
                &provider.name,
                Key { id: key.id, value: secret, models: key.models.clone(), weight: key.weight, provider_config: key.provider_config.clone() },
            )
            .await;
        }

        // Component C's bounded worker pool and retry policy are sized
        // per-provider from the same `ConcurrencyConfig`/`NetworkConfig`
        // the admin surface accepts (spec §3's `Provider` entity); fall
        // back to the library defaults if a stored record predates one of
        // these fields (`#[serde(default)]` on both structs).
        let concurrency: ConcurrencyConfig = serde_json::from_value(provider.concurrency.clone())
            .with_context(|| format!("parse concurrency config for provider {}", provider.name))?;
        let network: NetworkConfig = serde_json::from_value(provider.network.clone())
            .with_context(|| format!("parse network config for provider {}", provider.name))?;
        provider_policies.push((provider.name.clone(), concurrency, network));
    }

    // Plugin instantiation from `loaded.plugin_configs` is left to whatever
    // concrete `Plugin` impls a deployment brings in; this binary only
    // assembles the chain shape the engine expects.
    let plugins = Arc::new(PluginChain::new(Vec::new()));

    let prices: Arc<dyn PriceTable> = Arc::new(StaticPriceTable::default());
    let gate = Arc::new(GovernanceGate::new(governance_snapshot.clone(), storage.clone(), prices));
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(300)));
    let traffic = Arc::new(StorageTrafficSink::new(storage.clone()));
    let scheduler = Arc::new(WorkerPoolScheduler::new(Arc::new(registry), keys).with_traffic_sink(traffic.clone()));
    for (name, concurrency, network) in provider_policies {
        scheduler.configure_provider(&name, concurrency, network).await;
    }
    let engine = Arc::new(GatewayEngine::new(scheduler, plugins, gate, cache).with_traffic_sink(traffic));

    let sweeper = spawn_sweeper(governance_snapshot.clone(), storage.clone(), Duration::from_secs(15));

    Ok(Bootstrap { storage, config, snapshot: governance_snapshot, engine, sweeper })
}
