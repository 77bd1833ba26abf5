use std::sync::Arc;
use std::time::Duration;

use relaygate_storage::Storage;
use time::OffsetDateTime;

use super::gate::{record_to_budget, record_to_rate_limit};
use super::snapshot::GovernanceSnapshot;

/// Never sweep more often than this, even if every budget/rate-limit on the
/// hierarchy has a shorter reset window — spec §4.E: "interval: min reset
/// duration / 4, capped at 60s" lower-bounds the sleep, this upper-bounds it
/// so a single 1-second test fixture doesn't spin the sweeper hot.
const MIN_INTERVAL: Duration = Duration::from_millis(250);
const MAX_INTERVAL: Duration = Duration::from_secs(60);

/// Component E's background sweeper: proactively resets any budget or rate
/// limit counter whose window has lapsed, so the lazy "admit if expired"
/// path in [`super::gate::GovernanceGate::admit`] doesn't have to carry
/// stale usage indefinitely when nothing is calling `account` to trigger a
/// lazy reset.
pub fn spawn_sweeper(
    snapshot: Arc<GovernanceSnapshot>,
    storage: Arc<dyn Storage>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let interval = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            sweep_once(&snapshot, storage.as_ref()).await;
        }
    })
}

async fn sweep_once(snapshot: &GovernanceSnapshot, storage: &dyn Storage) {
    let now = OffsetDateTime::now_utc();

    for id in snapshot.all_budget_ids() {
        let Some(budget) = snapshot.budget(&id) else { continue };
        if !budget.is_expired(now) {
            continue;
        }
        match storage.accrue_budget(&id, 0.0, now).await {
            Ok(record) => snapshot.put_budget(record_to_budget(record)),
            Err(err) => tracing::warn!(budget_id = id.as_str(), error = %err, "sweeper failed to reset budget"),
        }
    }

    for id in snapshot.all_rate_limit_ids() {
        let Some(rl) = snapshot.rate_limit(&id) else { continue };
        let expired = now - rl.request_last_reset >= rl.request_reset_duration
            || now - rl.token_last_reset >= rl.token_reset_duration;
        if !expired {
            continue;
        }
        match storage.accrue_rate_limit(&id, 0, 0, now).await {
            Ok(record) => snapshot.put_rate_limit(record_to_rate_limit(record)),
            Err(err) => tracing::warn!(rate_limit_id = id.as_str(), error = %err, "sweeper failed to reset rate limit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::types::{Budget, VirtualKey};
    use relaygate_storage::{BudgetRecord, Storage};
    use relaygate_storage::MemoryStorage;

    #[tokio::test]
    async fn sweep_resets_expired_budget() {
        let snapshot = Arc::new(GovernanceSnapshot::new());
        let storage = Arc::new(MemoryStorage::new());

        let last_reset = OffsetDateTime::now_utc() - time::Duration::seconds(10);
        storage
            .upsert_budget(BudgetRecord {
                id: "b_1".into(),
                max_limit: 10.0,
                current_usage: 9.0,
                reset_duration_secs: 1,
                last_reset,
            })
            .await
            .unwrap();
        snapshot.put_budget(Budget {
            id: "b_1".into(),
            max_limit: 10.0,
            current_usage: 9.0,
            reset_duration: time::Duration::seconds(1),
            last_reset,
        });
        snapshot.put_virtual_key(VirtualKey {
            id: "vk_1".into(),
            value: "sk-1".into(),
            team_id: None,
            customer_id: None,
            budget_id: Some("b_1".into()),
            rate_limit_id: None,
            allowed_models: Vec::new(),
            provider_overrides: serde_json::Value::Null,
        });

        sweep_once(&snapshot, storage.as_ref()).await;

        let budget = snapshot.budget("b_1").unwrap();
        assert_eq!(budget.current_usage, 0.0);
    }
}
