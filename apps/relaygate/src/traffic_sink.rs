//! Persists every downstream/upstream traffic record through to storage's
//! generic log table (spec §6), the sink side of the admin `/api/logs` and
//! `/api/usage` read endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use relaygate_provider_core::{DownstreamTrafficEvent, TrafficSink, UpstreamTrafficEvent};
use relaygate_storage::{LogRecordKind, Storage};

#[derive(Clone)]
pub struct StorageTrafficSink {
    storage: Arc<dyn Storage>,
}

impl StorageTrafficSink {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl TrafficSink for StorageTrafficSink {
    async fn record_downstream(&self, event: DownstreamTrafficEvent) {
        let trace_id = event.trace_id.clone();
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize downstream traffic event");
                return;
            }
        };
        if let Err(err) = self.storage.append_log(LogRecordKind::Downstream, Some(trace_id), payload).await {
            tracing::warn!(error = %err, "failed to persist downstream traffic event");
        }
    }

    async fn record_upstream(&self, event: UpstreamTrafficEvent) {
        let trace_id = event.trace_id.clone();
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize upstream traffic event");
                return;
            }
        };
        if let Err(err) = self.storage.append_log(LogRecordKind::Upstream, Some(trace_id), payload).await {
            tracing::warn!(error = %err, "failed to persist upstream traffic event");
        }
    }
}
