use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

use relaygate_protocol::Usage;

use crate::key::KeyId;
use crate::provider::{DownstreamContext, UpstreamContext};

/// Per-call downstream (client-facing) traffic record, the input to a
/// `TrafficSink` used for usage aggregation and billing (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamTrafficEvent {
    pub trace_id: String,
    pub at: SystemTime,
    pub virtual_key_id: Option<String>,
    pub team_id: Option<String>,
    pub customer_id: Option<String>,
    pub provider: String,
    pub model: String,
    pub success: bool,
    pub usage: Usage,
    pub latency_ms: u64,
}

/// Per-attempt upstream (provider-facing) traffic record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamTrafficEvent {
    pub trace_id: String,
    pub at: SystemTime,
    pub attempt_no: u32,
    pub provider: String,
    pub key_id: Option<KeyId>,
    pub model: String,
    pub success: bool,
    pub usage: Option<Usage>,
    pub error_kind: Option<String>,
    pub latency_ms: u64,
}

#[async_trait::async_trait]
pub trait TrafficSink: Send + Sync {
    async fn record_downstream(&self, event: DownstreamTrafficEvent);
    async fn record_upstream(&self, event: UpstreamTrafficEvent);
}

pub type SharedTrafficSink = Arc<dyn TrafficSink>;

pub struct NoopTrafficSink;

#[async_trait::async_trait]
impl TrafficSink for NoopTrafficSink {
    async fn record_downstream(&self, _event: DownstreamTrafficEvent) {}
    async fn record_upstream(&self, _event: UpstreamTrafficEvent) {}
}

pub fn build_downstream_event(
    ctx: &DownstreamContext,
    provider: &str,
    model: &str,
    success: bool,
    usage: Usage,
    latency_ms: u64,
) -> DownstreamTrafficEvent {
    DownstreamTrafficEvent {
        trace_id: ctx.trace_id.clone(),
        at: SystemTime::now(),
        virtual_key_id: ctx.virtual_key_id.clone(),
        team_id: ctx.team_id.clone(),
        customer_id: ctx.customer_id.clone(),
        provider: provider.to_string(),
        model: model.to_string(),
        success,
        usage,
        latency_ms,
    }
}

pub fn build_upstream_event(
    ctx: &UpstreamContext,
    provider: &str,
    key_id: Option<KeyId>,
    model: &str,
    success: bool,
    usage: Option<Usage>,
    error_kind: Option<String>,
    latency_ms: u64,
) -> UpstreamTrafficEvent {
    UpstreamTrafficEvent {
        trace_id: ctx.trace_id.clone(),
        at: SystemTime::now(),
        attempt_no: ctx.attempt_no,
        provider: provider.to_string(),
        key_id,
        model: model.to_string(),
        success,
        usage,
        error_kind,
        latency_ms,
    }
}

pub async fn record_upstream(
    sink: &dyn TrafficSink,
    ctx: &UpstreamContext,
    provider: &str,
    key_id: Option<KeyId>,
    model: &str,
    success: bool,
    usage: Option<Usage>,
    error_kind: Option<String>,
    latency_ms: u64,
) {
    sink.record_upstream(build_upstream_event(
        ctx, provider, key_id, model, success, usage, error_kind, latency_ms,
    ))
    .await;
}
