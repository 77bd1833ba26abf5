//! Core provider abstractions for the gateway.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP
//! client. Wire-dialect adapters live outside it and implement the
//! [`Provider`] trait; this crate only supplies the scheduling, pooling,
//! plugin-chain, and streaming machinery around that seam.

pub mod config;
pub mod errors;
pub mod events;
pub mod headers;
pub mod key;
pub mod model_unavailable_queue;
pub mod plugin;
pub mod pool;
pub mod provider;
pub mod registry;
pub mod response;
pub mod scheduler;
pub mod stream;
pub mod traffic;
pub mod unavailable_queue;
pub mod workerpool;

pub use config::{ConcurrencyConfig, CustomProviderConfig, NetworkConfig, ProviderEntry};
pub use errors::{ProviderError, ProviderResult};
pub use events::{
    DownstreamEvent, Event, EventHub, EventSink, ModelUnavailableEndEvent,
    ModelUnavailableStartEvent, OperationalEvent, TerminalEventSink, UnavailableEndEvent,
    UnavailableStartEvent, UpstreamEvent,
};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use key::{Key, KeyId, KeyState, UnavailableReason};
pub use plugin::{BeforeOutcome, Plugin, PluginChain, PreChainOutcome};
pub use pool::{AcquireError, KeyPool};
pub use provider::{Cancellation, ChunkStream, DownstreamContext, Provider, ProviderOutcome, UpstreamContext};
pub use registry::ProviderRegistry;
pub use response::{StreamBody, UpstreamPassthroughError};
pub use scheduler::WorkerPoolScheduler;
pub use stream::StreamingPipeline;
pub use workerpool::ProviderPool;
pub use traffic::{
    DownstreamTrafficEvent, NoopTrafficSink, SharedTrafficSink, TrafficSink, UpstreamTrafficEvent,
    build_downstream_event, build_upstream_event, record_upstream,
};
