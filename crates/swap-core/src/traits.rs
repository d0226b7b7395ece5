//! Core traits for vramswap components
//!
//! These are the seams between the orchestrator and everything it drives or
//! reports to: inference backends, device memory probes, the retrieval
//! subsystem and the metrics sink.

use async_trait::async_trait;

use crate::{
    DeviceId, DeviceMemory, DeviceSnapshot, Generation, GenerationRequest, LifecycleEvent,
    ModelHandle, ModelSpec, QueryRecord, Result,
};

/// Uniform load/generate/unload contract over one inference technology
#[async_trait]
pub trait BackendAdapter: Send + Sync + 'static {
    /// Materialize a model. Fails with `Error::Load`.
    async fn load(&self, spec: &ModelSpec) -> Result<ModelHandle>;

    /// Run one generation. Fails with `Error::Generation` or `Error::Timeout`.
    async fn generate(&self, handle: &ModelHandle, request: &GenerationRequest) -> Result<Generation>;

    /// Release everything the handle holds
    async fn unload(&self, handle: &ModelHandle) -> Result<()>;
}

/// Live memory readings for local devices
#[async_trait]
pub trait MemoryProbe: Send + Sync {
    async fn read(&self, device: DeviceId) -> Result<DeviceMemory>;

    /// Probe name for logs
    fn name(&self) -> &'static str;
}

/// Retrieval collaborator supplying an opaque block to prepend to prompts
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Option<String>>;
}

/// Retriever that never adds context
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

#[async_trait]
impl ContextRetriever for NoContext {
    async fn retrieve(&self, _query: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Receives one record per query plus residency and device updates
pub trait MetricsSink: Send + Sync {
    fn record_query(&self, record: &QueryRecord);

    fn record_lifecycle(&self, _event: &LifecycleEvent) {}

    fn record_device(&self, _snapshot: &DeviceSnapshot) {}
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record_query(&self, _record: &QueryRecord) {}
}
