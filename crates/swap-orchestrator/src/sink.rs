//! Metrics sinks that need nothing beyond the orchestrator

use std::sync::Arc;
use tracing::{debug, info, warn};

use swap_core::{DeviceSnapshot, LifecycleEvent, MetricsSink, QueryOutcome, QueryRecord};

/// Writes every record to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record_query(&self, record: &QueryRecord) {
        let model = record.model.as_deref().unwrap_or("-");
        let latency_ms = record.latency.as_millis() as u64;
        match record.outcome {
            QueryOutcome::Failed => warn!(
                model,
                difficulty = record.difficulty,
                latency_ms,
                error = record.error.as_deref().unwrap_or("unknown"),
                "query failed: {}",
                record.excerpt
            ),
            outcome => info!(
                model,
                difficulty = record.difficulty,
                latency_ms,
                tokens = record.tokens,
                cost_usd = record.cost_usd.unwrap_or(0.0),
                outcome = outcome.as_str(),
                "query served: {}",
                record.excerpt
            ),
        }
    }

    fn record_lifecycle(&self, event: &LifecycleEvent) {
        debug!(?event, "lifecycle");
    }

    fn record_device(&self, snapshot: &DeviceSnapshot) {
        debug!(
            device = %snapshot.device,
            reserved_mb = snapshot.reserved_mb,
            available_mb = snapshot.available_mb,
            "device ledger"
        );
    }
}

/// Forwards to several sinks
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MetricsSink for FanoutSink {
    fn record_query(&self, record: &QueryRecord) {
        for sink in &self.sinks {
            sink.record_query(record);
        }
    }

    fn record_lifecycle(&self, event: &LifecycleEvent) {
        for sink in &self.sinks {
            sink.record_lifecycle(event);
        }
    }

    fn record_device(&self, snapshot: &DeviceSnapshot) {
        for sink in &self.sinks {
            sink.record_device(snapshot);
        }
    }
}
