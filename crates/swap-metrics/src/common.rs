//! Metric families recorded by the orchestrator

use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::{LATENCY_BUCKETS, NAMESPACE};

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

/// Query, lifecycle and device metrics
#[derive(Debug, Clone)]
pub struct OrchestratorMetrics {
    /// Completed queries by model and outcome
    pub queries_total: IntCounterVec,

    /// End-to-end query latency
    pub query_latency_seconds: HistogramVec,

    /// Generated tokens
    pub tokens_total: IntCounterVec,

    /// Estimated spend on remote models
    pub remote_cost_usd_total: CounterVec,

    /// Failed queries by error category
    pub query_errors_total: IntCounterVec,

    pub model_loads_total: IntCounterVec,
    pub model_load_failures_total: IntCounterVec,
    pub model_load_seconds: HistogramVec,
    pub evictions_total: IntCounterVec,
    pub unloads_total: IntCounterVec,
    pub admission_failures_total: IntCounterVec,
    pub cooldowns_total: IntCounterVec,

    /// Generation errors, `kind` is `error` or `timeout`
    pub generation_failures_total: IntCounterVec,

    /// 1 while the model is resident
    pub model_resident: GaugeVec,

    pub device_capacity_mb: GaugeVec,
    pub device_reserved_mb: GaugeVec,
    pub device_used_mb: GaugeVec,
    pub device_available_mb: GaugeVec,
}

impl OrchestratorMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            queries_total: IntCounterVec::new(
                opts("queries_total", "Queries by serving model and outcome"),
                &["model", "outcome"],
            )?,
            query_latency_seconds: HistogramVec::new(
                HistogramOpts::new("query_latency_seconds", "End-to-end query latency in seconds")
                    .namespace(NAMESPACE)
                    .buckets(LATENCY_BUCKETS.to_vec()),
                &["model", "outcome"],
            )?,
            tokens_total: IntCounterVec::new(opts("tokens_total", "Generated tokens"), &["model"])?,
            remote_cost_usd_total: CounterVec::new(
                opts("remote_cost_usd_total", "Estimated remote model spend in USD"),
                &["model"],
            )?,
            query_errors_total: IntCounterVec::new(
                opts("query_errors_total", "Failed queries by error category"),
                &["category"],
            )?,
            model_loads_total: IntCounterVec::new(
                opts("model_loads_total", "Successful model loads"),
                &["model", "device"],
            )?,
            model_load_failures_total: IntCounterVec::new(
                opts("model_load_failures_total", "Failed model loads"),
                &["model", "device"],
            )?,
            model_load_seconds: HistogramVec::new(
                HistogramOpts::new("model_load_seconds", "Time to bring a model resident")
                    .namespace(NAMESPACE)
                    .buckets(LATENCY_BUCKETS.to_vec()),
                &["model"],
            )?,
            evictions_total: IntCounterVec::new(
                opts("evictions_total", "Models evicted to admit another"),
                &["model", "device"],
            )?,
            unloads_total: IntCounterVec::new(
                opts("unloads_total", "Explicit or shutdown unloads"),
                &["model", "device"],
            )?,
            admission_failures_total: IntCounterVec::new(
                opts("admission_failures_total", "Loads refused for lack of device memory"),
                &["model", "device"],
            )?,
            cooldowns_total: IntCounterVec::new(
                opts("cooldowns_total", "Times a model entered cool-down"),
                &["model"],
            )?,
            generation_failures_total: IntCounterVec::new(
                opts("generation_failures_total", "Generation errors and timeouts"),
                &["model", "kind"],
            )?,
            model_resident: GaugeVec::new(
                opts("model_resident", "Model residency (1=resident, 0=not resident)"),
                &["model", "device"],
            )?,
            device_capacity_mb: GaugeVec::new(
                opts("device_capacity_mb", "Device memory capacity in MB"),
                &["device"],
            )?,
            device_reserved_mb: GaugeVec::new(
                opts("device_reserved_mb", "Memory reserved by resident and loading models in MB"),
                &["device"],
            )?,
            device_used_mb: GaugeVec::new(
                opts("device_used_mb", "Memory in use according to the probe in MB"),
                &["device"],
            )?,
            device_available_mb: GaugeVec::new(
                opts("device_available_mb", "Memory available for admission in MB"),
                &["device"],
            )?,
        })
    }

    /// Register all metrics with the given registry
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.queries_total.clone()))?;
        registry.register(Box::new(self.query_latency_seconds.clone()))?;
        registry.register(Box::new(self.tokens_total.clone()))?;
        registry.register(Box::new(self.remote_cost_usd_total.clone()))?;
        registry.register(Box::new(self.query_errors_total.clone()))?;
        registry.register(Box::new(self.model_loads_total.clone()))?;
        registry.register(Box::new(self.model_load_failures_total.clone()))?;
        registry.register(Box::new(self.model_load_seconds.clone()))?;
        registry.register(Box::new(self.evictions_total.clone()))?;
        registry.register(Box::new(self.unloads_total.clone()))?;
        registry.register(Box::new(self.admission_failures_total.clone()))?;
        registry.register(Box::new(self.cooldowns_total.clone()))?;
        registry.register(Box::new(self.generation_failures_total.clone()))?;
        registry.register(Box::new(self.model_resident.clone()))?;
        registry.register(Box::new(self.device_capacity_mb.clone()))?;
        registry.register(Box::new(self.device_reserved_mb.clone()))?;
        registry.register(Box::new(self.device_used_mb.clone()))?;
        registry.register(Box::new(self.device_available_mb.clone()))?;
        Ok(())
    }
}
