//! # swap-metrics
//!
//! Prometheus metrics for vramswap.
//!
//! [`OrchestratorMetrics`] holds the metric families, [`PrometheusSink`]
//! feeds them from orchestrator records and [`PrometheusExporter`] renders
//! the text exposition format, optionally on its own `/metrics` listener.

pub mod common;
pub mod prometheus_metrics;
pub mod sink;

pub use common::OrchestratorMetrics;
pub use prometheus_metrics::PrometheusExporter;
pub use sink::PrometheusSink;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Registry error: {0}")]
    Registry(#[from] prometheus::Error),

    #[error("Export error: {0}")]
    Export(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MetricsError>;

/// Latency buckets in seconds, from cache hits to slow cold loads
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

/// Prefix shared by every metric name
pub const NAMESPACE: &str = "vramswap";
