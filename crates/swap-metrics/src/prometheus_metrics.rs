//! Prometheus metrics exporter implementation

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::common::OrchestratorMetrics;
use crate::sink::PrometheusSink;
use crate::{MetricsError, Result};

/// Owns the registry and, optionally, a standalone `/metrics` listener
#[derive(Debug)]
pub struct PrometheusExporter {
    registry: Arc<Registry>,
    metrics: Arc<OrchestratorMetrics>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl PrometheusExporter {
    /// Create an exporter with the orchestrator metrics registered
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(OrchestratorMetrics::new()?);
        metrics.register(&registry)?;

        Ok(Self {
            registry,
            metrics,
            server_handle: None,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<OrchestratorMetrics> {
        &self.metrics
    }

    /// A sink writing into this exporter's metrics
    pub fn sink(&self) -> PrometheusSink {
        PrometheusSink::new(Arc::clone(&self.metrics))
    }

    /// Export metrics as Prometheus text format
    pub fn export_metrics(&self) -> Result<String> {
        encode(&self.registry)
    }

    /// `/metrics` route for mounting on another router
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(Arc::clone(&self.registry))
    }

    /// Serve `/metrics` on its own listener, returning the bound address
    pub async fn start_server(&mut self, bind_addr: SocketAddr) -> Result<SocketAddr> {
        if self.server_handle.is_some() {
            return Err(MetricsError::Config("Server already started".to_string()));
        }

        let app: Router = self.router();
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!("Starting Prometheus metrics server on {}", local_addr);

        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("Prometheus metrics server error: {}", e);
            }
        });

        self.server_handle = Some(server_handle);
        Ok(local_addr)
    }

    /// Stop the HTTP server
    pub async fn stop_server(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.server_handle.is_some()
    }
}

impl Drop for PrometheusExporter {
    fn drop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}

fn encode(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| MetricsError::Export(format!("Failed to encode metrics: {}", e)))?;

    String::from_utf8(buffer)
        .map_err(|e| MetricsError::Export(format!("Failed to convert metrics to string: {}", e)))
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> Response {
    match encode(&registry) {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            text,
        )
            .into_response(),
        Err(e) => {
            warn!("Failed to encode Prometheus metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swap_core::{LifecycleEvent, MetricsSink};

    #[test]
    fn test_export_after_sink_writes() {
        let exporter = PrometheusExporter::new().unwrap();
        exporter.sink().record_lifecycle(&LifecycleEvent::CooledDown {
            model: "flaky".to_string(),
        });

        let text = exporter.export_metrics().unwrap();
        assert!(text.contains("vramswap_cooldowns_total{model=\"flaky\"} 1"));
    }

    #[test]
    fn test_exporters_do_not_share_state() {
        let a = PrometheusExporter::new().unwrap();
        let b = PrometheusExporter::new().unwrap();
        a.metrics().cooldowns_total.with_label_values(&["x"]).inc();
        assert!(!b.export_metrics().unwrap().contains("model=\"x\""));
    }

    #[tokio::test]
    async fn test_server_start_stop() {
        let mut exporter = PrometheusExporter::new().unwrap();
        exporter.metrics().tokens_total.with_label_values(&["m"]).inc_by(42);

        let addr = exporter.start_server("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert!(exporter.is_running());
        assert!(exporter.start_server("127.0.0.1:0".parse().unwrap()).await.is_err());

        let body = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("vramswap_tokens_total{model=\"m\"} 42"));

        exporter.stop_server().await;
        assert!(!exporter.is_running());
    }
}
