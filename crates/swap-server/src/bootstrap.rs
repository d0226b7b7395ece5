//! Wire the configured probe, adapters, sinks and orchestrator together

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use swap_adapter_gpu::{DeviceProbe, ProbeSettings};
use swap_adapter_runtime::{RuntimeAdapter, RuntimeConfig};
use swap_core::{Config, MemoryProbe, MetricsSink};
use swap_metrics::PrometheusExporter;
use swap_orchestrator::{FanoutSink, Orchestrator, TracingSink};

use crate::server::AppState;
use crate::{Result, ServerError};

/// Transport ceiling above the orchestrator's own generation deadline
const REQUEST_TIMEOUT_SLACK: Duration = Duration::from_secs(30);

/// Everything `swapd` runs
pub struct Runtime {
    pub orchestrator: Arc<Orchestrator<RuntimeAdapter>>,
    pub exporter: Option<Arc<PrometheusExporter>>,
}

impl Runtime {
    /// State for the HTTP server; `/metrics` is mounted there unless the
    /// exporter already has a listener of its own
    pub fn state(&self) -> AppState<RuntimeAdapter> {
        let exporter = self.exporter.as_ref().filter(|e| !e.is_running()).cloned();
        AppState::new(Arc::clone(&self.orchestrator), exporter)
    }
}

/// Build the runtime from a validated configuration
pub async fn build(config: &Config) -> Result<Runtime> {
    config.validate()?;

    let probe = DeviceProbe::new(ProbeSettings::from_config(config)).await?;
    info!("Memory probe: {}", probe.backend_name());
    let probe: Arc<dyn MemoryProbe> = Arc::new(probe);

    let runtime_config = RuntimeConfig::default().with_request_timeout(
        config
            .orchestrator
            .default_timeout()
            .saturating_add(REQUEST_TIMEOUT_SLACK),
    );
    let api_key_env = config.remote.as_ref().and_then(|r| r.api_key_env.clone());
    let adapter = Arc::new(RuntimeAdapter::new(runtime_config, api_key_env)?);

    let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
    let exporter = if config.metrics.enabled {
        let mut exporter = PrometheusExporter::new()?;
        sink = sink.with(Arc::new(exporter.sink()));
        if let Some(bind) = &config.metrics.bind_addr {
            let addr = bind
                .parse()
                .map_err(|e| ServerError::Configuration(format!("Invalid metrics bind address {}: {}", bind, e)))?;
            exporter.start_server(addr).await?;
        }
        Some(Arc::new(exporter))
    } else {
        warn!("Metrics disabled");
        None
    };

    let orchestrator = Orchestrator::builder(config, adapter, probe)
        .with_sink(Arc::new(sink) as Arc<dyn MetricsSink>)
        .build()?;

    Ok(Runtime {
        orchestrator: Arc::new(orchestrator),
        exporter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use swap_core::{DeviceConfig, DeviceId, ProbeBackend};
    use swap_dev::small_local;

    fn static_config() -> Config {
        let mut config = Config::default();
        config.devices = vec![DeviceConfig::new(DeviceId::Cpu).with_capacity(16_000)];
        config.probe.backend = ProbeBackend::Static;
        config.models = vec![small_local()];
        config
    }

    #[tokio::test]
    async fn test_build_with_metrics_on_main_listener() {
        let runtime = build(&static_config()).await.unwrap();
        assert!(runtime.exporter.is_some());
        assert!(runtime.state().exporter.is_some());
        assert_eq!(runtime.orchestrator.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_separate_metrics_listener() {
        let mut config = static_config();
        config.metrics.bind_addr = Some("127.0.0.1:0".to_string());
        let runtime = build(&config).await.unwrap();
        assert!(runtime.exporter.as_ref().unwrap().is_running());
        assert!(runtime.state().exporter.is_none());
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let mut config = static_config();
        config.metrics.enabled = false;
        let runtime = build(&config).await.unwrap();
        assert!(runtime.exporter.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = static_config();
        config.orchestrator.temperature = 5.0;
        assert!(build(&config).await.is_err());
    }
}
