//! Fixtures and logging setup shared by tests

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use swap_core::{BackendKind, Config, DeviceConfig, DeviceId, ModelSpec, ProbeBackend, RemoteConfig};

use crate::MockProbe;

/// Capacity reported by [`standard_probe`] for each GPU
pub const GPU_TOTAL_MB: u64 = 24_000;
/// Capacity reported by [`standard_probe`] for the host
pub const CPU_TOTAL_MB: u64 = 64_000;

/// Setup test logging with appropriate levels
pub fn setup_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "swap_orchestrator=debug,swap_dev=debug,swap_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

pub fn test_spec(
    name: &str,
    backend: BackendKind,
    device: DeviceId,
    footprint_mb: u64,
    difficulty: [u8; 2],
) -> ModelSpec {
    ModelSpec::new(name, backend, device, footprint_mb).with_difficulty(difficulty[0], difficulty[1])
}

/// `small-local`: cpu, difficulty 1..=60, 4000 MB
pub fn small_local() -> ModelSpec {
    test_spec("small-local", BackendKind::CpuOptimized, DeviceId::Cpu, 4_000, [1, 60]).with_priority(10)
}

/// `medium-gpu`: gpu:0, difficulty 30..=69, 5000 MB
pub fn medium_gpu() -> ModelSpec {
    test_spec("medium-gpu", BackendKind::BatchedGpu, DeviceId::Gpu(0), 5_000, [30, 69]).with_priority(5)
}

/// `large-gpu`: gpu:0, difficulty 70..=100, 14000 MB
pub fn large_gpu() -> ModelSpec {
    test_spec("large-gpu", BackendKind::BatchedGpu, DeviceId::Gpu(0), 14_000, [70, 100]).with_priority(1)
}

pub fn remote_section() -> RemoteConfig {
    RemoteConfig {
        endpoint: "https://api.example.test".to_string(),
        api_key_env: None,
        model: "gpt-4o-mini".to_string(),
        cost_per_1k_tokens: 0.5,
    }
}

/// Config declaring `gpu:0`, `gpu:1` and `cpu` with a static probe
pub fn config_with(models: Vec<ModelSpec>, remote: Option<RemoteConfig>) -> Config {
    let mut config = Config::default();
    config.devices = vec![
        DeviceConfig::new(DeviceId::Gpu(0)),
        DeviceConfig::new(DeviceId::Gpu(1)),
        DeviceConfig::new(DeviceId::Cpu),
    ];
    config.probe.backend = ProbeBackend::Static;
    config.models = models;
    config.remote = remote;
    config
}

/// Probe reporting every device of [`config_with`] as empty
pub fn standard_probe() -> MockProbe {
    MockProbe::new()
        .with_device(DeviceId::Gpu(0), GPU_TOTAL_MB, 0)
        .with_device(DeviceId::Gpu(1), GPU_TOTAL_MB, 0)
        .with_device(DeviceId::Cpu, CPU_TOTAL_MB, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_validate() {
        let config = config_with(vec![small_local(), medium_gpu(), large_gpu()], Some(remote_section()));
        config.validate().unwrap();
        assert!(config.remote_fallback_spec().unwrap().is_remote());
    }

    #[test]
    fn test_setup_logging_twice() {
        setup_test_logging();
        setup_test_logging();
    }
}
