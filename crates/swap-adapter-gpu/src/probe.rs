//! Probe selection and dispatch

use async_trait::async_trait;
use tracing::{debug, info, warn};

use swap_core::{DeviceId, DeviceMemory, MemoryProbe, ProbeBackend};

use crate::config::ProbeSettings;
use crate::{GpuError, Result, StaticProbe, SystemProbe};

/// Probe that delegates to the backend chosen at startup
pub struct DeviceProbe {
    inner: Box<dyn MemoryProbe>,
    settings: ProbeSettings,
}

impl DeviceProbe {
    pub async fn new(settings: ProbeSettings) -> Result<Self> {
        info!("Creating memory probe for backend: {:?}", settings.backend);
        settings.validate().map_err(GpuError::Configuration)?;
        let inner = create_probe(&settings).await?;
        Ok(Self { inner, settings })
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.name()
    }
}

#[async_trait]
impl MemoryProbe for DeviceProbe {
    async fn read(&self, device: DeviceId) -> swap_core::Result<DeviceMemory> {
        debug!("Reading memory for {}", device);
        self.inner.read(device).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Create a backend-specific probe
///
/// NVML falls back to the system probe when the driver cannot be
/// initialized, so hosts without NVIDIA GPUs still start.
pub async fn create_probe(settings: &ProbeSettings) -> Result<Box<dyn MemoryProbe>> {
    let capacities = settings.capacities();
    match settings.backend {
        #[cfg(feature = "nvml")]
        ProbeBackend::Nvml => match crate::nvml::NvmlProbe::new(capacities.clone()) {
            Ok(probe) => Ok(Box::new(probe)),
            Err(e) => {
                warn!("NVML unavailable ({}), falling back to system probe", e);
                Ok(Box::new(SystemProbe::new(capacities)))
            }
        },

        #[cfg(not(feature = "nvml"))]
        ProbeBackend::Nvml => {
            warn!("NVML support not compiled in, falling back to system probe");
            Ok(Box::new(SystemProbe::new(capacities)))
        }

        ProbeBackend::System => Ok(Box::new(SystemProbe::new(capacities))),

        ProbeBackend::Static => Ok(Box::new(StaticProbe::new(capacities))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_probe_creation() {
        let settings =
            ProbeSettings::new(ProbeBackend::Static).with_capacity(DeviceId::Gpu(0), 8_000);
        let probe = DeviceProbe::new(settings).await.unwrap();
        assert_eq!(probe.backend_name(), "static");
        assert_eq!(probe.read(DeviceId::Gpu(0)).await.unwrap().total_mb, 8_000);
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let settings = ProbeSettings::new(ProbeBackend::Static).with_device(DeviceId::Gpu(0));
        let err = DeviceProbe::new(settings).await.err().unwrap();
        assert!(matches!(err, GpuError::Configuration(_)));
    }

    #[test]
    fn test_unsupported_backend_message() {
        let error = GpuError::UnsupportedBackend("rocm".to_string());
        assert!(error.to_string().contains("rocm"));
        assert!(!error.is_retryable());
    }
}
