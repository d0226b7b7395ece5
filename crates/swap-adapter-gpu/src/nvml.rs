//! NVML (NVIDIA Management Library) backend

use async_trait::async_trait;
use nvml_wrapper::Nvml;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use swap_core::{DeviceId, DeviceMemory, MemoryProbe};

use crate::{GpuError, SystemProbe};

const MB: u64 = 1024 * 1024;

/// Reads accelerator memory through NVML; `cpu` is delegated to the host probe
pub struct NvmlProbe {
    nvml: Arc<Nvml>,
    host: SystemProbe,
}

impl NvmlProbe {
    /// Initialize NVML. Fails when the driver library is missing.
    pub fn new(capacities: BTreeMap<DeviceId, u64>) -> crate::Result<Self> {
        let nvml = Nvml::init().map_err(|e| GpuError::InitializationFailed(e.to_string()))?;
        let count = nvml
            .device_count()
            .map_err(|e| GpuError::NvmlError(e.to_string()))?;
        info!("NVML initialized with {} devices", count);

        Ok(Self {
            nvml: Arc::new(nvml),
            host: SystemProbe::new(capacities),
        })
    }

    async fn read_gpu(&self, index: u32) -> crate::Result<DeviceMemory> {
        let nvml = Arc::clone(&self.nvml);
        let info = tokio::task::spawn_blocking(move || {
            let device = nvml.device_by_index(index).map_err(|e| {
                GpuError::DeviceNotFound(format!("gpu:{} ({})", index, e))
            })?;
            device
                .memory_info()
                .map_err(|e| GpuError::NvmlError(e.to_string()))
        })
        .await
        .map_err(|e| GpuError::ReadFailed(format!("NVML read task failed: {}", e)))??;

        debug!(
            "gpu:{} memory: {} MB used of {} MB",
            index,
            info.used / MB,
            info.total / MB
        );
        Ok(DeviceMemory::new(info.total / MB, info.used / MB))
    }
}

#[async_trait]
impl MemoryProbe for NvmlProbe {
    async fn read(&self, device: DeviceId) -> swap_core::Result<DeviceMemory> {
        match device {
            DeviceId::Gpu(index) => Ok(self.read_gpu(index).await?),
            other => self.host.read(other).await,
        }
    }

    fn name(&self) -> &'static str {
        "nvml"
    }
}
