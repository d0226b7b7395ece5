//! Host memory probe

use async_trait::async_trait;
use std::collections::BTreeMap;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tracing::debug;

use swap_core::{DeviceId, DeviceMemory, MemoryProbe};

use crate::{GpuError, StaticProbe};

const MB: u64 = 1024 * 1024;

/// Reads host RAM for the `cpu` device; GPUs fall back to configured capacities
#[derive(Debug, Clone, Default)]
pub struct SystemProbe {
    fallback: StaticProbe,
}

impl SystemProbe {
    pub fn new(capacities: BTreeMap<DeviceId, u64>) -> Self {
        Self {
            fallback: StaticProbe::new(capacities),
        }
    }

    /// Total and used host RAM in MB
    pub async fn host_memory() -> crate::Result<DeviceMemory> {
        // sysinfo reads /proc/meminfo synchronously
        let (total, available) = tokio::task::spawn_blocking(|| {
            let mut sys = System::new_with_specifics(
                RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
            );
            sys.refresh_memory();
            (sys.total_memory(), sys.available_memory())
        })
        .await
        .map_err(|e| GpuError::ReadFailed(format!("host memory read task failed: {}", e)))?;

        if total == 0 {
            return Err(GpuError::ReadFailed("host reported zero memory".to_string()));
        }

        let memory = DeviceMemory::new(total / MB, total.saturating_sub(available) / MB);
        debug!(
            "Host memory: {} MB total, {} MB used",
            memory.total_mb, memory.used_mb
        );
        Ok(memory)
    }
}

#[async_trait]
impl MemoryProbe for SystemProbe {
    async fn read(&self, device: DeviceId) -> swap_core::Result<DeviceMemory> {
        match device {
            DeviceId::Cpu => Ok(Self::host_memory().await?),
            other => self.fallback.read(other).await,
        }
    }

    fn name(&self) -> &'static str {
        "system"
    }
}
