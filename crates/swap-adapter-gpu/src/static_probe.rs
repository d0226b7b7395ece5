//! Probe backed by configured capacities

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use swap_core::{DeviceId, DeviceMemory, MemoryProbe};

use crate::GpuError;

/// Reports the configured capacity with nothing used outside the orchestrator
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    capacities: BTreeMap<DeviceId, u64>,
}

impl StaticProbe {
    pub fn new(capacities: BTreeMap<DeviceId, u64>) -> Self {
        debug!("Static probe covering {} devices", capacities.len());
        Self { capacities }
    }

    pub fn covers(&self, device: DeviceId) -> bool {
        self.capacities.contains_key(&device)
    }
}

#[async_trait]
impl MemoryProbe for StaticProbe {
    async fn read(&self, device: DeviceId) -> swap_core::Result<DeviceMemory> {
        self.capacities
            .get(&device)
            .map(|total| DeviceMemory::new(*total, 0))
            .ok_or_else(|| GpuError::DeviceNotFound(device.to_string()).into())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_readings() {
        let probe = StaticProbe::new(BTreeMap::from([(DeviceId::Gpu(0), 16_000)]));
        let memory = probe.read(DeviceId::Gpu(0)).await.unwrap();
        assert_eq!(memory, DeviceMemory::new(16_000, 0));
        assert!(probe.read(DeviceId::Gpu(1)).await.is_err());
    }
}
