//! Mock memory probe for testing

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use swap_core::{DeviceId, DeviceMemory, MemoryProbe};

use crate::GpuError;

/// Probe with settable per-device readings
#[derive(Debug, Default)]
pub struct MockProbe {
    readings: RwLock<HashMap<DeviceId, DeviceMemory>>,
    reads: AtomicUsize,
    failing: AtomicBool,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MockProbe::set_memory`]
    pub fn with_device(self, device: DeviceId, total_mb: u64, used_mb: u64) -> Self {
        self.set_memory(device, total_mb, used_mb);
        self
    }

    pub fn set_memory(&self, device: DeviceId, total_mb: u64, used_mb: u64) {
        self.readings
            .write()
            .insert(device, DeviceMemory::new(total_mb, used_mb));
    }

    /// Simulate memory taken by a process outside the orchestrator
    pub fn set_used(&self, device: DeviceId, used_mb: u64) {
        if let Some(memory) = self.readings.write().get_mut(&device) {
            memory.used_mb = used_mb;
        }
    }

    /// Make every read fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MemoryProbe for MockProbe {
    async fn read(&self, device: DeviceId) -> swap_core::Result<DeviceMemory> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(GpuError::ReadFailed("mock probe failure".to_string()).into());
        }
        self.readings
            .read()
            .get(&device)
            .copied()
            .ok_or_else(|| GpuError::DeviceNotFound(device.to_string()).into())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
