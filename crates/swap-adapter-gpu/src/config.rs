//! Probe configuration

use std::collections::BTreeMap;

use swap_core::{Config, DeviceId, ProbeBackend};

/// Settings for building a memory probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub backend: ProbeBackend,

    /// Devices the ledger manages, with configured capacities where given
    pub devices: BTreeMap<DeviceId, Option<u64>>,
}

impl ProbeSettings {
    pub fn new(backend: ProbeBackend) -> Self {
        Self {
            backend,
            devices: BTreeMap::new(),
        }
    }

    /// Derive probe settings from the `devices` and `probe` sections
    pub fn from_config(config: &Config) -> Self {
        let devices = config
            .devices
            .iter()
            .map(|d| (d.id, d.capacity_mb))
            .collect();
        Self {
            backend: config.probe.backend,
            devices,
        }
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.devices.entry(device).or_insert(None);
        self
    }

    pub fn with_capacity(mut self, device: DeviceId, capacity_mb: u64) -> Self {
        self.devices.insert(device, Some(capacity_mb));
        self
    }

    pub fn capacity(&self, device: DeviceId) -> Option<u64> {
        self.devices.get(&device).copied().flatten()
    }

    /// Capacities of every device that has one configured
    pub fn capacities(&self) -> BTreeMap<DeviceId, u64> {
        self.devices
            .iter()
            .filter_map(|(id, cap)| cap.map(|c| (*id, c)))
            .collect()
    }

    /// Check that the chosen backend can produce a total for every device
    pub fn validate(&self) -> Result<(), String> {
        for (device, capacity) in &self.devices {
            if capacity.is_some() {
                continue;
            }
            let covered = match (self.backend, device) {
                (ProbeBackend::Nvml, _) => true,
                (ProbeBackend::System, DeviceId::Cpu) => true,
                _ => false,
            };
            if !covered {
                return Err(format!(
                    "device {} needs capacity_mb with the {:?} probe",
                    device, self.backend
                ));
            }
        }
        Ok(())
    }
}
