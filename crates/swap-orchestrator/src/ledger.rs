//! Per-device memory ledger
//!
//! Each local device has its own ledger entry behind its own lock, so
//! reservations on different devices never wait on each other. Every
//! reservation re-reads the probe while holding the device lock and checks
//! `available >= requested + safety_margin`, where
//!
//! ```text
//! available = capacity - max(live_used + pending, reserved)
//! ```
//!
//! `live_used` covers everything the device reports, including processes
//! the orchestrator does not manage. `pending` is the part of `reserved`
//! granted to loads that have not finished, which the device cannot show
//! yet. `reserved` covers every footprint the orchestrator has granted.
//! The `remote` device has no ledger and always admits.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use swap_core::{Config, DeviceId, DeviceMemory, DeviceSnapshot, Error, MemoryProbe, Result};

/// Static budget of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBudget {
    pub device: DeviceId,
    /// Overrides the probe's total when set
    pub capacity_mb: Option<u64>,
    pub safety_margin_mb: u64,
}

#[derive(Debug)]
struct DeviceLedger {
    device: DeviceId,
    capacity_override: Option<u64>,
    capacity_mb: u64,
    safety_margin_mb: u64,
    reserved_mb: u64,
    /// Reserved for loads still in progress
    pending_mb: u64,
    used_mb: u64,
    residents: BTreeSet<String>,
}

impl DeviceLedger {
    fn new(budget: DeviceBudget) -> Self {
        Self {
            device: budget.device,
            capacity_override: budget.capacity_mb,
            capacity_mb: budget.capacity_mb.unwrap_or(0),
            safety_margin_mb: budget.safety_margin_mb,
            reserved_mb: 0,
            pending_mb: 0,
            used_mb: 0,
            residents: BTreeSet::new(),
        }
    }

    fn apply(&mut self, reading: DeviceMemory) {
        self.capacity_mb = self.capacity_override.unwrap_or(reading.total_mb);
        self.used_mb = reading.used_mb;
    }

    fn available(&self) -> u64 {
        self.capacity_mb
            .saturating_sub(self.used_mb.saturating_add(self.pending_mb).max(self.reserved_mb))
    }

    fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            device: self.device,
            capacity_mb: self.capacity_mb,
            safety_margin_mb: self.safety_margin_mb,
            reserved_mb: self.reserved_mb,
            used_mb: self.used_mb,
            available_mb: self.available(),
            residents: self.residents.iter().cloned().collect(),
            taken_at: Utc::now(),
        }
    }
}

/// Memory accounting for every local device
pub struct Ledger {
    devices: BTreeMap<DeviceId, Arc<Mutex<DeviceLedger>>>,
    probe: Arc<dyn MemoryProbe>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .field("probe", &self.probe.name())
            .finish()
    }
}

impl Ledger {
    pub fn new(budgets: impl IntoIterator<Item = DeviceBudget>, probe: Arc<dyn MemoryProbe>) -> Self {
        let devices = budgets
            .into_iter()
            .filter(|b| b.device.is_local())
            .map(|b| (b.device, Arc::new(Mutex::new(DeviceLedger::new(b)))))
            .collect();
        Self { devices, probe }
    }

    pub fn from_config(config: &Config, probe: Arc<dyn MemoryProbe>) -> Self {
        let budgets = config.devices.iter().map(|d| DeviceBudget {
            device: d.id,
            capacity_mb: d.capacity_mb,
            safety_margin_mb: config.safety_margin_for(d.id),
        });
        Self::new(budgets, probe)
    }

    pub fn devices(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    /// Whether models may target `device`
    pub fn admits(&self, device: DeviceId) -> bool {
        !device.is_local() || self.devices.contains_key(&device)
    }

    fn entry(&self, device: DeviceId) -> Result<&Arc<Mutex<DeviceLedger>>> {
        self.devices
            .get(&device)
            .ok_or_else(|| Error::not_found(format!("device {} is not managed", device)))
    }

    /// Refresh from the probe, keeping the last reading if the probe fails
    async fn refresh(&self, ledger: &mut DeviceLedger) {
        match self.probe.read(ledger.device).await {
            Ok(reading) => ledger.apply(reading),
            Err(e) => warn!(
                "Memory probe {} failed for {}, using last reading: {}",
                self.probe.name(),
                ledger.device,
                e
            ),
        }
    }

    /// Free memory before the safety margin is taken into account
    pub async fn available(&self, device: DeviceId) -> Result<u64> {
        if !device.is_local() {
            return Ok(u64::MAX);
        }
        let mut ledger = self.entry(device)?.lock().await;
        self.refresh(&mut ledger).await;
        Ok(ledger.available())
    }

    /// Grant `mb` on `device` if it fits with the safety margin to spare.
    /// The grant stays pending until `mark_resident` or `withdraw`.
    /// A refusal leaves the ledger untouched.
    pub async fn reserve(&self, device: DeviceId, mb: u64) -> Result<bool> {
        if !device.is_local() {
            return Ok(true);
        }
        let mut ledger = self.entry(device)?.lock().await;
        self.refresh(&mut ledger).await;

        let available = ledger.available();
        if available < mb.saturating_add(ledger.safety_margin_mb) {
            debug!(
                "Reservation of {} MB on {} refused: {} MB available, {} MB margin",
                mb, device, available, ledger.safety_margin_mb
            );
            return Ok(false);
        }
        ledger.reserved_mb += mb;
        ledger.pending_mb += mb;
        debug!("Reserved {} MB on {} ({} MB reserved)", mb, device, ledger.reserved_mb);
        Ok(true)
    }

    /// Return `mb` held by a resident model to `device`; over-release
    /// clamps at zero
    pub async fn release(&self, device: DeviceId, mb: u64) {
        let Ok(entry) = self.entry(device) else {
            return;
        };
        let mut ledger = entry.lock().await;
        if mb > ledger.reserved_mb {
            warn!(
                "Releasing {} MB on {} with only {} MB reserved",
                mb, device, ledger.reserved_mb
            );
        }
        ledger.reserved_mb = ledger.reserved_mb.saturating_sub(mb);
    }

    /// Drop a pending grant of `mb` that never became resident
    pub async fn withdraw(&self, device: DeviceId, mb: u64) {
        let Ok(entry) = self.entry(device) else {
            return;
        };
        let mut ledger = entry.lock().await;
        ledger.pending_mb = ledger.pending_mb.saturating_sub(mb);
        ledger.reserved_mb = ledger.reserved_mb.saturating_sub(mb);
    }

    /// Record `model` as loaded; its `mb` grant is no longer pending
    pub async fn mark_resident(&self, device: DeviceId, model: &str, mb: u64) {
        if let Ok(entry) = self.entry(device) {
            let mut ledger = entry.lock().await;
            ledger.pending_mb = ledger.pending_mb.saturating_sub(mb);
            ledger.residents.insert(model.to_string());
        }
    }

    pub async fn pending(&self, device: DeviceId) -> u64 {
        match self.entry(device) {
            Ok(entry) => entry.lock().await.pending_mb,
            Err(_) => 0,
        }
    }

    pub async fn clear_resident(&self, device: DeviceId, model: &str) {
        if let Ok(entry) = self.entry(device) {
            entry.lock().await.residents.remove(model);
        }
    }

    pub async fn reserved(&self, device: DeviceId) -> u64 {
        match self.entry(device) {
            Ok(entry) => entry.lock().await.reserved_mb,
            Err(_) => 0,
        }
    }

    /// Current view of one device without touching the probe
    pub async fn snapshot(&self, device: DeviceId) -> Option<DeviceSnapshot> {
        let entry = self.entry(device).ok()?;
        let ledger = entry.lock().await;
        Some(ledger.snapshot())
    }

    /// Fresh view of every device, re-reading the probe
    pub async fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let mut snapshots = Vec::with_capacity(self.devices.len());
        for entry in self.devices.values() {
            let mut ledger = entry.lock().await;
            self.refresh(&mut ledger).await;
            snapshots.push(ledger.snapshot());
        }
        snapshots
    }
}
