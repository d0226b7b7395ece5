//! State representations for models and devices
//!
//! Point-in-time views of the lifecycle manager and the memory ledger, used
//! for status reporting, metrics records and generation results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BackendKind, DeviceId};

/// Lifecycle of one model name
///
/// `Unloaded -> Loading -> Resident -> Unloading -> Unloaded`, with
/// `LoadFailed` reverting to `Unloaded` once cleanup is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Resident,
    Unloading,
    LoadFailed,
}

impl LifecycleState {
    pub fn is_resident(&self) -> bool {
        matches!(self, LifecycleState::Resident)
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self, LifecycleState::Loading | LifecycleState::Unloading)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unloaded => "UNLOADED",
            LifecycleState::Loading => "LOADING",
            LifecycleState::Resident => "RESIDENT",
            LifecycleState::Unloading => "UNLOADING",
            LifecycleState::LoadFailed => "LOAD_FAILED",
        };
        write!(f, "{}", name)
    }
}

/// Ledger view of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device: DeviceId,
    pub capacity_mb: u64,
    pub safety_margin_mb: u64,
    /// Sum of resident and in-progress reservations
    pub reserved_mb: u64,
    /// Last live reading from the probe
    pub used_mb: u64,
    pub available_mb: u64,
    pub residents: Vec<String>,
    pub taken_at: DateTime<Utc>,
}

/// Status of one registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub name: String,
    pub backend: BackendKind,
    pub device: DeviceId,
    pub footprint_mb: u64,
    pub state: LifecycleState,
    pub in_flight: usize,
    pub last_used: Option<DateTime<Utc>>,
    /// Seconds left in the cool-down window, if cooling down
    pub cooldown_remaining_s: Option<u64>,
    pub consecutive_load_failures: u32,
    pub generation_errors: u64,
    pub timeouts: u64,
}

/// Orchestrator-wide status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub models: Vec<ModelStatus>,
    pub devices: Vec<DeviceSnapshot>,
    pub accepting: bool,
}

impl OrchestratorStatus {
    pub fn model(&self, name: &str) -> Option<&ModelStatus> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn device(&self, device: DeviceId) -> Option<&DeviceSnapshot> {
        self.devices.iter().find(|d| d.device == device)
    }

    pub fn resident_count(&self) -> usize {
        self.models.iter().filter(|m| m.state.is_resident()).count()
    }
}
