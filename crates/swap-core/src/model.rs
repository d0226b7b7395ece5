//! Model catalog entries

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{BackendKind, DeviceId, Error, Result};

/// Inclusive range of difficulty scores a model can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u8; 2]", into = "[u8; 2]")]
pub struct DifficultyRange {
    pub min: u8,
    pub max: u8,
}

impl DifficultyRange {
    pub const FULL: DifficultyRange = DifficultyRange { min: 0, max: 100 };

    pub fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, difficulty: u8) -> bool {
        self.min <= difficulty && difficulty <= self.max
    }

    pub fn is_valid(&self) -> bool {
        self.min <= self.max && self.max <= 100
    }
}

impl Default for DifficultyRange {
    fn default() -> Self {
        Self::FULL
    }
}

impl From<[u8; 2]> for DifficultyRange {
    fn from(pair: [u8; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

impl From<DifficultyRange> for [u8; 2] {
    fn from(range: DifficultyRange) -> Self {
        [range.min, range.max]
    }
}

/// How a local adapter gets a serving process for a model
///
/// With a `command`, the adapter spawns and owns the process. With only an
/// `endpoint`, it attaches to a server managed elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeLaunch {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub port: Option<u16>,
    pub endpoint: Option<String>,
    pub model_path: Option<String>,
    pub env: HashMap<String, String>,
    pub startup_timeout_s: Option<u64>,
    /// Overrides the backend kind's concurrency limit
    pub max_concurrency: Option<usize>,
}

impl RuntimeLaunch {
    pub fn startup_timeout(&self) -> Option<Duration> {
        self.startup_timeout_s.map(Duration::from_secs)
    }
}

/// A registry entry. Immutable once the registry is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub backend: BackendKind,
    pub device: DeviceId,
    /// Estimated resident size
    #[serde(default)]
    pub footprint_mb: u64,
    #[serde(default)]
    pub difficulty: DifficultyRange,
    #[serde(default)]
    pub specialties: Vec<String>,
    /// Lower value is preferred by the router and kept longer by eviction
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub runtime: RuntimeLaunch,
    /// Model id sent upstream; defaults to `name`
    #[serde(default)]
    pub upstream_model: Option<String>,
    #[serde(default)]
    pub cost_per_1k_tokens: f64,
}

impl ModelSpec {
    pub fn new(
        name: impl Into<String>,
        backend: BackendKind,
        device: DeviceId,
        footprint_mb: u64,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            device,
            footprint_mb,
            difficulty: DifficultyRange::FULL,
            specialties: Vec::new(),
            priority: 0,
            runtime: RuntimeLaunch::default(),
            upstream_model: None,
            cost_per_1k_tokens: 0.0,
        }
    }

    pub fn with_difficulty(mut self, min: u8, max: u8) -> Self {
        self.difficulty = DifficultyRange::new(min, max);
        self
    }

    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialties.push(specialty.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_runtime(mut self, runtime: RuntimeLaunch) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.runtime.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_upstream_model(mut self, model: impl Into<String>) -> Self {
        self.upstream_model = Some(model.into());
        self
    }

    pub fn with_cost(mut self, cost_per_1k_tokens: f64) -> Self {
        self.cost_per_1k_tokens = cost_per_1k_tokens;
        self
    }

    pub fn is_remote(&self) -> bool {
        self.backend.is_remote()
    }

    pub fn has_specialty(&self, specialty: &str) -> bool {
        self.specialties
            .iter()
            .any(|s| s.eq_ignore_ascii_case(specialty))
    }

    /// Model id sent to the serving process or API
    pub fn upstream_name(&self) -> &str {
        self.upstream_model.as_deref().unwrap_or(&self.name)
    }

    /// Generation slots per instance
    pub fn concurrency(&self) -> Option<usize> {
        self.runtime
            .max_concurrency
            .or_else(|| self.backend.default_concurrency())
    }

    /// Cost of a generation in USD, for remote entries
    pub fn cost_for(&self, tokens: u32) -> Option<f64> {
        if self.is_remote() && self.cost_per_1k_tokens > 0.0 {
            Some(tokens as f64 / 1000.0 * self.cost_per_1k_tokens)
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("Model name cannot be empty"));
        }
        if !self.difficulty.is_valid() {
            return Err(Error::config(format!(
                "Model {} has an invalid difficulty range [{}, {}]",
                self.name, self.difficulty.min, self.difficulty.max
            )));
        }
        match (self.backend.is_remote(), self.device) {
            (true, DeviceId::Remote) => {}
            (true, device) => {
                return Err(Error::config(format!(
                    "Remote model {} must target device remote, not {}",
                    self.name, device
                )))
            }
            (false, DeviceId::Remote) => {
                return Err(Error::config(format!(
                    "Local model {} cannot target device remote",
                    self.name
                )))
            }
            (false, _) => {}
        }
        if !self.is_remote() && self.footprint_mb == 0 {
            return Err(Error::config(format!(
                "Local model {} needs a footprint_mb estimate",
                self.name
            )));
        }
        if self.cost_per_1k_tokens < 0.0 {
            return Err(Error::config(format!(
                "Model {} has a negative cost",
                self.name
            )));
        }
        Ok(())
    }
}
