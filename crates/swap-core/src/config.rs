//! Configuration management for vramswap
//!
//! Provides a unified configuration system that supports YAML files and
//! environment variable overrides on top of built-in defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::{BackendKind, DeviceId, Error, ModelSpec, Result};

/// Name of the pseudo-model built from the `remote` section
pub const REMOTE_FALLBACK_MODEL: &str = "remote-fallback";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub cooldown: CooldownConfig,
    /// Local devices the ledger manages
    pub devices: Vec<DeviceConfig>,
    pub probe: ProbeConfig,
    /// Static model registry
    pub models: Vec<ModelSpec>,
    /// Hosted fallback used when no registry entry matches
    pub remote: Option<RemoteConfig>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Configuration file
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        if let Ok(config_path) = std::env::var("VRAMSWAP_CONFIG") {
            builder = builder.add_source(config::File::with_name(&config_path).required(false));
        } else {
            for path in &["./vramswap.yaml", "/etc/vramswap/config.yaml"] {
                builder = builder.add_source(config::File::with_name(path).required(false));
            }
        }

        // VRAMSWAP_ORCHESTRATOR__MAX_TOKENS=256
        builder = builder.add_source(
            config::Environment::with_prefix("VRAMSWAP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path));

        let config = builder.build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let parsed: Self = serde_yaml::from_str(yaml)?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.orchestrator.validate()?;
        self.cooldown.validate()?;

        let mut devices = HashSet::new();
        for device in &self.devices {
            if !device.id.is_local() {
                return Err(Error::config("Device list may only contain gpu:N and cpu"));
            }
            if !devices.insert(device.id) {
                return Err(Error::config(format!("Duplicate device {}", device.id)));
            }
        }

        let mut names = HashSet::new();
        for model in &self.models {
            model.validate()?;
            if model.name == REMOTE_FALLBACK_MODEL {
                return Err(Error::config(format!(
                    "Model name {} is reserved",
                    REMOTE_FALLBACK_MODEL
                )));
            }
            if !names.insert(model.name.as_str()) {
                return Err(Error::config(format!("Duplicate model name {}", model.name)));
            }
            if model.device.is_local() && !devices.contains(&model.device) {
                return Err(Error::config(format!(
                    "Model {} targets undeclared device {}",
                    model.name, model.device
                )));
            }
            if model.backend == BackendKind::RemoteApi
                && model.runtime.endpoint.is_none()
                && self.remote.is_none()
            {
                return Err(Error::config(format!(
                    "Remote model {} has no endpoint and no remote section is configured",
                    model.name
                )));
            }
        }

        if let Some(remote) = &self.remote {
            remote.validate()?;
        }

        Ok(())
    }

    pub fn device(&self, id: DeviceId) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Safety margin for a device, honoring per-device overrides
    pub fn safety_margin_for(&self, id: DeviceId) -> u64 {
        self.device(id)
            .and_then(|d| d.safety_margin_mb)
            .unwrap_or(self.orchestrator.safety_margin_mb)
    }

    /// Registry entry for the remote fallback, when one is configured
    pub fn remote_fallback_spec(&self) -> Option<ModelSpec> {
        self.remote.as_ref().map(RemoteConfig::to_spec)
    }

    pub fn server_bind_addr(&self) -> Result<SocketAddr> {
        self.server.bind_addr()
    }
}

/// Which of two orderings the eviction pass applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently used first; among equally old models, the least preferred priority
    #[default]
    LruThenPriority,
    /// Least preferred priority first; among equal priorities, the least recently used
    PriorityThenLru,
}

/// The orchestration surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Absolute buffer kept free on every local device
    pub safety_margin_mb: u64,
    /// Per-generation deadline
    pub default_timeout_s: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Order remote candidates after every local one
    pub prefer_local: bool,
    pub cache_responses: bool,
    pub cache_capacity: usize,
    pub cache_ttl_s: u64,
    pub eviction_policy: EvictionPolicy,
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_s == 0 {
            return Err(Error::config("default_timeout_s must be > 0"));
        }
        if self.max_tokens == 0 {
            return Err(Error::config("max_tokens must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::config("temperature must be within 0.0..=2.0"));
        }
        if self.cache_responses && self.cache_capacity == 0 {
            return Err(Error::config("cache_capacity must be > 0 when caching is enabled"));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_s)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_s)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            safety_margin_mb: 512,
            default_timeout_s: 60,
            max_tokens: 512,
            temperature: 0.7,
            prefer_local: true,
            cache_responses: false,
            cache_capacity: 256,
            cache_ttl_s: 600,
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

/// Circuit breaker for models that keep failing to load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// Consecutive load errors before the model is skipped
    pub failure_threshold: u32,
    pub duration_s: u64,
}

impl CooldownConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::config("cooldown.failure_threshold must be > 0"));
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_s)
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            duration_s: 300,
        }
    }
}

/// A local device managed by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: DeviceId,
    /// Capacity to use instead of the probe's total
    #[serde(default)]
    pub capacity_mb: Option<u64>,
    #[serde(default)]
    pub safety_margin_mb: Option<u64>,
}

impl DeviceConfig {
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            capacity_mb: None,
            safety_margin_mb: None,
        }
    }

    pub fn with_capacity(mut self, capacity_mb: u64) -> Self {
        self.capacity_mb = Some(capacity_mb);
        self
    }

    pub fn with_safety_margin(mut self, margin_mb: u64) -> Self {
        self.safety_margin_mb = Some(margin_mb);
        self
    }
}

/// Source of live device memory readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeBackend {
    /// NVIDIA management library; falls back to `static` when unavailable
    #[default]
    Nvml,
    /// Host RAM for `cpu`, configured capacity for GPUs
    System,
    /// Configured capacities, nothing used outside the orchestrator
    Static,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProbeConfig {
    pub backend: ProbeBackend,
}

/// Hosted OpenAI-compatible fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL, e.g. `https://api.openai.com`
    pub endpoint: String,
    /// Environment variable holding the bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub model: String,
    #[serde(default)]
    pub cost_per_1k_tokens: f64,
}

impl RemoteConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(Error::config(format!(
                "remote.endpoint must be an http(s) URL, got {}",
                self.endpoint
            )));
        }
        if self.model.is_empty() {
            return Err(Error::config("remote.model cannot be empty"));
        }
        if self.cost_per_1k_tokens < 0.0 {
            return Err(Error::config("remote.cost_per_1k_tokens cannot be negative"));
        }
        Ok(())
    }

    /// Pseudo-model serving every difficulty, least preferred by priority
    pub fn to_spec(&self) -> ModelSpec {
        ModelSpec::new(REMOTE_FALLBACK_MODEL, BackendKind::RemoteApi, DeviceId::Remote, 0)
            .with_priority(u32::MAX)
            .with_endpoint(self.endpoint.clone())
            .with_upstream_model(self.model.clone())
            .with_cost(self.cost_per_1k_tokens)
    }
}

/// HTTP request layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid server bind address: {}", e)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `text`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Separate listener for `/metrics`; served by the main server when unset
    pub bind_addr: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: None,
        }
    }
}
