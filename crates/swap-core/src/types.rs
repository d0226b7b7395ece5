//! Core type definitions for vramswap

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::state::DeviceSnapshot;

/// Where a model lives: one accelerator, the host CPU, or a hosted API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceId {
    /// Accelerator by index, written `gpu:N`
    Gpu(u32),
    /// Host memory
    Cpu,
    /// No local resource
    Remote,
}

impl DeviceId {
    /// Check if the device holds local memory the ledger must account for
    pub fn is_local(&self) -> bool {
        !matches!(self, DeviceId::Remote)
    }

    /// Accelerator index, if this is a GPU
    pub fn gpu_index(&self) -> Option<u32> {
        match self {
            DeviceId::Gpu(index) => Some(*index),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Gpu(index) => write!(f, "gpu:{}", index),
            DeviceId::Cpu => write!(f, "cpu"),
            DeviceId::Remote => write!(f, "remote"),
        }
    }
}

impl std::str::FromStr for DeviceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "cpu" => return Ok(DeviceId::Cpu),
            "remote" => return Ok(DeviceId::Remote),
            _ => {}
        }

        let index = lower
            .strip_prefix("gpu:")
            .or_else(|| lower.strip_prefix("cuda:"))
            .ok_or_else(|| format!("Unknown device: {}", s))?;
        index
            .parse::<u32>()
            .map(DeviceId::Gpu)
            .map_err(|_| format!("Invalid GPU index in device: {}", s))
    }
}

impl TryFrom<String> for DeviceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.to_string()
    }
}

/// The closed set of inference technologies a model can be served by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Continuous-batching GPU engine (vLLM-style)
    BatchedGpu,
    /// Plain accelerated model serving one request at a time
    AcceleratedSingle,
    /// CPU-optimized quantized runtime
    CpuOptimized,
    /// Hosted OpenAI-compatible API
    RemoteApi,
}

impl BackendKind {
    pub fn is_remote(&self) -> bool {
        matches!(self, BackendKind::RemoteApi)
    }

    /// Concurrent generations a single instance accepts, `None` when the
    /// backend batches internally
    pub fn default_concurrency(&self) -> Option<usize> {
        match self {
            BackendKind::BatchedGpu | BackendKind::RemoteApi => None,
            BackendKind::AcceleratedSingle | BackendKind::CpuOptimized => Some(1),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::BatchedGpu => "batched_gpu",
            BackendKind::AcceleratedSingle => "accelerated_single",
            BackendKind::CpuOptimized => "cpu_optimized",
            BackendKind::RemoteApi => "remote_api",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "batched_gpu" | "vllm" => Ok(BackendKind::BatchedGpu),
            "accelerated_single" | "tgi" => Ok(BackendKind::AcceleratedSingle),
            "cpu_optimized" | "llama_cpp" => Ok(BackendKind::CpuOptimized),
            "remote_api" | "remote" => Ok(BackendKind::RemoteApi),
            _ => Err(format!("Unknown backend kind: {}", s)),
        }
    }
}

/// A routed query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Raw text, before any retrieved context is prepended
    pub text: String,
    /// Difficulty score, 0-100
    pub difficulty: u8,
    pub specialty: Option<String>,
    /// Explicit model name requested by the caller
    pub model_override: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>, difficulty: u8) -> Self {
        Self {
            text: text.into(),
            difficulty: difficulty.min(100),
            specialty: None,
            model_override: None,
        }
    }

    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialty = Some(specialty.into());
        self
    }

    pub fn with_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    /// First `max_chars` characters, for metrics records and logs
    pub fn excerpt(&self, max_chars: usize) -> String {
        let mut excerpt: String = self.text.chars().take(max_chars).collect();
        if self.text.chars().count() > max_chars {
            excerpt.push_str("...");
        }
        excerpt
    }
}

/// Uniform generation parameters handed to every backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// What a backend returns for one generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    /// Completion tokens reported by the backend
    pub tokens: u32,
}

/// Opaque token for a loaded model instance
///
/// Valid from a successful `load` until the matching `unload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHandle {
    pub id: Uuid,
    pub model: String,
    pub backend: BackendKind,
    pub device: DeviceId,
    /// Base URL of the serving process, when there is one
    pub endpoint: Option<String>,
    pub loaded_at: DateTime<Utc>,
}

impl ModelHandle {
    pub fn new(model: impl Into<String>, backend: BackendKind, device: DeviceId) -> Self {
        Self {
            id: Uuid::new_v4(),
            model: model.into(),
            backend,
            device,
            endpoint: None,
            loaded_at: Utc::now(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Live memory reading for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMemory {
    pub total_mb: u64,
    pub used_mb: u64,
}

impl DeviceMemory {
    pub fn new(total_mb: u64, used_mb: u64) -> Self {
        Self { total_mb, used_mb }
    }

    pub fn free_mb(&self) -> u64 {
        self.total_mb.saturating_sub(self.used_mb)
    }
}

/// Result returned to the caller of the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    /// Model that actually produced the text
    pub model: String,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    pub tokens: u32,
    /// Ledger view of the serving device at completion
    pub memory: Option<DeviceSnapshot>,
    /// Served by a candidate other than the router's first choice
    pub degraded: bool,
    /// Served from the response cache
    pub cached: bool,
    pub cost_usd: Option<f64>,
}

/// How a query ended, for the metrics sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    Success,
    Degraded,
    Cached,
    Failed,
}

impl QueryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOutcome::Success => "success",
            QueryOutcome::Degraded => "degraded",
            QueryOutcome::Cached => "cached",
            QueryOutcome::Failed => "failed",
        }
    }
}

/// One record per completed or failed query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub excerpt: String,
    pub model: Option<String>,
    pub difficulty: u8,
    pub specialty: Option<String>,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    pub tokens: u32,
    pub memory: Option<DeviceSnapshot>,
    pub cost_usd: Option<f64>,
    pub outcome: QueryOutcome,
    /// Error category when the query failed
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Residency changes reported to the metrics sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Loaded {
        model: String,
        device: DeviceId,
        #[serde(with = "duration_ms")]
        duration: Duration,
    },
    LoadFailed { model: String, device: DeviceId },
    AdmissionDenied { model: String, device: DeviceId },
    Evicted { model: String, device: DeviceId },
    Unloaded { model: String, device: DeviceId },
    CooledDown { model: String },
    GenerationFailed { model: String, timeout: bool },
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
