//! # swap-adapter-runtime
//!
//! Backend adapters for the four inference technologies vramswap schedules.
//!
//! This crate provides:
//! - One adapter per backend kind behind the `BackendAdapter` contract
//! - A closed-set dispatcher (`RuntimeAdapter`) selecting the adapter by the
//!   registry entry's backend kind
//! - Management of serving processes pinned to their target device
//! - Health polling of serving endpoints
//!
//! ## Supported Backends
//!
//! - **batched_gpu**: vLLM OpenAI-compatible server
//! - **accelerated_single**: Hugging Face Text Generation Inference
//! - **cpu_optimized**: llama.cpp `llama-server`
//! - **remote_api**: any hosted OpenAI-compatible API
//!
//! ## Example
//!
//! ```rust,no_run
//! use swap_adapter_runtime::{RuntimeAdapter, RuntimeConfig};
//! use swap_core::{BackendAdapter, BackendKind, DeviceId, GenerationRequest, ModelSpec};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = RuntimeAdapter::new(RuntimeConfig::default(), None)?;
//! let spec = ModelSpec::new("qwen-7b", BackendKind::BatchedGpu, DeviceId::Gpu(0), 16_000)
//!     .with_endpoint("http://127.0.0.1:8000");
//!
//! let handle = adapter.load(&spec).await?;
//! let request = GenerationRequest { prompt: "Hello".into(), max_tokens: 64, temperature: 0.2 };
//! let output = adapter.generate(&handle, &request).await?;
//! println!("{}", output.text);
//! adapter.unload(&handle).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;
use thiserror::Error;

pub mod adapter;
pub mod config;
pub mod health;
mod http;
pub mod llamacpp;
pub mod local;
pub mod openai;
pub mod process;
pub mod remote;
pub mod tgi;
pub mod vllm;

pub use adapter::RuntimeAdapter;
pub use config::{ProcessConfig, RuntimeConfig};
pub use health::{HealthCheck, HealthStatus};
pub use llamacpp::LlamaCppProtocol;
pub use local::{LocalAdapter, WireProtocol};
pub use process::{ProcessManager, ProcessStatus};
pub use remote::RemoteApiAdapter;
pub use tgi::TgiProtocol;
pub use vllm::VllmProtocol;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur during runtime operations
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Backend out of memory: {0}")]
    OutOfMemory(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unknown model handle: {0}")]
    UnknownHandle(String),
}

impl RuntimeError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RuntimeError::Connection(_) | RuntimeError::Timeout(_) | RuntimeError::Http(_)
        )
    }

    /// Check if this error indicates the serving process is unhealthy
    pub fn is_health_issue(&self) -> bool {
        matches!(
            self,
            RuntimeError::HealthCheck(_) | RuntimeError::Connection(_) | RuntimeError::Process(_)
        )
    }

    /// Map a failure during `load` into the orchestration taxonomy
    pub fn into_load_error(self, model: &str) -> swap_core::Error {
        swap_core::Error::load(model, self.to_string())
    }

    /// Map a failure during `generate` into the orchestration taxonomy
    pub fn into_generation_error(self, model: &str) -> swap_core::Error {
        match self {
            RuntimeError::OutOfMemory(msg) => swap_core::Error::out_of_memory(model, msg),
            RuntimeError::Timeout(after) => swap_core::Error::timeout(model, after),
            other => swap_core::Error::generation(model, other.to_string()),
        }
    }
}

/// Errors that are not tied to one model, such as building the adapter
impl From<RuntimeError> for swap_core::Error {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Configuration(msg) => swap_core::Error::InvalidConfiguration(msg),
            RuntimeError::Io(e) => swap_core::Error::Io(e),
            other => swap_core::Error::Internal(other.to_string()),
        }
    }
}

/// Recognize the out-of-memory messages vLLM, TGI and llama.cpp return
pub(crate) fn looks_like_oom(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("out of memory") || lower.contains("outofmemory") || lower.contains("cuda oom")
}
