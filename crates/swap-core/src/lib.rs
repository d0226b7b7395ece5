//! # swap-core
//!
//! Core types, traits, and configuration for vramswap, a model orchestrator
//! that keeps several GPUs and the host CPU stocked with language models and
//! swaps them in and out of device memory as demand shifts.
//!
//! This crate is shared by every other vramswap component. It contains:
//!
//! - The model catalog entry (`ModelSpec`) and the query/result types
//! - The backend adapter, memory probe, context retriever and metrics sink traits
//! - The configuration schema and its loader
//! - The unified error type, including the orchestration error taxonomy

pub mod config;
pub mod error;
pub mod model;
pub mod state;
pub mod traits;
pub mod types;

// Re-export commonly used types at the crate root
pub use config::{
    Config, CooldownConfig, DeviceConfig, EvictionPolicy, LoggingConfig, MetricsConfig,
    OrchestratorConfig, ProbeBackend, ProbeConfig, RemoteConfig, ServerConfig,
};
pub use error::{Error, ErrorContext, Result};
pub use model::{DifficultyRange, ModelSpec, RuntimeLaunch};
pub use state::{DeviceSnapshot, LifecycleState, ModelStatus, OrchestratorStatus};
pub use traits::{BackendAdapter, ContextRetriever, MemoryProbe, MetricsSink, NoContext, NullSink};
pub use types::{
    BackendKind, DeviceId, DeviceMemory, Generation, GenerationRequest, GenerationResult,
    LifecycleEvent, ModelHandle, Query, QueryOutcome, QueryRecord,
};
