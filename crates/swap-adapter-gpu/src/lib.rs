//! # swap-adapter-gpu
//!
//! Live device-memory probes for the vramswap memory ledger.
//!
//! The ledger re-reads used/total memory from the device before every
//! reservation so that allocations made by processes outside the orchestrator
//! are accounted for. This crate provides the readers:
//!
//! - **NVML**: NVIDIA Management Library, one reading per `gpu:N`
//! - **System**: host RAM via `sysinfo` for the `cpu` device
//! - **Static**: configured capacities with nothing used externally
//! - **Mock**: settable readings for tests (feature `mock`)
//!
//! ## Example
//!
//! ```rust,no_run
//! use swap_adapter_gpu::{create_probe, ProbeSettings};
//! use swap_core::{DeviceId, MemoryProbe, ProbeBackend};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = ProbeSettings::new(ProbeBackend::Nvml).with_capacity(DeviceId::Gpu(0), 24_000);
//! let probe = create_probe(&settings).await?;
//! let memory = probe.read(DeviceId::Gpu(0)).await?;
//! println!("gpu:0 free {} MB", memory.free_mb());
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

pub mod config;
pub mod probe;
pub mod static_probe;
pub mod system;

#[cfg(feature = "nvml")]
pub mod nvml;

#[cfg(any(feature = "mock", test))]
pub mod mock;

pub use config::ProbeSettings;
pub use probe::{create_probe, DeviceProbe};
pub use static_probe::StaticProbe;
pub use system::SystemProbe;

#[cfg(any(feature = "mock", test))]
pub use mock::MockProbe;

/// Result type for probe operations
pub type Result<T> = std::result::Result<T, GpuError>;

/// Errors that can occur while reading device memory
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("Probe backend not supported: {0}")]
    UnsupportedBackend(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Probe initialization failed: {0}")]
    InitializationFailed(String),

    #[error("NVML error: {0}")]
    NvmlError(String),

    #[error("Probe read failed: {0}")]
    ReadFailed(String),
}

impl GpuError {
    /// Check if a later read may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, GpuError::ReadFailed(_) | GpuError::NvmlError(_))
    }

    /// Check if this error indicates a driver issue
    pub fn is_driver_issue(&self) -> bool {
        matches!(
            self,
            GpuError::NvmlError(_) | GpuError::InitializationFailed(_)
        )
    }
}

impl From<GpuError> for swap_core::Error {
    fn from(err: GpuError) -> Self {
        match err {
            GpuError::Configuration(msg) => swap_core::Error::InvalidConfiguration(msg),
            other => swap_core::Error::Probe(other.to_string()),
        }
    }
}
