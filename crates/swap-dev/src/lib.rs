//! # swap-dev
//!
//! Development and testing utilities for vramswap.
//!
//! This crate provides:
//! - `MockBackend`, a scriptable stand-in for every backend kind
//! - `MockProbe`, settable device memory readings
//! - `MemorySink`, a metrics sink that keeps everything it receives
//! - Registry and configuration fixtures shared by the integration tests

pub mod mock_adapters;
pub mod sink;
pub mod utils;

pub use mock_adapters::{CallCounts, Fault, MockBackend};
pub use sink::MemorySink;
pub use swap_adapter_gpu::MockProbe;
pub use utils::{
    config_with, large_gpu, medium_gpu, remote_section, setup_test_logging, small_local,
    standard_probe, test_spec,
};
