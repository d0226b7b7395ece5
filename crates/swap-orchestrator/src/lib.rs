//! # swap-orchestrator
//!
//! The model orchestrator: picks a model for each query, keeps a memory
//! ledger per device, loads and evicts models under that budget and falls
//! back through the candidate list when a model cannot serve.
//!
//! ## Components
//!
//! - [`Ledger`]: per-device memory accounting and admission control
//! - [`Registry`]: immutable catalog snapshot of known models
//! - [`Router`]: ordered candidate list for a query
//! - [`LifecycleManager`]: single-flight loads, eviction and unloads
//! - [`FallbackController`]: walks candidates until one generates
//! - [`Cooldown`]: temporarily benches models that keep failing to load
//! - [`ResponseCache`]: optional fingerprint cache of results
//! - [`Orchestrator`]: the facade tying them together
//!
//! ## Example
//!
//! ```rust,ignore
//! let orchestrator = Orchestrator::builder(&config, adapter, probe)
//!     .with_sink(sink)
//!     .build()?;
//! let result = orchestrator.query(QueryInput::new("What is Rust?")).await?;
//! println!("{} answered in {:?}", result.model, result.latency);
//! ```

pub mod cache;
pub mod cooldown;
pub mod estimate;
pub mod fallback;
pub mod ledger;
pub mod lifecycle;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod sink;

pub use cache::ResponseCache;
pub use cooldown::{Cooldown, ModelHealth};
pub use estimate::{estimate, Estimate};
pub use fallback::{FallbackController, Served};
pub use ledger::{DeviceBudget, Ledger};
pub use lifecycle::{LifecycleManager, LoadFailure, ResidentLease};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, QueryInput};
pub use registry::Registry;
pub use router::Router;
pub use sink::{FanoutSink, TracingSink};
