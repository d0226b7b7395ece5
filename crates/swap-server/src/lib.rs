//! # swap-server
//!
//! HTTP request layer for vramswap and the `swapd` daemon.
//!
//! - `POST /v1/query` runs one query through the orchestrator
//! - `GET /v1/models` and `GET /v1/status` report registry and ledger state
//! - `POST /v1/models/:name/unload` drains and unloads a resident model
//! - `GET /health` and `GET /metrics` for operators
//!
//! ## Example
//!
//! ```rust,no_run
//! use swap_core::Config;
//! use swap_server::{bootstrap, HttpServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let runtime = bootstrap::build(&config).await?;
//!     let server = HttpServer::new(config.server.clone(), runtime.state());
//!     server.serve(swap_server::server::shutdown_signal()).await?;
//!     runtime.orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

pub mod bootstrap;
pub mod handler;
pub mod server;

pub use bootstrap::Runtime;
pub use handler::{ApiError, ModelView, QueryResponse};
pub use server::{AppState, HttpServer};

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Orchestrator(#[from] swap_core::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] swap_metrics::MetricsError),

    #[error("Probe error: {0}")]
    Probe(#[from] swap_adapter_gpu::GpuError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] swap_adapter_runtime::RuntimeError),
}
