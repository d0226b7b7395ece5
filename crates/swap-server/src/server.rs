//! HTTP server

use axum::{
    routing::{get, post},
    Router as AxumRouter,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use swap_core::{BackendAdapter, ServerConfig};
use swap_metrics::PrometheusExporter;
use swap_orchestrator::Orchestrator;

use crate::handler;
use crate::{Result, ServerError};

/// Shared application state
pub struct AppState<A: BackendAdapter> {
    pub orchestrator: Arc<Orchestrator<A>>,
    /// Serves `/metrics` on the main listener when present
    pub exporter: Option<Arc<PrometheusExporter>>,
    started: Instant,
}

impl<A: BackendAdapter> Clone for AppState<A> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            exporter: self.exporter.clone(),
            started: self.started,
        }
    }
}

impl<A: BackendAdapter> AppState<A> {
    pub fn new(orchestrator: Arc<Orchestrator<A>>, exporter: Option<Arc<PrometheusExporter>>) -> Self {
        Self {
            orchestrator,
            exporter,
            started: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

pub struct HttpServer<A: BackendAdapter> {
    config: ServerConfig,
    state: AppState<A>,
}

impl<A: BackendAdapter> HttpServer<A> {
    pub fn new(config: ServerConfig, state: AppState<A>) -> Self {
        Self { config, state }
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn serve<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self
            .config
            .bind_addr()
            .map_err(|e| ServerError::Configuration(e.to_string()))?;
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Server(format!("Failed to bind to {}: {}", addr, e)))?;
        info!("Starting HTTP server on {}", addr);

        if let Err(e) = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("HTTP server error: {}", e);
            return Err(ServerError::Server(format!("HTTP server failed: {}", e)));
        }
        info!("HTTP server stopped");
        Ok(())
    }

    /// Create the Axum router with all routes
    pub fn router(&self) -> AxumRouter {
        let mut router = AxumRouter::new()
            .route("/health", get(handler::health::<A>))
            .route("/v1/query", post(handler::query::<A>))
            .route("/v1/models", get(handler::list_models::<A>))
            .route("/v1/models/:name/unload", post(handler::unload::<A>))
            .route("/v1/status", get(handler::status::<A>));

        if let Some(exporter) = &self.state.exporter {
            router = router.merge(exporter.router::<AppState<A>>());
        }

        let mut router = router
            .with_state(self.state.clone())
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

        if self.config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
