//! Request handlers and wire types

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use swap_core::{
    BackendAdapter, BackendKind, DeviceId, DifficultyRange, Error, GenerationResult, LifecycleState,
    OrchestratorStatus,
};
use swap_orchestrator::QueryInput;

use crate::server::AppState;

/// Orchestrator error rendered as a JSON body with its HTTP status
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }

        let mut body = json!({
            "error": {
                "category": self.0.category(),
                "message": self.0.to_string(),
            }
        });
        if let Error::AllCandidatesExhausted { tried } = &self.0 {
            body["error"]["tried"] = json!(tried);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Body of a successful `POST /v1/query`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub text: String,
    pub model: String,
    pub latency_ms: u64,
    pub tokens: u32,
    pub degraded: bool,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl From<GenerationResult> for QueryResponse {
    fn from(result: GenerationResult) -> Self {
        Self {
            latency_ms: result.latency.as_millis() as u64,
            text: result.text,
            model: result.model,
            tokens: result.tokens,
            degraded: result.degraded,
            cached: result.cached,
            cost_usd: result.cost_usd,
        }
    }
}

/// Registry entry as listed by `GET /v1/models`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelView {
    pub name: String,
    pub backend: BackendKind,
    pub device: DeviceId,
    pub footprint_mb: u64,
    pub difficulty: DifficultyRange,
    pub specialties: Vec<String>,
    pub priority: u32,
    pub state: LifecycleState,
    pub in_flight: usize,
}

pub async fn query<A: BackendAdapter>(
    State(state): State<AppState<A>>,
    Json(input): Json<QueryInput>,
) -> ApiResult<QueryResponse> {
    debug!(
        difficulty = ?input.difficulty,
        model = ?input.model,
        "Received query"
    );
    // A client that disconnects drops this future; any generation already
    // started keeps running to completion inside the orchestrator
    let result = state.orchestrator.query(input).await?;
    Ok(Json(result.into()))
}

pub async fn list_models<A: BackendAdapter>(State(state): State<AppState<A>>) -> Json<Vec<ModelView>> {
    let registry = state.orchestrator.registry();
    let lifecycle = state.orchestrator.lifecycle();
    let models = registry
        .specs()
        .map(|spec| {
            let (lifecycle_state, in_flight, _) = lifecycle.state(&spec.name);
            ModelView {
                name: spec.name.clone(),
                backend: spec.backend,
                device: spec.device,
                footprint_mb: spec.footprint_mb,
                difficulty: spec.difficulty,
                specialties: spec.specialties.clone(),
                priority: spec.priority,
                state: lifecycle_state,
                in_flight,
            }
        })
        .collect();
    Json(models)
}

pub async fn status<A: BackendAdapter>(State(state): State<AppState<A>>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator.status().await)
}

pub async fn unload<A: BackendAdapter>(
    State(state): State<AppState<A>>,
    Path(name): Path<String>,
) -> ApiResult<serde_json::Value> {
    let unloaded = state.orchestrator.unload(&name).await?;
    if unloaded {
        info!("Unloaded {} on request", name);
    }
    Ok(Json(json!({ "model": name, "unloaded": unloaded })))
}

pub async fn health<A: BackendAdapter>(State(state): State<AppState<A>>) -> Response {
    let accepting = state.orchestrator.is_accepting();
    let body = Json(json!({
        "status": if accepting { "healthy" } else { "shutting_down" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "resident_models": state.orchestrator.lifecycle().residents().len(),
    }));
    if accepting {
        (StatusCode::OK, body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}
