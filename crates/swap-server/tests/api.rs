//! HTTP surface against an orchestrator backed by the mock adapter

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use swap_core::{MetricsSink, ServerConfig};
use swap_dev::{config_with, large_gpu, setup_test_logging, small_local, standard_probe, MockBackend};
use swap_metrics::PrometheusExporter;
use swap_orchestrator::Orchestrator;
use swap_server::{AppState, HttpServer, ModelView, QueryResponse};

struct App {
    router: Router,
    backend: MockBackend,
}

fn app() -> App {
    setup_test_logging();
    let backend = MockBackend::new();
    let exporter = PrometheusExporter::new().unwrap();
    let config = config_with(vec![small_local(), large_gpu()], None);
    let orchestrator = Orchestrator::builder(&config, Arc::new(backend.clone()), Arc::new(standard_probe()))
        .with_sink(Arc::new(exporter.sink()) as Arc<dyn MetricsSink>)
        .build()
        .unwrap();

    let state = AppState::new(Arc::new(orchestrator), Some(Arc::new(exporter)));
    let server = HttpServer::new(ServerConfig::default(), state);
    App {
        router: server.router(),
        backend,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn query_returns_generation() {
    let app = app();
    let (status, body) = send(
        &app.router,
        post_json("/v1/query", json!({ "text": "hello world", "difficulty": 10 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let response: QueryResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.model, "small-local");
    assert_eq!(response.text, "[small-local] hello world");
    assert!(!response.degraded);
    assert!(!response.cached);
    assert_eq!(app.backend.load_calls("small-local"), 1);
}

#[tokio::test]
async fn exhausted_query_is_unavailable() {
    let app = app();
    let (status, body) = send(
        &app.router,
        post_json("/v1/query", json!({ "text": "anything", "model": "large-gpu" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let response: QueryResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.model, "large-gpu");

    app.backend.set_fault("small-local", swap_dev::Fault::Load);
    let (status, body) = send(
        &app.router,
        post_json("/v1/query", json!({ "text": "easy", "difficulty": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"]["category"], "exhausted");
    assert_eq!(error["error"]["tried"], json!(["small-local"]));
}

#[tokio::test]
async fn empty_query_is_bad_request() {
    let app = app();
    let (status, _) = send(&app.router, post_json("/v1/query", json!({ "text": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Missing `text` never reaches the orchestrator
    let (status, _) = send(&app.router, post_json("/v1/query", json!({ "difficulty": 3 }))).await;
    assert!(status.is_client_error());
    assert_eq!(app.backend.total_loads(), 0);
}

#[tokio::test]
async fn models_and_status_reflect_residency() {
    let app = app();
    send(
        &app.router,
        post_json("/v1/query", json!({ "text": "hi", "difficulty": 10 })),
    )
    .await;

    let (status, body) = send(&app.router, get("/v1/models")).await;
    assert_eq!(status, StatusCode::OK);
    let models: Vec<ModelView> = serde_json::from_slice(&body).unwrap();
    assert_eq!(models.len(), 2);
    let small = models.iter().find(|m| m.name == "small-local").unwrap();
    assert!(small.state.is_resident());

    let (status, body) = send(&app.router, get("/v1/status")).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["accepting"], true);
    assert_eq!(report["devices"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn unload_route() {
    let app = app();
    send(
        &app.router,
        post_json("/v1/query", json!({ "text": "hi", "difficulty": 10 })),
    )
    .await;

    let (status, body) = send(&app.router, post_json("/v1/models/small-local/unload", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["unloaded"], true);
    assert_eq!(app.backend.unload_calls("small-local"), 1);

    let (status, _) = send(&app.router, post_json("/v1/models/ghost/unload", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_metrics() {
    let app = app();
    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");

    send(
        &app.router,
        post_json("/v1/query", json!({ "text": "count me", "difficulty": 10 })),
    )
    .await;
    let (status, body) = send(&app.router, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("vramswap_queries_total{model=\"small-local\",outcome=\"success\"} 1"));
    assert!(text.contains("vramswap_model_loads_total"));
}
