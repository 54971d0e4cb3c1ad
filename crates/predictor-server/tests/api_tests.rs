//! Integration tests for the prediction server endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use predictor_lib::{
    health::{Component, HealthRegistry},
    ArtifactLoader, BackendKind, CaseRecord, EngineConfig, LoaderSettings, ModelStore, PredictionEngine,
};
use predictor_server::{
    api::{create_router, AppState},
    cases::InMemoryCaseStore,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    _models: TempDir,
}

async fn setup_test_app() -> TestApp {
    let models = TempDir::new().unwrap();
    let loader = Arc::new(ArtifactLoader::new(
        ModelStore::new(models.path()),
        LoaderSettings::default(),
    ));
    let engine = Arc::new(PredictionEngine::new(
        EngineConfig {
            heuristic_seed: Some(42),
            reference_date: NaiveDate::from_ymd_opt(2026, 3, 1),
            ..EngineConfig::default()
        },
        loader,
    ));

    let mut cases = InMemoryCaseStore::new();
    cases.insert("stored-case", CaseRecord::illustrative());

    let state = Arc::new(AppState::new(engine, Arc::new(cases), HealthRegistry::new()));
    TestApp {
        router: create_router(state.clone()),
        state,
        _models: models,
    }
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn assert_prediction_shape(body: &Value) {
    let status = &body["predicted_status"];
    let sum = status["approved"].as_f64().unwrap() + status["rfe"].as_f64().unwrap() + status["denied"].as_f64().unwrap();
    assert!((sum - 1.0).abs() < 1e-6);

    let days = body["estimated_days_remaining"].as_u64().unwrap();
    let interval = body["confidence_interval"].as_array().unwrap();
    assert!(interval[0].as_u64().unwrap() <= days);
    assert!(days <= interval[1].as_u64().unwrap());
    assert_eq!(body["explanation"]["top_factors"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_predict_status_with_case_data() {
    let app = setup_test_app().await;
    let case = serde_json::to_value(CaseRecord::illustrative()).unwrap();

    let (status, body) = send(
        app.router,
        post_json("/api/v1/predict/status", json!({ "case_id": "case-1", "case_data": case })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["case_id"], "case-1");
    assert_eq!(body["model_version"], "v1.0.0-heuristic");
    assert_prediction_shape(&body);
}

#[tokio::test]
async fn test_predict_time_without_case_data() {
    let app = setup_test_app().await;

    let (status, body) = send(
        app.router,
        post_json("/api/v1/predict/processing-time", json!({ "case_id": "unknown-case" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_prediction_shape(&body);
}

#[tokio::test]
async fn test_explain_by_id_uses_case_store() {
    let app = setup_test_app().await;

    let (status, body) = send(app.router, get("/api/v1/predict/explain/stored-case")).await;

    assert_eq!(status, StatusCode::OK);
    let factors = body["top_factors"].as_array().unwrap();
    assert_eq!(factors.len(), 5);
    assert_eq!(factors[0]["feature"], "prior_travel");
    let confidence = body["model_confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
}

#[tokio::test]
async fn test_explain_post() {
    let app = setup_test_app().await;

    let (status, body) = send(app.router, post_json("/api/v1/predict/explain", json!({ "case_id": "c" }))).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["feature_importance"].as_object().unwrap().len() >= 5);
}

#[tokio::test]
async fn test_summary_renders_plain_language() {
    let app = setup_test_app().await;

    let (status, body) = send(app.router, post_json("/api/v1/predict/summary", json!({ "case_id": "c" }))).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["summary"].as_str().unwrap().contains("Estimated processing time"));
    assert_eq!(body["top_factors"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_models_listing_and_active() {
    let app = setup_test_app().await;

    let (status, body) = send(app.router.clone(), get("/api/v1/models")).await;
    assert_eq!(status, StatusCode::OK);
    let listing = body.as_array().unwrap();
    assert_eq!(listing.len(), 3);
    assert!(listing.iter().any(|m| m["type"] == "heuristic" && m["is_active"] == true));
    assert!(listing.iter().any(|m| m["type"] == "baseline" && m["trained"] == false));

    let (status, body) = send(app.router, get("/api/v1/models/active")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "heuristic");
    assert_eq!(body["version"], "v1.0.0-heuristic");
}

#[tokio::test]
async fn test_switch_to_untrained_baseline_is_rejected() {
    let app = setup_test_app().await;

    let (status, body) = send(
        app.router,
        post_json("/api/v1/models/switch", json!({ "model_type": "baseline" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "model_not_trained");
    assert_eq!(app.state.engine.active_kind().await, BackendKind::Heuristic);
}

#[tokio::test]
async fn test_switch_to_unknown_type_is_rejected() {
    let app = setup_test_app().await;

    let (status, body) = send(
        app.router,
        post_json("/api/v1/models/switch", json!({ "model_type": "quantum" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_backend_type");
    assert!(body["error"].as_str().unwrap().contains("quantum"));
}

#[tokio::test]
async fn test_switch_to_neural_serves_pretrained_heads() {
    let app = setup_test_app().await;

    let (status, body) = send(
        app.router.clone(),
        post_json("/api/v1/models/switch", json!({ "model_type": "neural" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "neural");
    assert_eq!(body["version"], "v1.0.0-neural-pretrained");

    let (_, body) = send(
        app.router,
        post_json("/api/v1/predict/status", json!({ "case_id": "stored-case" })),
    )
    .await;
    assert_eq!(body["model_version"], "v1.0.0-neural-pretrained");
    assert_prediction_shape(&body);
}

#[tokio::test]
async fn test_healthz_and_readyz_follow_preload() {
    let app = setup_test_app().await;

    let (status, body) = send(app.router.clone(), get("/readyz")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);

    let handle = app.state.engine.preload_active().await;
    app.state
        .health_registry
        .record_preload(BackendKind::Heuristic, handle.downgrade_reason())
        .await;

    let (status, body) = send(app.router.clone(), get("/readyz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert_eq!(body["serving"], "heuristic");

    let (status, body) = send(app.router, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_unhealthy(Component::ModelStore, "Model directory unreadable")
        .await;

    let (status, body) = send(app.router, get("/healthz")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_engine_metrics() {
    let app = setup_test_app().await;
    send(
        app.router.clone(),
        post_json("/api/v1/predict/status", json!({ "case_id": "case-1" })),
    )
    .await;

    let response = app.router.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("casepred_predictions_total"));
}

#[tokio::test]
async fn test_malformed_body_is_client_error() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(post_json("/api/v1/predict/status", json!({ "case": 1 })))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}
