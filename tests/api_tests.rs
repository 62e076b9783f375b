mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{at, TestEngine};
use tanker_trip_sync::config::{EnvironmentConfig, StorageBackend};
use tanker_trip_sync::models::Vehicle;
use tanker_trip_sync::routes::create_router;
use tanker_trip_sync::state::AppState;

fn create_test_app(t: &TestEngine) -> Router {
    let config = EnvironmentConfig {
        environment: "test".to_string(),
        port: 0,
        host: "127.0.0.1".to_string(),
        log_level: "debug".to_string(),
        storage_backend: StorageBackend::Memory,
        cors_origins: vec!["*".to_string()],
    };
    create_router(AppState::new(t.engine.clone(), config))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_health_check() {
    let t = TestEngine::new(at(2024, 6, 1, 12));
    let app = create_test_app(&t);

    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["breaker"]["state"], "closed");
    assert_eq!(body["connections"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_health_check_unhealthy_connection() {
    let t = TestEngine::new(at(2024, 6, 1, 12));
    t.connections[1].set_offline(true);
    let app = create_test_app(&t);

    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn test_trip_lifecycle() {
    let t = TestEngine::new(at(2024, 6, 1, 12));
    t.store.insert_vehicle(Vehicle::new("GJ-01-AB-1234")).await;
    let app = create_test_app(&t);

    let (status, body) = send(
        &app,
        "POST",
        "/api/trips",
        Some(json!({
            "vehicle_no": "GJ-01-AB-1234",
            "start_date": "2024-05-31T06:00:00Z",
            "start_from": "Kandla",
            "end_to": "Mundra"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["rank_index"], 0);
    assert_eq!(
        t.vehicle("GJ-01-AB-1234").await.latest_trip_id().map(|id| id.to_string()),
        Some(id.clone())
    );

    let (status, body) = send(&app, "GET", &format!("/api/trips/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vehicle_no"], "GJ-01-AB-1234");

    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/api/trips/{}", id),
        Some(json!({ "set": { "end_to": "Hazira" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["end_to"], "Hazira");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/trips/{}/status", id),
        Some(json!({ "status": "loaded", "location": "Kandla port" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status_updates"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["travel_history"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, "DELETE", &format!("/api/trips/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.vehicle("GJ-01-AB-1234").await.latest_trip_id(), None);

    let (status, body) = send(&app, "GET", &format!("/api/trips/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_create_trip_validation() {
    let t = TestEngine::new(at(2024, 6, 1, 12));
    let app = create_test_app(&t);

    let (status, body) = send(&app, "POST", "/api/trips", Some(json!({ "vehicle_no": "" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_update_rejects_empty_and_immutable_changes() {
    let t = TestEngine::new(at(2024, 6, 1, 12));
    t.store.insert_vehicle(Vehicle::new("GJ-01-AB-1234")).await;
    let app = create_test_app(&t);
    let (_, body) = send(
        &app,
        "POST",
        "/api/trips",
        Some(json!({ "vehicle_no": "GJ-01-AB-1234", "start_date": "2024-05-31T06:00:00Z" })),
    )
    .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "PATCH", &format!("/api/trips/{}", id), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/api/trips/{}", id),
        Some(json!({ "set": { "created_at": "2020-01-01T00:00:00Z" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_bulk_endpoint_returns_before_reconciliation() {
    let t = TestEngine::new(at(2024, 6, 1, 12));
    t.store.insert_vehicle(Vehicle::new("GJ-01-AB-1234")).await;
    let app = create_test_app(&t);

    let (status, body) = send(
        &app,
        "POST",
        "/api/trips/bulk",
        Some(json!({
            "ops": [
                { "op": "insert_one", "document": { "vehicle_no": "GJ-01-AB-1234", "start_date": "2024-05-30T06:00:00Z" } },
                { "op": "insert_one", "document": { "vehicle_no": "GJ-01-AB-1234", "start_date": "2024-05-31T06:00:00Z" } }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["inserted_ids"].as_array().unwrap().len(), 2);

    t.engine.flush_background().await;
    let latest = body["data"]["inserted_ids"][1].as_str().unwrap().to_string();
    assert_eq!(
        t.vehicle("GJ-01-AB-1234").await.latest_trip_id().map(|id| id.to_string()),
        Some(latest)
    );
}

#[tokio::test]
async fn test_cache_endpoints() {
    let t = TestEngine::new(at(2024, 6, 1, 12));
    t.store.insert_vehicle(Vehicle::new("GJ-01-AB-1234")).await;
    t.engine.cache().get_vehicle("GJ-01-AB-1234").await.unwrap();
    t.engine.cache().get_vehicle("GJ-01-AB-1234").await.unwrap();
    let app = create_test_app(&t);

    let (status, body) = send(&app, "GET", "/api/cache/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vehicles_cached"], 1);
    assert_eq!(body["hits"], 1);
    assert_eq!(body["misses"], 1);

    let (status, body) = send(&app, "POST", "/api/cache/clear", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], 1);

    let (_, body) = send(&app, "GET", "/api/cache/stats", None).await;
    assert_eq!(body["vehicles_cached"], 0);
}

#[tokio::test]
async fn test_reconcile_endpoint() {
    let t = TestEngine::new(at(2024, 6, 1, 12));
    t.store.insert_vehicle(Vehicle::new("GJ-01-AB-1234")).await;
    let app = create_test_app(&t);

    let (status, body) = send(&app, "POST", "/api/vehicles/GJ-01-AB-1234/reconcile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["result"], "no_trip");

    let breaker = t.engine.reconciler().breaker();
    for _ in 0..5 {
        breaker.record_failure().await;
    }
    let (status, body) = send(&app, "POST", "/api/vehicles/GJ-01-AB-1234/reconcile", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "CIRCUIT_OPEN");
}
