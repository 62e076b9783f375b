use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::cache::CacheStatsSnapshot;
use crate::controllers::OpsController;
use crate::dto::trip_dto::ApiResponse;
use crate::services::{HealthReport, HealthStatus, ReconcileOutcome};
use crate::state::AppState;
use crate::utils::errors::AppError;

pub fn create_ops_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache/clear", post(clear_cache))
        .route("/api/vehicles/:vehicle_no/reconcile", post(reconcile_vehicle))
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = OpsController::new(state.engine.clone()).health().await;
    let status = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(report))
}

async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsSnapshot> {
    Json(OpsController::new(state.engine.clone()).cache_stats().await)
}

async fn clear_cache(State(state): State<AppState>) -> Json<ApiResponse<usize>> {
    Json(OpsController::new(state.engine.clone()).clear_cache().await)
}

async fn reconcile_vehicle(
    State(state): State<AppState>,
    Path(vehicle_no): Path<String>,
) -> Result<Json<ApiResponse<ReconcileOutcome>>, AppError> {
    let controller = OpsController::new(state.engine.clone());
    let response = controller.reconcile_vehicle(&vehicle_no).await?;
    Ok(Json(response))
}
