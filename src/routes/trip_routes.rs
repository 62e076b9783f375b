use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::controllers::TripController;
use crate::dto::trip_dto::{
    ApiResponse, BulkWriteRequest, CreateTripRequest, StatusUpdateRequest, UpdateTripRequest,
};
use crate::models::{BulkWriteResult, Trip};
use crate::state::AppState;
use crate::utils::errors::AppError;

pub fn create_trip_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_trip))
        .route("/bulk", post(bulk_write))
        .route("/:id", get(get_trip).patch(update_trip).delete(delete_trip))
        .route("/:id/status", post(append_status))
}

async fn create_trip(
    State(state): State<AppState>,
    Json(request): Json<CreateTripRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Trip>>), AppError> {
    let controller = TripController::new(state.engine.clone());
    let response = controller.create(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_trip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Trip>, AppError> {
    let controller = TripController::new(state.engine.clone());
    let trip = controller.get_by_id(id).await?;
    Ok(Json(trip))
}

async fn update_trip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTripRequest>,
) -> Result<Json<ApiResponse<Trip>>, AppError> {
    let controller = TripController::new(state.engine.clone());
    let response = controller.update(id, request).await?;
    Ok(Json(response))
}

async fn append_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<ApiResponse<Trip>>, AppError> {
    let controller = TripController::new(state.engine.clone());
    let response = controller.append_status(id, request).await?;
    Ok(Json(response))
}

async fn delete_trip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let controller = TripController::new(state.engine.clone());
    controller.delete(id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Viaje eliminado exitosamente"
    })))
}

async fn bulk_write(
    State(state): State<AppState>,
    Json(request): Json<BulkWriteRequest>,
) -> Result<Json<ApiResponse<BulkWriteResult>>, AppError> {
    let controller = TripController::new(state.engine.clone());
    let response = controller.bulk_write(request).await?;
    Ok(Json(response))
}
