use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::dto::trip_dto::{
    ApiResponse, BulkWriteRequest, CreateTripRequest, StatusUpdateRequest, UpdateTripRequest,
};
use crate::models::{BulkWriteResult, Trip, TripFilter};
use crate::services::SyncEngine;
use crate::utils::errors::{not_found_error, AppError, AppResult};

pub struct TripController {
    engine: Arc<SyncEngine>,
}

impl TripController {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    pub async fn create(&self, request: CreateTripRequest) -> AppResult<ApiResponse<Trip>> {
        request.validate()?;

        let trip = self.engine.pipeline().create(request.into()).await?;
        Ok(ApiResponse::success_with_message(
            trip,
            "Viaje creado exitosamente".to_string(),
        ))
    }

    pub async fn get_by_id(&self, id: Uuid) -> AppResult<Trip> {
        self.engine
            .pipeline()
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found_error("Trip", &id.to_string()))
    }

    pub async fn update(&self, id: Uuid, request: UpdateTripRequest) -> AppResult<ApiResponse<Trip>> {
        let patch = request.into_patch();
        if patch.is_empty() {
            return Err(AppError::BadRequest("Empty update".to_string()));
        }

        let trip = self
            .engine
            .pipeline()
            .find_one_and_update(&TripFilter::by_id(id), &patch)
            .await?
            .ok_or_else(|| not_found_error("Trip", &id.to_string()))?;

        Ok(ApiResponse::success_with_message(
            trip,
            "Viaje actualizado exitosamente".to_string(),
        ))
    }

    pub async fn append_status(
        &self,
        id: Uuid,
        request: StatusUpdateRequest,
    ) -> AppResult<ApiResponse<Trip>> {
        request.validate()?;

        let patch = request.into_patch(chrono::Utc::now());
        let trip = self
            .engine
            .pipeline()
            .find_one_and_update(&TripFilter::by_id(id), &patch)
            .await?
            .ok_or_else(|| not_found_error("Trip", &id.to_string()))?;

        Ok(ApiResponse::success(trip))
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let deleted = self.engine.pipeline().delete_one(&TripFilter::by_id(id)).await?;
        if deleted == 0 {
            return Err(not_found_error("Trip", &id.to_string()));
        }
        Ok(())
    }

    pub async fn bulk_write(&self, request: BulkWriteRequest) -> AppResult<ApiResponse<BulkWriteResult>> {
        request.validate()?;

        let result = self.engine.pipeline().bulk_write(request.ops).await?;
        Ok(ApiResponse::success_with_message(
            result,
            "Bulk write ejecutado; reconciliación en segundo plano".to_string(),
        ))
    }
}
