use std::sync::Arc;

use crate::cache::CacheStatsSnapshot;
use crate::dto::trip_dto::ApiResponse;
use crate::services::{HealthReport, ReconcileOutcome, SyncEngine};
use crate::utils::errors::{AppError, AppResult};

pub struct OpsController {
    engine: Arc<SyncEngine>,
}

impl OpsController {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    pub async fn health(&self) -> HealthReport {
        self.engine.health_check().await
    }

    pub async fn cache_stats(&self) -> CacheStatsSnapshot {
        self.engine.get_cache_stats().await
    }

    pub async fn clear_cache(&self) -> ApiResponse<usize> {
        let removed = self.engine.clear_cache().await;
        ApiResponse::success_with_message(removed, "Cache limpiado".to_string())
    }

    /// Reconciliación manual de un vehículo, respetando el circuit breaker
    pub async fn reconcile_vehicle(&self, vehicle_no: &str) -> AppResult<ApiResponse<ReconcileOutcome>> {
        let vehicle_no = vehicle_no.trim();
        if vehicle_no.is_empty() {
            return Err(AppError::BadRequest("vehicle_no is required".to_string()));
        }

        let reconciler = self.engine.reconciler();
        reconciler.breaker().check().await?;

        match reconciler.reconcile_vehicle(vehicle_no).await {
            Ok(outcome) => {
                reconciler.breaker().record_success().await;
                Ok(ApiResponse::success(outcome))
            }
            Err(e) => {
                reconciler.breaker().record_failure().await;
                Err(e)
            }
        }
    }
}
