//! Fachada del núcleo de reconciliación
//!
//! Cablea repositorios, cache, cola en segundo plano, circuit breaker,
//! reconciliador, actualizador masivo, pipeline y coordinador de transacciones.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheStatsSnapshot, VehicleCache};
use crate::config::SyncConfig;
use crate::database::{ConnectionHealth, ConnectionRegistry, TransactionCoordinator};
use crate::repositories::Stores;
use crate::services::background::{BackgroundQueue, QueueStats};
use crate::services::bulk_vehicle_updater::BulkVehicleUpdater;
use crate::services::circuit_breaker::{BreakerState, BreakerStatus, CircuitBreaker};
use crate::services::driver_assignment::DriverAssignmentService;
use crate::services::driver_status_reconciler::DriverStatusReconciler;
use crate::services::latest_trip::LatestTripService;
use crate::services::trip_pipeline::{ReconciliationHook, TripPipeline};
use crate::utils::clock::{Clock, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub connections: Vec<ConnectionHealth>,
    pub breaker: BreakerStatus,
    pub cache: CacheStatsSnapshot,
    pub background: QueueStats,
}

pub struct SyncEngine {
    stores: Stores,
    registry: Arc<ConnectionRegistry>,
    cache: Arc<VehicleCache>,
    queue: BackgroundQueue,
    reconciler: Arc<DriverStatusReconciler>,
    bulk_updater: Arc<BulkVehicleUpdater>,
    latest: Arc<LatestTripService>,
    pipeline: Arc<TripPipeline>,
    coordinator: Arc<TransactionCoordinator>,
}

impl SyncEngine {
    /// Requiere un runtime de tokio activo (lanza el worker de la cola)
    pub fn new(stores: Stores, registry: Arc<ConnectionRegistry>, config: SyncConfig) -> Self {
        Self::with_clock(stores, registry, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        stores: Stores,
        registry: Arc<ConnectionRegistry>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Arc::new(VehicleCache::new(
            config.cache.clone(),
            stores.vehicles.clone(),
            stores.drivers.clone(),
        ));
        let queue = BackgroundQueue::new(config.background.clone());
        let breaker = Arc::new(CircuitBreaker::new("driver-status", config.breaker.clone()));

        let reconciler = Arc::new(DriverStatusReconciler::new(
            stores.trips.clone(),
            stores.vehicles.clone(),
            cache.clone(),
            breaker,
            clock.clone(),
            config.pipeline.clone(),
            config.bulk.reconcile_concurrency,
        ));
        let latest = Arc::new(LatestTripService::new(
            stores.trips.clone(),
            stores.vehicles.clone(),
            cache.clone(),
        ));
        let bulk_updater = Arc::new(BulkVehicleUpdater::new(
            stores.trips.clone(),
            stores.vehicles.clone(),
            cache.clone(),
            latest.clone(),
            reconciler.clone(),
            queue.clone(),
            config.bulk.clone(),
        ));
        let drivers = Arc::new(DriverAssignmentService::new(
            cache.clone(),
            stores.vehicles.clone(),
            stores.driver_logs.clone(),
            clock.clone(),
            config.pipeline.clone(),
        ));
        let hook = Arc::new(ReconciliationHook::new(
            drivers,
            latest.clone(),
            config.pipeline.clone(),
        ));
        let pipeline = Arc::new(
            TripPipeline::new(stores.trips.clone(), bulk_updater.clone(), queue.clone(), clock)
                .with_hook(hook),
        );
        let coordinator = Arc::new(TransactionCoordinator::new(
            registry.clone(),
            config.retry.clone(),
        ));

        info!(
            connections = ?registry.names(),
            recency_days = config.pipeline.recency_window.num_days(),
            "🚚 Núcleo de reconciliación inicializado"
        );

        Self {
            stores,
            registry,
            cache,
            queue,
            reconciler,
            bulk_updater,
            latest,
            pipeline,
            coordinator,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn pipeline(&self) -> &Arc<TripPipeline> {
        &self.pipeline
    }

    pub fn reconciler(&self) -> &Arc<DriverStatusReconciler> {
        &self.reconciler
    }

    pub fn bulk_updater(&self) -> &Arc<BulkVehicleUpdater> {
        &self.bulk_updater
    }

    pub fn latest_trips(&self) -> &Arc<LatestTripService> {
        &self.latest
    }

    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    pub fn cache(&self) -> &Arc<VehicleCache> {
        &self.cache
    }

    pub fn background(&self) -> &BackgroundQueue {
        &self.queue
    }

    pub async fn health_check(&self) -> HealthReport {
        let connections = self.registry.ping_all().await;
        let breaker = self.reconciler.breaker_status().await;
        let cache = self.cache.stats().await;
        let background = self.queue.stats();

        let status = if connections.iter().any(|c| !c.healthy) {
            HealthStatus::Unhealthy
        } else if breaker.state != BreakerState::Closed || background.dropped > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            connections,
            breaker,
            cache,
            background,
        }
    }

    pub async fn clear_cache(&self) -> usize {
        self.cache.clear().await
    }

    pub async fn get_cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats().await
    }

    /// Espera a que terminen todos los trabajos en segundo plano
    pub async fn flush_background(&self) {
        self.queue.flush().await
    }
}
