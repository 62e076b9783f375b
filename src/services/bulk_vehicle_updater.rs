//! Actualizador masivo del puntero "latest trip"
//!
//! Lee el último viaje real de cada vehículo (sin cache) con concurrencia
//! acotada, arma una sola escritura no ordenada y la ejecuta con timeout. Si
//! algo falla en esa fase, recalcula vehículo por vehículo para no dejar
//! ninguno sin reconciliar. Al final encola la reconciliación de drivers.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::VehicleCache;
use crate::config::BulkUpdateConfig;
use crate::repositories::{LatestTripUpdate, TripRepository, VehicleRepository};
use crate::services::background::BackgroundQueue;
use crate::services::driver_status_reconciler::DriverStatusReconciler;
use crate::services::latest_trip::{LatestTripService, TripOverlay};
use crate::utils::errors::{AppError, AppResult};
use crate::utils::timeout::with_timeout;

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkUpdateReport {
    pub vehicles: usize,
    pub modified: u64,
    /// `true` si se usó el recálculo vehículo por vehículo
    pub fallback: bool,
    /// Vehículos que fallaron también en el fallback
    pub failed: Vec<String>,
    pub reconcile_scheduled: bool,
}

pub struct BulkVehicleUpdater {
    trips: Arc<dyn TripRepository>,
    vehicles: Arc<dyn VehicleRepository>,
    cache: Arc<VehicleCache>,
    latest: Arc<LatestTripService>,
    reconciler: Arc<DriverStatusReconciler>,
    queue: BackgroundQueue,
    config: BulkUpdateConfig,
}

impl BulkVehicleUpdater {
    pub fn new(
        trips: Arc<dyn TripRepository>,
        vehicles: Arc<dyn VehicleRepository>,
        cache: Arc<VehicleCache>,
        latest: Arc<LatestTripService>,
        reconciler: Arc<DriverStatusReconciler>,
        queue: BackgroundQueue,
        config: BulkUpdateConfig,
    ) -> Self {
        Self {
            trips,
            vehicles,
            cache,
            latest,
            reconciler,
            queue,
            config,
        }
    }

    pub async fn update_vehicles(&self, vehicle_nos: &[String]) -> BulkUpdateReport {
        let mut report = BulkUpdateReport {
            vehicles: vehicle_nos.len(),
            ..Default::default()
        };
        if vehicle_nos.is_empty() {
            return report;
        }

        match self.batch_update(vehicle_nos).await {
            Ok(modified) => {
                report.modified = modified;
                info!(
                    vehicles = vehicle_nos.len(),
                    modified,
                    "📦 Punteros latest trip actualizados en lote"
                );
            }
            Err(e) => {
                warn!(
                    vehicles = vehicle_nos.len(),
                    "⚠️ Escritura en lote falló, recalculando por vehículo: {}", e
                );
                report.fallback = true;
                report.failed = self
                    .latest
                    .refresh_each(vehicle_nos, &TripOverlay::default())
                    .await;
                if !report.failed.is_empty() {
                    warn!(failed = ?report.failed, "❌ Vehículos sin reconciliar tras el fallback");
                }
            }
        }

        self.cache.invalidate_vehicles(vehicle_nos).await;
        report.reconcile_scheduled = self.schedule_reconcile(vehicle_nos);
        report
    }

    async fn batch_update(&self, vehicle_nos: &[String]) -> AppResult<u64> {
        let updates: Vec<LatestTripUpdate> = stream::iter(vehicle_nos.iter().cloned())
            .map(|vehicle_no| async move {
                let latest = self.trips.latest_for_vehicle(&vehicle_no).await?;
                Ok::<_, AppError>(LatestTripUpdate {
                    vehicle_no,
                    trip_id: latest.map(|trip| trip.id),
                })
            })
            .buffer_unordered(self.config.fetch_concurrency.max(1))
            .try_collect()
            .await?;

        with_timeout(
            self.config.write_timeout,
            self.vehicles.bulk_set_latest_trips(&updates),
        )
        .await
    }

    fn schedule_reconcile(&self, vehicle_nos: &[String]) -> bool {
        let reconciler = self.reconciler.clone();
        let vehicle_nos = vehicle_nos.to_vec();
        self.queue.submit("driver-status-reconcile", async move {
            reconciler.reconcile_many(&vehicle_nos).await;
        })
    }
}
