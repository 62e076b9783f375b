//! Reconciliador del estado de driver
//!
//! Pasada de verificación en segundo plano: compara el driver del vehículo con
//! el de su último viaje. Gana el viaje, salvo que sea más viejo que la ventana
//! de recencia. También corrige el `driver_status` del propio viaje.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::VehicleCache;
use crate::config::PipelineConfig;
use crate::models::{within_recency, DriverStatus, NO_DRIVER};
use crate::repositories::{TripRepository, VehicleRepository};
use crate::services::circuit_breaker::{BreakerStatus, CircuitBreaker};
use crate::utils::clock::Clock;
use crate::utils::errors::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    InSync {
        trip_id: Uuid,
    },
    Corrected {
        trip_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        vehicle_driver: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        trip_status: Option<DriverStatus>,
    },
    NoTrip,
    VehicleMissing,
}

/// Resumen de una pasada sobre varios vehículos
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub total: usize,
    pub in_sync: usize,
    pub corrected: usize,
    pub no_trip: usize,
    pub vehicle_missing: usize,
    /// (vehículo, error)
    pub failed: Vec<(String, String)>,
    /// No intentados porque el circuito estaba abierto
    pub skipped: Vec<String>,
    pub degraded: bool,
}

impl ReconcileReport {
    fn record(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::InSync { .. } => self.in_sync += 1,
            ReconcileOutcome::Corrected { .. } => self.corrected += 1,
            ReconcileOutcome::NoTrip => self.no_trip += 1,
            ReconcileOutcome::VehicleMissing => self.vehicle_missing += 1,
        }
    }
}

enum VehicleResult {
    Done(ReconcileOutcome),
    Failed(String),
    Skipped,
}

pub struct DriverStatusReconciler {
    trips: Arc<dyn TripRepository>,
    vehicles: Arc<dyn VehicleRepository>,
    cache: Arc<VehicleCache>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    concurrency: usize,
}

impl DriverStatusReconciler {
    pub fn new(
        trips: Arc<dyn TripRepository>,
        vehicles: Arc<dyn VehicleRepository>,
        cache: Arc<VehicleCache>,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            trips,
            vehicles,
            cache,
            breaker,
            clock,
            config,
            concurrency: concurrency.max(1),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn breaker_status(&self) -> BreakerStatus {
        self.breaker.status().await
    }

    /// Reconcilia un vehículo leyendo directamente del almacenamiento
    pub async fn reconcile_vehicle(&self, vehicle_no: &str) -> AppResult<ReconcileOutcome> {
        let Some(trip) = self.trips.latest_for_vehicle(vehicle_no).await? else {
            debug!(vehicle_no, "Sin viajes con fecha, nada que reconciliar");
            return Ok(ReconcileOutcome::NoTrip);
        };
        let Some(vehicle) = self.vehicles.find_by_number(vehicle_no).await? else {
            warn!(vehicle_no, "⚠️ Vehículo no encontrado durante la reconciliación");
            return Ok(ReconcileOutcome::VehicleMissing);
        };

        let resolved = if trip.has_named_driver() {
            trip.driver_name.as_str()
        } else {
            NO_DRIVER
        };

        let current = vehicle.trip_details.driver.as_deref().unwrap_or(NO_DRIVER);
        let recent = trip
            .start_date
            .map(|start| within_recency(start, self.clock.now(), self.config.recency_window))
            .unwrap_or(false);

        let mut vehicle_driver = None;
        if current != resolved {
            if recent {
                self.vehicles.set_driver(vehicle_no, resolved).await?;
                self.cache.invalidate_vehicle(vehicle_no).await;
                info!(
                    vehicle_no,
                    trip_id = %trip.id,
                    from = current,
                    to = resolved,
                    "🔧 Driver del vehículo corregido"
                );
                vehicle_driver = Some(resolved.to_string());
            } else {
                debug!(
                    vehicle_no,
                    trip_id = %trip.id,
                    "Último viaje fuera de la ventana de recencia, driver del vehículo intacto"
                );
            }
        }

        let expected = DriverStatus::for_driver(resolved);
        let mut trip_status = None;
        if trip.driver_status != expected {
            self.trips.set_driver_status(trip.id, expected).await?;
            trip_status = Some(expected);
            debug!(vehicle_no, trip_id = %trip.id, status = ?expected, "driver_status del viaje corregido");
        }

        if vehicle_driver.is_none() && trip_status.is_none() {
            return Ok(ReconcileOutcome::InSync { trip_id: trip.id });
        }
        Ok(ReconcileOutcome::Corrected {
            trip_id: trip.id,
            vehicle_driver,
            trip_status,
        })
    }

    /// Pasada sobre varios vehículos bajo el circuit breaker
    ///
    /// Cada vehículo falla de forma aislada. Con el circuito abierto el resto
    /// del lote se omite y el reporte queda `degraded`; en half-open sólo el
    /// vehículo que hace de llamada de prueba se reconcilia.
    pub async fn reconcile_many(&self, vehicle_nos: &[String]) -> ReconcileReport {
        let mut report = ReconcileReport {
            total: vehicle_nos.len(),
            ..Default::default()
        };

        if self.breaker.is_open().await {
            warn!(vehicles = vehicle_nos.len(), "🔴 Reconciliación omitida: circuito abierto");
            report.skipped = vehicle_nos.to_vec();
            report.degraded = true;
            return report;
        }

        let results: Vec<(String, VehicleResult)> = stream::iter(vehicle_nos.iter().cloned())
            .map(|vehicle_no| async move {
                let result = self.reconcile_guarded(&vehicle_no).await;
                (vehicle_no, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (vehicle_no, result) in results {
            match result {
                VehicleResult::Done(outcome) => report.record(&outcome),
                VehicleResult::Failed(error) => report.failed.push((vehicle_no, error)),
                VehicleResult::Skipped => report.skipped.push(vehicle_no),
            }
        }
        report.degraded = !report.skipped.is_empty() || self.breaker.is_open().await;

        info!(
            total = report.total,
            corrected = report.corrected,
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "🧭 Reconciliación de drivers completada"
        );
        report
    }

    async fn reconcile_guarded(&self, vehicle_no: &str) -> VehicleResult {
        if self.breaker.check().await.is_err() {
            return VehicleResult::Skipped;
        }
        match self.reconcile_vehicle(vehicle_no).await {
            Ok(outcome) => {
                self.breaker.record_success().await;
                VehicleResult::Done(outcome)
            }
            Err(e) => {
                self.breaker.record_failure().await;
                warn!(vehicle_no, "❌ Error reconciliando driver: {}", e);
                VehicleResult::Failed(e.to_string())
            }
        }
    }
}
