//! Asignación de driver al crear un viaje
//!
//! Tres ramas, en orden de prioridad:
//! 1. El viaje trae un driver con nombre: se registra su alta en la bitácora si
//!    no pisa una entrada más reciente, y el vehículo toma ese driver si el viaje
//!    es reciente.
//! 2. El vehículo no tiene driver: "auto-continue" del último driver de la
//!    bitácora si su ausencia ya terminó; si no, el viaje queda sin driver.
//! 3. El vehículo ya tiene driver: el viaje lo hereda.
//!
//! El estado del driver se re-deriva siempre de (viaje, vehículo, bitácora).
//! La decisión se toma antes de insertar el viaje; la bitácora y el vehículo
//! sólo se escriben después de que la inserción tuvo éxito.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::VehicleCache;
use crate::config::PipelineConfig;
use crate::models::{
    within_recency, DriverLog, DriverStatus, JoiningEvent, Trip, Vehicle, NO_DRIVER,
};
use crate::repositories::{DriverLogRepository, VehicleRepository};
use crate::utils::clock::Clock;
use crate::utils::errors::AppResult;

/// Resultado de la resolución, útil para logs y tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverDecision {
    Named {
        driver: String,
        log_created: bool,
        vehicle_updated: bool,
    },
    AutoContinued {
        driver: String,
    },
    InheritedFromVehicle {
        driver: String,
    },
    NoDriver,
    /// Sin fecha de inicio no hay nada que resolver
    Skipped,
}

/// `true` si una nueva alta con fecha `start` no retrocede sobre la entrada previa
pub fn should_create_joining(prior: Option<&DriverLog>, start: DateTime<Utc>) -> bool {
    let Some(log) = prior else {
        return true;
    };
    match (&log.leaving, &log.joining) {
        (Some(leaving), _) => leaving.from <= start,
        (None, Some(joining)) => joining.date < start,
        (None, None) => true,
    }
}

/// Decisión tomada antes de insertar y escrituras pendientes hasta que el
/// viaje quede persistido
#[derive(Debug, Clone, PartialEq)]
pub struct DriverPlan {
    pub decision: DriverDecision,
    pub joining: Option<DriverLog>,
    pub vehicle_driver: Option<String>,
}

impl DriverPlan {
    fn new(decision: DriverDecision) -> Self {
        Self {
            decision,
            joining: None,
            vehicle_driver: None,
        }
    }
}

pub struct DriverAssignmentService {
    cache: Arc<VehicleCache>,
    vehicles: Arc<dyn VehicleRepository>,
    driver_logs: Arc<dyn DriverLogRepository>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl DriverAssignmentService {
    pub fn new(
        cache: Arc<VehicleCache>,
        vehicles: Arc<dyn VehicleRepository>,
        driver_logs: Arc<dyn DriverLogRepository>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            cache,
            vehicles,
            driver_logs,
            clock,
            config,
        }
    }

    /// Decide el driver del viaje antes de persistirlo; muta `trip` y sólo lee.
    /// Las escrituras derivadas quedan en el plan para `apply`.
    pub async fn plan(&self, trip: &mut Trip) -> AppResult<DriverPlan> {
        let Some(start) = trip.start_date else {
            return Ok(DriverPlan::new(DriverDecision::Skipped));
        };
        let recent = within_recency(start, self.clock.now(), self.config.recency_window);

        if trip.has_named_driver() {
            return self.plan_named(trip, start, recent).await;
        }

        let Some(vehicle) = self.cache.get_vehicle(&trip.vehicle_no).await? else {
            warn!(vehicle_no = %trip.vehicle_no, trip_id = %trip.id, "⚠️ Vehículo no encontrado para el viaje");
            mark_no_driver(trip);
            return Ok(DriverPlan::new(DriverDecision::NoDriver));
        };

        match vehicle.current_driver() {
            Some(driver) => {
                trip.driver_name = driver.to_string();
                trip.driver_status = DriverStatus::Present;
                Ok(DriverPlan::new(DriverDecision::InheritedFromVehicle {
                    driver: driver.to_string(),
                }))
            }
            None => self.plan_auto_continue(trip, start, recent).await,
        }
    }

    /// Aplica las escrituras del plan una vez persistido el viaje
    pub async fn apply(&self, trip: &Trip, plan: &DriverPlan) -> AppResult<()> {
        if let Some(log) = &plan.joining {
            self.driver_logs.create(log).await?;
            info!(vehicle_no = %trip.vehicle_no, driver = %log.driver_name, "📝 Alta de driver registrada");
        }
        if let Some(driver) = &plan.vehicle_driver {
            self.vehicles.set_driver(&trip.vehicle_no, driver).await?;
            self.cache.invalidate_vehicle(&trip.vehicle_no).await;
        }
        if let DriverDecision::AutoContinued { driver } = &plan.decision {
            info!(vehicle_no = %trip.vehicle_no, driver = %driver, "🔁 Auto-continue del driver tras su ausencia");
        }
        Ok(())
    }

    async fn plan_named(
        &self,
        trip: &mut Trip,
        start: DateTime<Utc>,
        recent: bool,
    ) -> AppResult<DriverPlan> {
        let driver_name = trip.driver_name.clone();
        let mut joining = None;

        match self.cache.get_driver(&driver_name).await? {
            Some(driver) => {
                let prior = self.driver_logs.latest_joining_for_driver(driver.id).await?;
                if should_create_joining(prior.as_ref(), start) {
                    joining = Some(DriverLog::joining(
                        trip.vehicle_no.clone(),
                        driver.id,
                        driver.name.clone(),
                        joining_for(trip, start, "Assigned on trip creation"),
                        self.clock.now(),
                    ));
                } else {
                    debug!(
                        vehicle_no = %trip.vehicle_no,
                        driver = %driver.name,
                        "Bitácora más reciente que el viaje, sin nueva alta"
                    );
                }
            }
            None => {
                warn!(
                    vehicle_no = %trip.vehicle_no,
                    trip_id = %trip.id,
                    driver = %driver_name,
                    "⚠️ Driver no encontrado, no se registra alta"
                );
            }
        }

        let vehicle_driver = if recent {
            self.vehicle_driver_change(&trip.vehicle_no, &driver_name).await?
        } else {
            debug!(vehicle_no = %trip.vehicle_no, "Viaje fuera de la ventana de recencia, vehículo sin tocar");
            None
        };

        trip.driver_status = DriverStatus::Present;
        Ok(DriverPlan {
            decision: DriverDecision::Named {
                driver: driver_name,
                log_created: joining.is_some(),
                vehicle_updated: vehicle_driver.is_some(),
            },
            joining,
            vehicle_driver,
        })
    }

    async fn plan_auto_continue(
        &self,
        trip: &mut Trip,
        start: DateTime<Utc>,
        recent: bool,
    ) -> AppResult<DriverPlan> {
        let now = self.clock.now();
        let last = self.driver_logs.latest_for_vehicle(&trip.vehicle_no).await?;

        let eligible = last.as_ref().filter(|log| {
            log.leaving.as_ref().map_or(false, |leaving| {
                leaving.till_date.map_or(false, |till| {
                    till <= now && start >= till && start >= leaving.from
                })
            })
        });

        match eligible {
            Some(log) if recent => {
                let continued = DriverLog::joining(
                    trip.vehicle_no.clone(),
                    log.driver_id,
                    log.driver_name.clone(),
                    joining_for(trip, start, "Auto-continued after leave"),
                    now,
                );
                let vehicle_driver = self
                    .vehicle_driver_change(&trip.vehicle_no, &log.driver_name)
                    .await?;

                trip.driver_name = log.driver_name.clone();
                trip.driver_status = DriverStatus::Present;
                Ok(DriverPlan {
                    decision: DriverDecision::AutoContinued {
                        driver: log.driver_name.clone(),
                    },
                    joining: Some(continued),
                    vehicle_driver,
                })
            }
            _ => {
                mark_no_driver(trip);
                Ok(DriverPlan::new(DriverDecision::NoDriver))
            }
        }
    }

    /// `Some(driver)` si el vehículo existe y su driver difiere
    async fn vehicle_driver_change(
        &self,
        vehicle_no: &str,
        driver: &str,
    ) -> AppResult<Option<String>> {
        let Some(vehicle) = self.cache.get_vehicle(vehicle_no).await? else {
            warn!(vehicle_no, "⚠️ Vehículo no encontrado, driver sin actualizar");
            return Ok(None);
        };
        if driver_matches(&vehicle, driver) {
            return Ok(None);
        }
        Ok(Some(driver.to_string()))
    }
}

fn driver_matches(vehicle: &Vehicle, driver: &str) -> bool {
    vehicle.trip_details.driver.as_deref().unwrap_or(NO_DRIVER) == driver
}

fn mark_no_driver(trip: &mut Trip) {
    trip.driver_name = NO_DRIVER.to_string();
    trip.driver_status = DriverStatus::Absent;
}

fn joining_for(trip: &Trip, start: DateTime<Utc>, remark: &str) -> JoiningEvent {
    JoiningEvent {
        date: start,
        odometer: None,
        location: trip.start_from.clone(),
        trip_id: Some(trip.id),
        remark: Some(remark.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LeavingEvent;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn log_joined(day: u32) -> DriverLog {
        DriverLog::joining(
            "GJ-01-AB-1234",
            Uuid::new_v4(),
            "Ramesh",
            JoiningEvent {
                date: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
                odometer: None,
                location: None,
                trip_id: None,
                remark: None,
            },
            Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_first_assignment_always_creates() {
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert!(should_create_joining(None, start));
    }

    #[test]
    fn test_never_backdates_over_newer_joining() {
        let prior = log_joined(12);
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert!(!should_create_joining(Some(&prior), start));
        assert!(should_create_joining(Some(&prior), start + Duration::days(3)));
    }

    #[test]
    fn test_leaving_from_bounds_new_joining() {
        let prior = log_joined(1).with_leaving(LeavingEvent {
            from: Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap(),
            till_date: None,
            location: None,
            remark: None,
        });
        let before_leave = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let after_leave = Utc.with_ymd_and_hms(2024, 1, 21, 0, 0, 0).unwrap();
        assert!(!should_create_joining(Some(&prior), before_leave));
        assert!(should_create_joining(Some(&prior), after_leave));
    }
}
