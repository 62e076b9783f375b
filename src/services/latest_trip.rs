//! Mantenimiento del puntero "latest trip"
//!
//! `vehicle.trip_details.id` se re-deriva siempre desde el almacenamiento, nunca
//! desde el cache. El overlay permite mezclar el estado final del documento que
//! se acaba de escribir antes de que sea legible de forma durable.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::VehicleCache;
use crate::models::{select_latest, Trip};
use crate::repositories::{TripRepository, VehicleRepository};
use crate::utils::errors::AppResult;

/// Estado proyectado a mezclar sobre la lectura de la base
#[derive(Debug, Clone, Default)]
pub struct TripOverlay {
    pub upserts: Vec<Trip>,
    pub removed: BTreeSet<Uuid>,
}

impl TripOverlay {
    pub fn upsert(trip: Trip) -> Self {
        Self {
            upserts: vec![trip],
            removed: BTreeSet::new(),
        }
    }

    pub fn removed<I: IntoIterator<Item = Uuid>>(ids: I) -> Self {
        Self {
            upserts: Vec::new(),
            removed: ids.into_iter().collect(),
        }
    }

    /// Viajes del vehículo tras aplicar el overlay
    pub fn merge(&self, vehicle_no: &str, stored: Vec<Trip>) -> Vec<Trip> {
        let mut by_id: BTreeMap<Uuid, Trip> = stored
            .into_iter()
            .filter(|trip| !self.removed.contains(&trip.id))
            .map(|trip| (trip.id, trip))
            .collect();

        for trip in &self.upserts {
            if trip.vehicle_no == vehicle_no {
                by_id.insert(trip.id, trip.clone());
            } else {
                // Se movió a otro vehículo
                by_id.remove(&trip.id);
            }
        }
        by_id.into_values().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerOutcome {
    Updated {
        previous: Option<Uuid>,
        latest: Option<Uuid>,
    },
    Unchanged(Option<Uuid>),
    VehicleMissing,
}

pub struct LatestTripService {
    trips: Arc<dyn TripRepository>,
    vehicles: Arc<dyn VehicleRepository>,
    cache: Arc<VehicleCache>,
}

impl LatestTripService {
    pub fn new(
        trips: Arc<dyn TripRepository>,
        vehicles: Arc<dyn VehicleRepository>,
        cache: Arc<VehicleCache>,
    ) -> Self {
        Self {
            trips,
            vehicles,
            cache,
        }
    }

    /// Re-deriva y persiste el puntero del vehículo
    pub async fn refresh(&self, vehicle_no: &str, overlay: &TripOverlay) -> AppResult<PointerOutcome> {
        let Some(vehicle) = self.vehicles.find_by_number(vehicle_no).await? else {
            warn!(vehicle_no, "⚠️ Vehículo no encontrado, puntero sin actualizar");
            return Ok(PointerOutcome::VehicleMissing);
        };

        let stored = self.trips.find_dated_by_vehicle(vehicle_no).await?;
        let trips = overlay.merge(vehicle_no, stored);
        let latest = select_latest(&trips).map(|trip| trip.id);
        let previous = vehicle.latest_trip_id();

        if previous == latest {
            debug!(vehicle_no, latest = ?latest, "Puntero ya correcto");
            return Ok(PointerOutcome::Unchanged(latest));
        }

        self.vehicles.set_latest_trip(vehicle_no, latest).await?;
        self.cache.invalidate_vehicle(vehicle_no).await;
        info!(
            vehicle_no,
            previous = ?previous,
            latest = ?latest,
            "🔗 Puntero latest trip actualizado"
        );
        Ok(PointerOutcome::Updated { previous, latest })
    }

    /// Refresco secuencial por vehículo; los fallos quedan aislados
    pub async fn refresh_each<'a, I>(&self, vehicle_nos: I, overlay: &TripOverlay) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut failed = Vec::new();
        for vehicle_no in vehicle_nos {
            if let Err(e) = self.refresh(vehicle_no, overlay).await {
                warn!(vehicle_no = %vehicle_no, "❌ Error actualizando puntero: {}", e);
                failed.push(vehicle_no.clone());
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VehicleCacheConfig;
    use crate::models::{NewTrip, Vehicle};
    use crate::repositories::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn trip(vehicle_no: &str, day: u32) -> Trip {
        let start = Utc.with_ymd_and_hms(2024, 1, day, 8, 0, 0).unwrap();
        Trip::from_new(
            NewTrip {
                vehicle_no: vehicle_no.to_string(),
                start_date: Some(start),
                ..Default::default()
            },
            Uuid::now_v7(),
            day as i64,
            start,
        )
    }

    async fn service() -> (Arc<MemoryStore>, LatestTripService) {
        let store = Arc::new(MemoryStore::new());
        store.insert_vehicle(Vehicle::new("GJ-01-AB-1234")).await;
        let cache = Arc::new(VehicleCache::new(
            VehicleCacheConfig::default(),
            store.clone(),
            store.clone(),
        ));
        (
            store.clone(),
            LatestTripService::new(store.clone(), store, cache),
        )
    }

    #[tokio::test]
    async fn test_overlay_trip_becomes_latest_before_it_is_stored() {
        let (store, service) = service().await;
        let stored = trip("GJ-01-AB-1234", 5);
        store.insert_raw_trip(stored.clone()).await;
        let pending = trip("GJ-01-AB-1234", 9);

        let outcome = service
            .refresh("GJ-01-AB-1234", &TripOverlay::upsert(pending.clone()))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PointerOutcome::Updated {
                previous: None,
                latest: Some(pending.id)
            }
        );
        assert_eq!(
            store.vehicle("GJ-01-AB-1234").await.unwrap().latest_trip_id(),
            Some(pending.id)
        );
    }

    #[tokio::test]
    async fn test_removed_trips_are_ignored() {
        let (store, service) = service().await;
        let only = trip("GJ-01-AB-1234", 5);
        store.insert_raw_trip(only.clone()).await;
        service
            .refresh("GJ-01-AB-1234", &TripOverlay::default())
            .await
            .unwrap();

        service
            .refresh("GJ-01-AB-1234", &TripOverlay::removed([only.id]))
            .await
            .unwrap();
        assert_eq!(
            store.vehicle("GJ-01-AB-1234").await.unwrap().latest_trip_id(),
            None
        );
    }

    #[tokio::test]
    async fn test_missing_vehicle_is_skipped() {
        let (_, service) = service().await;
        let outcome = service
            .refresh("MH-12-XX-0000", &TripOverlay::default())
            .await
            .unwrap();
        assert_eq!(outcome, PointerOutcome::VehicleMissing);
    }

    #[test]
    fn test_overlay_drops_trip_moved_to_other_vehicle() {
        let moved = trip("GJ-01-AB-1234", 3);
        let mut relocated = moved.clone();
        relocated.vehicle_no = "GJ-02-CD-5678".to_string();

        let overlay = TripOverlay::upsert(relocated);
        assert!(overlay.merge("GJ-01-AB-1234", vec![moved]).is_empty());
    }
}
