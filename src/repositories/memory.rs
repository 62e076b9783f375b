//! Almacenamiento en memoria
//!
//! Implementa todos los repositorios sobre un único estado protegido por
//! `RwLock`. Se usa en tests y en ejecuciones locales sin PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    DriverLogRepository, DriverRepository, LatestTripUpdate, TripRepository, VehicleRepository,
};
use crate::models::{
    apply_patch, select_latest, BulkWriteResult, Driver, DriverLog, DriverStatus, Trip,
    TripBulkOp, TripFilter, TripPatch, Vehicle,
};
use crate::utils::errors::{AppError, AppResult};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    trips: BTreeMap<Uuid, Trip>,
    vehicles: BTreeMap<String, Vehicle>,
    driver_logs: Vec<DriverLog>,
    drivers: Vec<Driver>,
    trip_sequence: i64,
}

impl MemoryState {
    fn next_trip_number(&mut self) -> i64 {
        self.trip_sequence += 1;
        self.trip_sequence
    }

    fn matching_ids(&self, filter: &TripFilter, limit: Option<usize>) -> Vec<Uuid> {
        let mut matched: Vec<&Trip> = self.trips.values().filter(|t| filter.matches(t)).collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matched
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|t| t.id)
            .collect()
    }

    fn update(&mut self, id: Uuid, patch: &TripPatch) -> AppResult<Option<Trip>> {
        let Some(current) = self.trips.get(&id) else {
            return Ok(None);
        };
        let mut updated = apply_patch(current, patch)?;
        updated.updated_at = Utc::now();
        self.trips.insert(id, updated.clone());
        Ok(Some(updated))
    }

    fn apply_bulk(&mut self, ops: &[TripBulkOp]) -> AppResult<BulkWriteResult> {
        let mut result = BulkWriteResult::default();
        let now = Utc::now();

        for op in ops {
            match op {
                TripBulkOp::InsertOne { document } => {
                    let number = self.next_trip_number();
                    let trip = Trip::from_new(document.clone(), Uuid::now_v7(), number, now);
                    result.inserted_ids.push(trip.id);
                    self.trips.insert(trip.id, trip);
                }
                TripBulkOp::UpdateOne { filter, update } | TripBulkOp::UpdateMany { filter, update } => {
                    let limit = matches!(op, TripBulkOp::UpdateOne { .. }).then_some(1);
                    for id in self.matching_ids(filter, limit) {
                        result.matched += 1;
                        if self.update(id, update)?.is_some() {
                            result.modified += 1;
                        }
                    }
                }
                TripBulkOp::ReplaceOne { filter, replacement } => {
                    if let Some(id) = self.matching_ids(filter, Some(1)).into_iter().next() {
                        result.matched += 1;
                        if let Some(current) = self.trips.get(&id) {
                            let replaced = current.replaced_with(replacement.clone(), now);
                            self.trips.insert(id, replaced);
                            result.modified += 1;
                        }
                    }
                }
                TripBulkOp::DeleteOne { filter } | TripBulkOp::DeleteMany { filter } => {
                    let limit = matches!(op, TripBulkOp::DeleteOne { .. }).then_some(1);
                    for id in self.matching_ids(filter, limit) {
                        if self.trips.remove(&id).is_some() {
                            result.deleted += 1;
                        }
                    }
                }
            }
        }

        Ok(result)
    }
}

/// Almacenamiento en memoria de viajes, vehículos, drivers y bitácoras
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_vehicle(&self, vehicle: Vehicle) {
        let mut state = self.state.write().await;
        state.vehicles.insert(vehicle.vehicle_no.clone(), vehicle);
    }

    pub async fn insert_driver(&self, driver: Driver) {
        self.state.write().await.drivers.push(driver);
    }

    pub async fn insert_driver_log(&self, log: DriverLog) {
        self.state.write().await.driver_logs.push(log);
    }

    /// Inserta un viaje tal cual, sin pasar por el pipeline
    pub async fn insert_raw_trip(&self, trip: Trip) {
        let mut state = self.state.write().await;
        state.trip_sequence = state.trip_sequence.max(trip.trip_number);
        state.trips.insert(trip.id, trip);
    }

    pub async fn vehicle(&self, vehicle_no: &str) -> Option<Vehicle> {
        self.state.read().await.vehicles.get(vehicle_no).cloned()
    }

    pub async fn trips_for_vehicle(&self, vehicle_no: &str) -> Vec<Trip> {
        let state = self.state.read().await;
        let mut trips: Vec<Trip> = state
            .trips
            .values()
            .filter(|t| t.vehicle_no == vehicle_no)
            .cloned()
            .collect();
        trips.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        trips
    }

    pub async fn driver_logs(&self) -> Vec<DriverLog> {
        self.state.read().await.driver_logs.clone()
    }
}

#[async_trait]
impl TripRepository for MemoryStore {
    async fn next_trip_number(&self) -> AppResult<i64> {
        Ok(self.state.write().await.next_trip_number())
    }

    async fn insert(&self, trip: &Trip) -> AppResult<()> {
        self.state.write().await.trips.insert(trip.id, trip.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Trip>> {
        Ok(self.state.read().await.trips.get(&id).cloned())
    }

    async fn find(&self, filter: &TripFilter, limit: Option<usize>) -> AppResult<Vec<Trip>> {
        let state = self.state.read().await;
        Ok(state
            .matching_ids(filter, limit)
            .into_iter()
            .filter_map(|id| state.trips.get(&id).cloned())
            .collect())
    }

    async fn find_dated_by_vehicle(&self, vehicle_no: &str) -> AppResult<Vec<Trip>> {
        let state = self.state.read().await;
        Ok(state
            .trips
            .values()
            .filter(|t| t.vehicle_no == vehicle_no && t.start_date.is_some())
            .cloned()
            .collect())
    }

    async fn latest_for_vehicle(&self, vehicle_no: &str) -> AppResult<Option<Trip>> {
        let state = self.state.read().await;
        Ok(select_latest(state.trips.values().filter(|t| t.vehicle_no == vehicle_no)).cloned())
    }

    async fn insert_at_day_head(
        &self,
        trip: &Trip,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut state = self.state.write().await;
        if state.trips.contains_key(&trip.id) {
            return Err(AppError::Conflict(format!("Trip {} already exists", trip.id)));
        }
        let mut shifted = 0;
        for sibling in state.trips.values_mut() {
            let same_day = sibling
                .start_date
                .map_or(false, |start| start >= day_start && start < day_end);
            if sibling.vehicle_no == trip.vehicle_no && same_day {
                sibling.rank_index += 1;
                shifted += 1;
            }
        }
        let mut stored = trip.clone();
        stored.rank_index = 0;
        state.trips.insert(stored.id, stored);
        Ok(shifted)
    }

    async fn update_by_id(&self, id: Uuid, patch: &TripPatch) -> AppResult<Option<Trip>> {
        self.state.write().await.update(id, patch)
    }

    async fn replace(&self, trip: &Trip) -> AppResult<bool> {
        let mut state = self.state.write().await;
        if !state.trips.contains_key(&trip.id) {
            return Ok(false);
        }
        let mut stored = trip.clone();
        stored.updated_at = Utc::now();
        state.trips.insert(trip.id, stored);
        Ok(true)
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> AppResult<u64> {
        let mut state = self.state.write().await;
        Ok(ids.iter().filter(|id| state.trips.remove(id).is_some()).count() as u64)
    }

    async fn set_driver_status(&self, id: Uuid, status: DriverStatus) -> AppResult<bool> {
        let mut state = self.state.write().await;
        match state.trips.get_mut(&id) {
            Some(trip) => {
                trip.driver_status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn bulk_write(&self, ops: &[TripBulkOp]) -> AppResult<BulkWriteResult> {
        let mut state = self.state.write().await;
        // Se trabaja sobre una copia para que un error deje el estado intacto
        let mut staged = state.clone();
        let result = staged.apply_bulk(ops)?;
        *state = staged;
        Ok(result)
    }
}

#[async_trait]
impl VehicleRepository for MemoryStore {
    async fn find_by_number(&self, vehicle_no: &str) -> AppResult<Option<Vehicle>> {
        Ok(self.vehicle(vehicle_no).await)
    }

    async fn set_latest_trip(&self, vehicle_no: &str, trip_id: Option<Uuid>) -> AppResult<bool> {
        let mut state = self.state.write().await;
        match state.vehicles.get_mut(vehicle_no) {
            Some(vehicle) => {
                vehicle.trip_details.id = trip_id;
                vehicle.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_driver(&self, vehicle_no: &str, driver: &str) -> AppResult<bool> {
        let mut state = self.state.write().await;
        match state.vehicles.get_mut(vehicle_no) {
            Some(vehicle) => {
                vehicle.trip_details.driver = Some(driver.to_string());
                vehicle.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn bulk_set_latest_trips(&self, updates: &[LatestTripUpdate]) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut modified = 0;
        for update in updates {
            if let Some(vehicle) = state.vehicles.get_mut(&update.vehicle_no) {
                vehicle.trip_details.id = update.trip_id;
                vehicle.updated_at = now;
                modified += 1;
            }
        }
        Ok(modified)
    }
}

#[async_trait]
impl DriverLogRepository for MemoryStore {
    async fn latest_joining_for_driver(&self, driver_id: Uuid) -> AppResult<Option<DriverLog>> {
        let state = self.state.read().await;
        Ok(state
            .driver_logs
            .iter()
            .filter(|log| log.driver_id == driver_id && log.joining.is_some())
            .max_by_key(|log| (log.created_at, log.id))
            .cloned())
    }

    async fn latest_for_vehicle(&self, vehicle_no: &str) -> AppResult<Option<DriverLog>> {
        let state = self.state.read().await;
        Ok(state
            .driver_logs
            .iter()
            .filter(|log| log.vehicle_no == vehicle_no)
            .max_by_key(|log| (log.created_at, log.id))
            .cloned())
    }

    async fn create(&self, log: &DriverLog) -> AppResult<()> {
        self.state.write().await.driver_logs.push(log.clone());
        Ok(())
    }
}

#[async_trait]
impl DriverRepository for MemoryStore {
    async fn find_by_name_or_code(&self, name_or_code: &str) -> AppResult<Option<Driver>> {
        let state = self.state.read().await;
        Ok(state.drivers.iter().find(|d| d.matches(name_or_code)).cloned())
    }
}
