//! Utilidades compartidas por los tests de integración
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use tanker_trip_sync::config::database::LOGICAL_CONNECTIONS;
use tanker_trip_sync::config::{BulkUpdateConfig, RetryConfig, SyncConfig};
use tanker_trip_sync::database::transaction::MemoryConnection;
use tanker_trip_sync::database::ConnectionRegistry;
use tanker_trip_sync::models::{
    select_latest, BulkWriteResult, DriverStatus, NewTrip, Trip, TripBulkOp, TripFilter,
    TripPatch, Vehicle,
};
use tanker_trip_sync::repositories::{
    LatestTripUpdate, MemoryStore, Stores, TripRepository, VehicleRepository,
};
use tanker_trip_sync::utils::clock::FixedClock;
use tanker_trip_sync::utils::errors::{AppError, AppResult};
use tanker_trip_sync::SyncEngine;

pub fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

/// Config con reintentos y timeouts cortos para no alargar los tests
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        retry: RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
            max_jitter: Duration::from_millis(1),
        },
        bulk: BulkUpdateConfig {
            write_timeout: Duration::from_millis(200),
            ..BulkUpdateConfig::default()
        },
        ..SyncConfig::default()
    }
}

pub fn new_trip(vehicle_no: &str, start: DateTime<Utc>, driver: Option<&str>) -> NewTrip {
    NewTrip {
        vehicle_no: vehicle_no.to_string(),
        start_date: Some(start),
        start_from: Some("Kandla".to_string()),
        end_to: Some("Mundra".to_string()),
        driver_name: driver.map(str::to_string),
        ..Default::default()
    }
}

pub struct TestEngine {
    pub engine: Arc<SyncEngine>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub connections: Vec<MemoryConnection>,
}

impl TestEngine {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_stores(now, fast_config(), |stores, _| stores)
    }

    /// Permite envolver repositorios (fallos, demoras) antes de cablear el motor
    pub fn with_stores<F>(now: DateTime<Utc>, config: SyncConfig, wrap: F) -> Self
    where
        F: FnOnce(Stores, Arc<MemoryStore>) -> Stores,
    {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(now));
        let (registry, connections) = ConnectionRegistry::memory(LOGICAL_CONNECTIONS);
        let stores = wrap(Stores::memory(store.clone()), store.clone());
        let engine = Arc::new(SyncEngine::with_clock(
            stores,
            Arc::new(registry),
            config,
            clock.clone(),
        ));
        Self {
            engine,
            store,
            clock,
            connections,
        }
    }

    pub async fn vehicle(&self, vehicle_no: &str) -> Vehicle {
        self.store
            .vehicle(vehicle_no)
            .await
            .unwrap_or_else(|| panic!("vehicle {} not seeded", vehicle_no))
    }

    /// Puntero esperado calculado desde cero sobre lo almacenado
    pub async fn expected_latest(&self, vehicle_no: &str) -> Option<Uuid> {
        let trips = self.store.trips_for_vehicle(vehicle_no).await;
        select_latest(&trips).map(|trip| trip.id)
    }

    pub async fn assert_pointer_consistent(&self, vehicle_no: &str) {
        let vehicle = self.vehicle(vehicle_no).await;
        assert_eq!(
            vehicle.latest_trip_id(),
            self.expected_latest(vehicle_no).await,
            "latest trip pointer out of sync for {}",
            vehicle_no
        );
    }

    /// Verifica que los viajes de cada día calendario tienen rangos 0..n únicos
    pub async fn assert_ranks_contiguous(&self, vehicle_no: &str) {
        let trips = self.store.trips_for_vehicle(vehicle_no).await;
        let mut days: std::collections::BTreeMap<chrono::NaiveDate, Vec<i32>> =
            std::collections::BTreeMap::new();
        for trip in trips.iter().filter(|t| t.start_date.is_some()) {
            let day = trip.start_date.unwrap().date_naive();
            days.entry(day).or_default().push(trip.rank_index);
        }
        for (day, mut ranks) in days {
            ranks.sort();
            let expected: Vec<i32> = (0..ranks.len() as i32).collect();
            assert_eq!(ranks, expected, "ranks of {} on {}", vehicle_no, day);
        }
    }
}

/// `VehicleRepository` que delega en memoria salvo en la escritura masiva
pub struct FaultyVehicles {
    inner: Arc<MemoryStore>,
    pub fail_bulk: AtomicBool,
    pub bulk_delay: Option<Duration>,
    pub bulk_gate: Option<Arc<Semaphore>>,
    pub bulk_calls: AtomicU32,
}

impl FaultyVehicles {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_bulk: AtomicBool::new(false),
            bulk_delay: None,
            bulk_gate: None,
            bulk_calls: AtomicU32::new(0),
        }
    }

    pub fn failing(inner: Arc<MemoryStore>) -> Self {
        let repo = Self::new(inner);
        repo.fail_bulk.store(true, Ordering::SeqCst);
        repo
    }
}

#[async_trait]
impl VehicleRepository for FaultyVehicles {
    async fn find_by_number(&self, vehicle_no: &str) -> AppResult<Option<Vehicle>> {
        self.inner.find_by_number(vehicle_no).await
    }

    async fn set_latest_trip(&self, vehicle_no: &str, trip_id: Option<Uuid>) -> AppResult<bool> {
        self.inner.set_latest_trip(vehicle_no, trip_id).await
    }

    async fn set_driver(&self, vehicle_no: &str, driver: &str) -> AppResult<bool> {
        self.inner.set_driver(vehicle_no, driver).await
    }

    async fn bulk_set_latest_trips(&self, updates: &[LatestTripUpdate]) -> AppResult<u64> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.bulk_gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
        }
        if let Some(delay) = self.bulk_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_bulk.load(Ordering::SeqCst) {
            return Err(AppError::Internal("bulk write rejected".to_string()));
        }
        self.inner.bulk_set_latest_trips(updates).await
    }
}

/// `TripRepository` cuyas lecturas de "latest" fallan para ciertos vehículos;
/// las altas pueden demorarse o fallar
pub struct FaultyTrips {
    inner: Arc<MemoryStore>,
    failing: std::sync::Mutex<BTreeSet<String>>,
    pub latest_calls: AtomicU32,
    pub latest_delay: Option<Duration>,
    pub insert_delay: Option<Duration>,
    pub fail_insert: AtomicBool,
}

impl FaultyTrips {
    pub fn new<I, S>(inner: Arc<MemoryStore>, failing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner,
            failing: std::sync::Mutex::new(failing.into_iter().map(Into::into).collect()),
            latest_calls: AtomicU32::new(0),
            latest_delay: None,
            insert_delay: None,
            fail_insert: AtomicBool::new(false),
        }
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn fails(&self, vehicle_no: &str) -> bool {
        self.failing.lock().unwrap().contains(vehicle_no)
    }

    async fn before_insert(&self, trip: &Trip) -> AppResult<()> {
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(AppError::Internal(format!("insert of trip {} rejected", trip.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl TripRepository for FaultyTrips {
    async fn next_trip_number(&self) -> AppResult<i64> {
        self.inner.next_trip_number().await
    }

    async fn insert(&self, trip: &Trip) -> AppResult<()> {
        self.before_insert(trip).await?;
        self.inner.insert(trip).await
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Trip>> {
        self.inner.find_by_id(id).await
    }

    async fn find(&self, filter: &TripFilter, limit: Option<usize>) -> AppResult<Vec<Trip>> {
        self.inner.find(filter, limit).await
    }

    async fn find_dated_by_vehicle(&self, vehicle_no: &str) -> AppResult<Vec<Trip>> {
        self.inner.find_dated_by_vehicle(vehicle_no).await
    }

    async fn latest_for_vehicle(&self, vehicle_no: &str) -> AppResult<Option<Trip>> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.latest_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fails(vehicle_no) {
            return Err(AppError::Internal(format!(
                "timed out reading trips of {}",
                vehicle_no
            )));
        }
        TripRepository::latest_for_vehicle(self.inner.as_ref(), vehicle_no).await
    }

    async fn insert_at_day_head(
        &self,
        trip: &Trip,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> AppResult<u64> {
        self.before_insert(trip).await?;
        self.inner.insert_at_day_head(trip, day_start, day_end).await
    }

    async fn update_by_id(&self, id: Uuid, patch: &TripPatch) -> AppResult<Option<Trip>> {
        self.inner.update_by_id(id, patch).await
    }

    async fn replace(&self, trip: &Trip) -> AppResult<bool> {
        self.inner.replace(trip).await
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> AppResult<u64> {
        self.inner.delete_by_ids(ids).await
    }

    async fn set_driver_status(&self, id: Uuid, status: DriverStatus) -> AppResult<bool> {
        self.inner.set_driver_status(id, status).await
    }

    async fn bulk_write(&self, ops: &[TripBulkOp]) -> AppResult<BulkWriteResult> {
        self.inner.bulk_write(ops).await
    }
}
