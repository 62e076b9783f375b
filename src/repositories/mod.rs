//! Repositorios
//!
//! Traits de acceso a datos que consume el núcleo de reconciliación, con una
//! implementación en memoria (`MemoryStore`) y otra sobre PostgreSQL.

pub mod driver_log_repository;
pub mod driver_repository;
pub mod memory;
pub mod trip_repository;
pub mod vehicle_repository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    BulkWriteResult, Driver, DriverLog, DriverStatus, Trip, TripBulkOp, TripFilter, TripPatch,
    Vehicle,
};
use crate::utils::errors::AppResult;

pub use driver_log_repository::PgDriverLogRepository;
pub use driver_repository::PgDriverRepository;
pub use memory::MemoryStore;
pub use trip_repository::PgTripRepository;
pub use vehicle_repository::PgVehicleRepository;

#[async_trait]
pub trait TripRepository: Send + Sync {
    /// Siguiente número de viaje legible
    async fn next_trip_number(&self) -> AppResult<i64>;

    async fn insert(&self, trip: &Trip) -> AppResult<()>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Trip>>;

    /// Viajes que cumplen el filtro, en orden de creación
    async fn find(&self, filter: &TripFilter, limit: Option<usize>) -> AppResult<Vec<Trip>>;

    /// Todos los viajes del vehículo con fecha de inicio
    async fn find_dated_by_vehicle(&self, vehicle_no: &str) -> AppResult<Vec<Trip>>;

    /// "Latest" según el orden canónico, leído directamente del almacenamiento
    async fn latest_for_vehicle(&self, vehicle_no: &str) -> AppResult<Option<Trip>>;

    /// Inserta el viaje con `rank_index = 0` e incrementa, en la misma escritura
    /// atómica, el ranking de los viajes del vehículo que arrancan en
    /// [day_start, day_end). Devuelve cuántos se desplazaron.
    async fn insert_at_day_head(
        &self,
        trip: &Trip,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> AppResult<u64>;

    /// Aplica el patch de forma atómica y devuelve el documento resultante
    async fn update_by_id(&self, id: Uuid, patch: &TripPatch) -> AppResult<Option<Trip>>;

    /// Reemplaza el documento completo; `false` si no existía
    async fn replace(&self, trip: &Trip) -> AppResult<bool>;

    async fn delete_by_ids(&self, ids: &[Uuid]) -> AppResult<u64>;

    async fn set_driver_status(&self, id: Uuid, status: DriverStatus) -> AppResult<bool>;

    /// Ejecuta las operaciones en orden, todo o nada, sin hooks
    async fn bulk_write(&self, ops: &[TripBulkOp]) -> AppResult<BulkWriteResult>;
}

/// Nuevo valor de `trip_details.id` para un vehículo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestTripUpdate {
    pub vehicle_no: String,
    pub trip_id: Option<Uuid>,
}

#[async_trait]
pub trait VehicleRepository: Send + Sync {
    async fn find_by_number(&self, vehicle_no: &str) -> AppResult<Option<Vehicle>>;

    /// Fija (o elimina con `None`) el puntero al último viaje; `false` si no existe el vehículo
    async fn set_latest_trip(&self, vehicle_no: &str, trip_id: Option<Uuid>) -> AppResult<bool>;

    async fn set_driver(&self, vehicle_no: &str, driver: &str) -> AppResult<bool>;

    /// Una sola escritura no ordenada para todos los vehículos; devuelve los modificados
    async fn bulk_set_latest_trips(&self, updates: &[LatestTripUpdate]) -> AppResult<u64>;
}

#[async_trait]
pub trait DriverLogRepository: Send + Sync {
    /// Entrada más reciente del driver que tenga alta
    async fn latest_joining_for_driver(&self, driver_id: Uuid) -> AppResult<Option<DriverLog>>;

    /// Entrada más reciente del vehículo
    async fn latest_for_vehicle(&self, vehicle_no: &str) -> AppResult<Option<DriverLog>>;

    async fn create(&self, log: &DriverLog) -> AppResult<()>;
}

#[async_trait]
pub trait DriverRepository: Send + Sync {
    async fn find_by_name_or_code(&self, name_or_code: &str) -> AppResult<Option<Driver>>;
}

/// Conjunto de repositorios que recibe el núcleo
#[derive(Clone)]
pub struct Stores {
    pub trips: Arc<dyn TripRepository>,
    pub vehicles: Arc<dyn VehicleRepository>,
    pub driver_logs: Arc<dyn DriverLogRepository>,
    pub drivers: Arc<dyn DriverRepository>,
}

impl Stores {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            trips: store.clone(),
            vehicles: store.clone(),
            driver_logs: store.clone(),
            drivers: store,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            trips: Arc::new(PgTripRepository::new(pool.clone())),
            vehicles: Arc::new(PgVehicleRepository::new(pool.clone())),
            driver_logs: Arc::new(PgDriverLogRepository::new(pool.clone())),
            drivers: Arc::new(PgDriverRepository::new(pool)),
        }
    }
}
