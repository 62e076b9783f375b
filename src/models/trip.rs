//! Modelo de Trip
//!
//! Un viaje es un ciclo de movimiento de un tanquero. El vehículo se referencia
//! por su número (valor), no por clave foránea.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::errors::AppError;

/// Valor centinela para "sin driver asignado"
pub const NO_DRIVER: &str = "no driver";

/// `true` si el nombre identifica a un driver real (no vacío, no centinela)
pub fn is_named_driver(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case(NO_DRIVER)
}

fn default_driver_name() -> String {
    NO_DRIVER.to_string()
}

/// Estado de carga: Empty=0, Loaded=1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum LoadStatus {
    #[default]
    Empty,
    Loaded,
}

impl From<LoadStatus> for i16 {
    fn from(status: LoadStatus) -> Self {
        match status {
            LoadStatus::Empty => 0,
            LoadStatus::Loaded => 1,
        }
    }
}

impl TryFrom<i16> for LoadStatus {
    type Error = AppError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LoadStatus::Empty),
            1 => Ok(LoadStatus::Loaded),
            other => Err(AppError::BadRequest(format!("Invalid load status: {}", other))),
        }
    }
}

/// `driverStatus`: 1 = driver presente
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum DriverStatus {
    #[default]
    Absent,
    Present,
}

impl DriverStatus {
    pub fn for_driver(name: &str) -> Self {
        if is_named_driver(name) {
            DriverStatus::Present
        } else {
            DriverStatus::Absent
        }
    }
}

impl From<DriverStatus> for i16 {
    fn from(status: DriverStatus) -> Self {
        match status {
            DriverStatus::Absent => 0,
            DriverStatus::Present => 1,
        }
    }
}

impl TryFrom<i16> for DriverStatus {
    type Error = AppError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DriverStatus::Absent),
            1 => Ok(DriverStatus::Present),
            other => Err(AppError::BadRequest(format!("Invalid driver status: {}", other))),
        }
    }
}

/// Entrada del historial de recorrido (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelEntry {
    pub at: DateTime<Utc>,
    pub comment: String,
    #[serde(default)]
    pub location: Option<String>,
}

/// Entrada de actualización de estado (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub at: DateTime<Utc>,
    pub status: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Trip principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub trip_number: i64,
    pub vehicle_no: String,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_from: Option<String>,
    #[serde(default)]
    pub end_to: Option<String>,
    #[serde(default)]
    pub load_status: LoadStatus,
    #[serde(default = "default_driver_name")]
    pub driver_name: String,
    #[serde(default)]
    pub driver_mobile: Option<String>,
    #[serde(default)]
    pub driver_status: DriverStatus,
    /// Desempate entre viajes del mismo vehículo y día; 0 = el más reciente
    #[serde(default)]
    pub rank_index: i32,
    #[serde(default)]
    pub travel_history: Vec<TravelEntry>,
    #[serde(default)]
    pub status_updates: Vec<StatusUpdate>,
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    /// Construye el documento a persistir a partir de la petición de alta
    pub fn from_new(new: NewTrip, id: Uuid, trip_number: i64, now: DateTime<Utc>) -> Self {
        let driver_name = new
            .driver_name
            .filter(|name| is_named_driver(name))
            .unwrap_or_else(default_driver_name);

        Self {
            id,
            trip_number,
            vehicle_no: new.vehicle_no.trim().to_string(),
            start_date: new.start_date,
            end_date: new.end_date,
            start_from: new.start_from,
            end_to: new.end_to,
            load_status: new.load_status,
            driver_status: DriverStatus::for_driver(&driver_name),
            driver_name,
            driver_mobile: new.driver_mobile,
            rank_index: 0,
            travel_history: Vec::new(),
            status_updates: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Reemplazo completo de los campos editables, conservando identidad
    pub fn replaced_with(&self, replacement: NewTrip, now: DateTime<Utc>) -> Self {
        let mut trip = Trip::from_new(replacement, self.id, self.trip_number, self.created_at);
        trip.updated_at = now;
        trip
    }

    pub fn has_named_driver(&self) -> bool {
        is_named_driver(&self.driver_name)
    }
}

/// Petición de alta de un viaje
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTrip {
    pub vehicle_no: String,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_from: Option<String>,
    #[serde(default)]
    pub end_to: Option<String>,
    #[serde(default)]
    pub load_status: LoadStatus,
    #[serde(default)]
    pub driver_name: Option<String>,
    #[serde(default)]
    pub driver_mobile: Option<String>,
}

/// Filtro de viajes; un filtro vacío selecciona todos
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripFilter {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub vehicle_no: Option<String>,
    #[serde(default)]
    pub trip_number: Option<i64>,
    /// Inclusivo
    #[serde(default)]
    pub started_from: Option<DateTime<Utc>>,
    /// Exclusivo
    #[serde(default)]
    pub started_before: Option<DateTime<Utc>>,
}

impl TripFilter {
    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn by_vehicle(vehicle_no: impl Into<String>) -> Self {
        Self {
            vehicle_no: Some(vehicle_no.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, trip: &Trip) -> bool {
        if let Some(id) = self.id {
            if trip.id != id {
                return false;
            }
        }
        if let Some(vehicle_no) = &self.vehicle_no {
            if &trip.vehicle_no != vehicle_no {
                return false;
            }
        }
        if let Some(number) = self.trip_number {
            if trip.trip_number != number {
                return false;
            }
        }
        if self.started_from.is_some() || self.started_before.is_some() {
            let Some(start) = trip.start_date else {
                return false;
            };
            if self.started_from.map_or(false, |from| start < from) {
                return false;
            }
            if self.started_before.map_or(false, |before| start >= before) {
                return false;
            }
        }
        true
    }
}

/// Operación individual de un bulk write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TripBulkOp {
    InsertOne { document: NewTrip },
    UpdateOne { filter: TripFilter, update: super::TripPatch },
    UpdateMany { filter: TripFilter, update: super::TripPatch },
    ReplaceOne { filter: TripFilter, replacement: NewTrip },
    DeleteOne { filter: TripFilter },
    DeleteMany { filter: TripFilter },
}

/// Resultado de un update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
}

/// Resultado de un bulk write
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkWriteResult {
    pub inserted_ids: Vec<Uuid>,
    pub matched: u64,
    pub modified: u64,
    pub deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_trip() -> Trip {
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap();
        Trip::from_new(
            NewTrip {
                vehicle_no: " GJ-01-AB-1234 ".to_string(),
                start_date: Some(now),
                driver_name: Some("no driver".to_string()),
                ..Default::default()
            },
            Uuid::now_v7(),
            1,
            now,
        )
    }

    #[test]
    fn test_sentinel_driver_is_not_named() {
        assert!(!is_named_driver("no driver"));
        assert!(!is_named_driver("No Driver"));
        assert!(!is_named_driver("  "));
        assert!(is_named_driver("Ramesh Patel"));
    }

    #[test]
    fn test_from_new_normalizes_driver_and_vehicle() {
        let trip = sample_trip();
        assert_eq!(trip.vehicle_no, "GJ-01-AB-1234");
        assert_eq!(trip.driver_name, NO_DRIVER);
        assert_eq!(trip.driver_status, DriverStatus::Absent);
        assert_eq!(trip.rank_index, 0);
    }

    #[test]
    fn test_status_enums_serialize_as_integers() {
        let trip = sample_trip();
        let value = serde_json::to_value(&trip).unwrap();
        assert_eq!(value["load_status"], 0);
        assert_eq!(value["driver_status"], 0);
    }

    #[test]
    fn test_filter_date_range_excludes_undated_trips() {
        let mut trip = sample_trip();
        let filter = TripFilter {
            started_from: Some(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()),
            started_before: Some(Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(filter.matches(&trip));
        trip.start_date = None;
        assert!(!filter.matches(&trip));
    }
}
