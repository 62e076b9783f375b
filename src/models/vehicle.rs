//! Modelo de Vehicle
//! 
//! Un tanquero físico. El núcleo de reconciliación nunca crea vehículos; sólo
//! mantiene `trip_details` (driver actual y puntero al último viaje).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::trip::is_named_driver;

/// Estado derivado de los viajes del vehículo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripDetails {
    /// Nombre del driver o el centinela "no driver"; `None` equivale al centinela
    pub driver: Option<String>,
    /// Id del viaje "latest" según el orden canónico
    pub id: Option<Uuid>,
}

/// Vehicle principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub vehicle_no: String,
    #[serde(default)]
    pub trip_details: TripDetails,
    pub updated_at: DateTime<Utc>,
}

impl Vehicle {
    pub fn new(vehicle_no: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            vehicle_no: vehicle_no.into(),
            trip_details: TripDetails::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.trip_details.driver = Some(driver.into());
        self
    }

    /// Driver real asignado, si lo hay
    pub fn current_driver(&self) -> Option<&str> {
        self.trip_details
            .driver
            .as_deref()
            .filter(|name| is_named_driver(name))
    }

    pub fn latest_trip_id(&self) -> Option<Uuid> {
        self.trip_details.id
    }
}
