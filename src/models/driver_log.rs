//! Bitácora de asignación de drivers
//! 
//! Ledger append-only: una entrada por alta (joining) y, eventualmente, su baja
//! (leaving). Este núcleo sólo crea entradas de alta y lee el resto.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoiningEvent {
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub odometer: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub trip_id: Option<Uuid>,
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeavingEvent {
    /// Inicio de la ausencia
    pub from: DateTime<Utc>,
    /// Fin previsto de la ausencia
    #[serde(default)]
    pub till_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverLog {
    pub id: Uuid,
    pub vehicle_no: String,
    pub driver_id: Uuid,
    pub driver_name: String,
    #[serde(default)]
    pub joining: Option<JoiningEvent>,
    #[serde(default)]
    pub leaving: Option<LeavingEvent>,
    pub created_at: DateTime<Utc>,
}

impl DriverLog {
    pub fn joining(
        vehicle_no: impl Into<String>,
        driver_id: Uuid,
        driver_name: impl Into<String>,
        joining: JoiningEvent,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            vehicle_no: vehicle_no.into(),
            driver_id,
            driver_name: driver_name.into(),
            joining: Some(joining),
            leaving: None,
            created_at,
        }
    }

    pub fn with_leaving(mut self, leaving: LeavingEvent) -> Self {
        self.leaving = Some(leaving);
        self
    }
}
