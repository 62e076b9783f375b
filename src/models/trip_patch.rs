//! Descriptor de actualización parcial
//!
//! `apply_patch` proyecta el documento final de un viaje a partir del documento
//! almacenado y un conjunto de campos a fijar / eliminar. Es una función pura: el
//! pipeline la usa para saber a qué vehículo afecta un update antes de escribirlo,
//! y los repositorios la usan para escribirlo.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::trip::{StatusUpdate, TravelEntry, Trip};
use crate::utils::errors::{AppError, AppResult};

/// Campos de identidad que ningún update puede tocar
const IMMUTABLE_FIELDS: [&str; 3] = ["id", "trip_number", "created_at"];
/// Campos que pueden fijarse pero no eliminarse
const REQUIRED_FIELDS: [&str; 1] = ["vehicle_no"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripPatch {
    #[serde(default)]
    pub set: Map<String, Value>,
    #[serde(default)]
    pub unset: BTreeSet<String>,
    #[serde(default)]
    pub push_travel_history: Vec<TravelEntry>,
    #[serde(default)]
    pub push_status_updates: Vec<StatusUpdate>,
}

impl TripPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set.insert(field.to_string(), value.into());
        self
    }

    pub fn unset(mut self, field: &str) -> Self {
        self.unset.insert(field.to_string());
        self
    }

    pub fn push_status(mut self, update: StatusUpdate) -> Self {
        self.push_status_updates.push(update);
        self
    }

    pub fn push_travel(mut self, entry: TravelEntry) -> Self {
        self.push_travel_history.push(entry);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.unset.is_empty()
            && self.push_travel_history.is_empty()
            && self.push_status_updates.is_empty()
    }

    /// Vehículo destino si el update mueve el viaje de vehículo
    pub fn target_vehicle(&self) -> Option<&str> {
        self.set.get("vehicle_no").and_then(Value::as_str)
    }
}

/// Proyecta el documento resultante de aplicar `patch` sobre `base`
pub fn apply_patch(base: &Trip, patch: &TripPatch) -> AppResult<Trip> {
    let mut document = match serde_json::to_value(base)? {
        Value::Object(map) => map,
        _ => return Err(AppError::Internal("Trip did not serialize to an object".to_string())),
    };

    for (field, value) in &patch.set {
        check_field(&document, field)?;
        if patch.unset.contains(field) {
            return Err(AppError::BadRequest(format!(
                "Field '{}' cannot be both set and unset",
                field
            )));
        }
        document.insert(field.clone(), value.clone());
    }

    for field in &patch.unset {
        check_field(&document, field)?;
        if REQUIRED_FIELDS.contains(&field.as_str()) {
            return Err(AppError::BadRequest(format!("Field '{}' cannot be unset", field)));
        }
        document.remove(field);
    }

    let mut trip: Trip = serde_json::from_value(Value::Object(document))
        .map_err(|e| AppError::BadRequest(format!("Invalid trip update: {}", e)))?;

    trip.travel_history
        .extend(patch.push_travel_history.iter().cloned());
    trip.status_updates
        .extend(patch.push_status_updates.iter().cloned());

    Ok(trip)
}

fn check_field(document: &Map<String, Value>, field: &str) -> AppResult<()> {
    if IMMUTABLE_FIELDS.contains(&field) {
        return Err(AppError::BadRequest(format!("Field '{}' is immutable", field)));
    }
    if !document.contains_key(field) {
        return Err(AppError::BadRequest(format!("Unknown trip field '{}'", field)));
    }
    Ok(())
}
