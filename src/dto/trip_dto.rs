use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::models::{LoadStatus, NewTrip, StatusUpdate, TravelEntry, TripBulkOp, TripPatch};

// Respuesta estándar de la API
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: Some(data),
        }
    }
}

// Request para crear un viaje
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTripRequest {
    #[validate(length(min = 1, max = 32))]
    pub vehicle_no: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[validate(length(max = 200))]
    pub start_from: Option<String>,
    #[validate(length(max = 200))]
    pub end_to: Option<String>,
    pub load_status: Option<LoadStatus>,
    #[validate(length(max = 100))]
    pub driver_name: Option<String>,
    #[validate(length(max = 20))]
    pub driver_mobile: Option<String>,
}

impl From<CreateTripRequest> for NewTrip {
    fn from(request: CreateTripRequest) -> Self {
        NewTrip {
            vehicle_no: request.vehicle_no,
            start_date: request.start_date,
            end_date: request.end_date,
            start_from: request.start_from,
            end_to: request.end_to,
            load_status: request.load_status.unwrap_or_default(),
            driver_name: request.driver_name,
            driver_mobile: request.driver_mobile,
        }
    }
}

// Request para actualizar parcialmente un viaje ($set / $unset)
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTripRequest {
    #[serde(default)]
    pub set: Map<String, Value>,
    #[serde(default)]
    pub unset: Vec<String>,
}

impl UpdateTripRequest {
    pub fn into_patch(self) -> TripPatch {
        let patch = self
            .set
            .into_iter()
            .fold(TripPatch::new(), |patch, (field, value)| patch.set(&field, value));
        self.unset
            .iter()
            .fold(patch, |patch, field| patch.unset(field))
    }
}

// Request para registrar un cambio de estado
#[derive(Debug, Deserialize, Validate)]
pub struct StatusUpdateRequest {
    #[validate(length(min = 1, max = 64))]
    pub status: String,
    #[validate(length(max = 500))]
    pub comment: Option<String>,
    /// Si viene, también se agrega al historial de recorrido
    #[validate(length(max = 200))]
    pub location: Option<String>,
    pub at: Option<DateTime<Utc>>,
}

impl StatusUpdateRequest {
    pub fn into_patch(self, now: DateTime<Utc>) -> TripPatch {
        let at = self.at.unwrap_or(now);
        let mut patch = TripPatch::new().push_status(StatusUpdate {
            at,
            status: self.status.clone(),
            comment: self.comment.clone(),
        });
        if self.location.is_some() {
            patch = patch.push_travel(TravelEntry {
                at,
                comment: self.comment.unwrap_or(self.status),
                location: self.location,
            });
        }
        patch
    }
}

// Request de bulk write
#[derive(Debug, Deserialize, Validate)]
pub struct BulkWriteRequest {
    #[validate(length(min = 1, max = 1000))]
    pub ops: Vec<TripBulkOp>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_request_builds_patch() {
        let request: UpdateTripRequest = serde_json::from_value(json!({
            "set": { "end_to": "Kandla" },
            "unset": ["driver_mobile"]
        }))
        .unwrap();
        let patch = request.into_patch();
        assert_eq!(patch.set.get("end_to"), Some(&json!("Kandla")));
        assert!(patch.unset.contains("driver_mobile"));
    }

    #[test]
    fn test_create_request_validation() {
        let request = CreateTripRequest {
            vehicle_no: String::new(),
            start_date: None,
            end_date: None,
            start_from: None,
            end_to: None,
            load_status: None,
            driver_name: None,
            driver_mobile: None,
        };
        assert!(request.validate().is_err());
    }
}
