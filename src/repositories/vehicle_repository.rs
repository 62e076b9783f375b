use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{LatestTripUpdate, VehicleRepository};
use crate::models::{TripDetails, Vehicle};
use crate::utils::errors::AppResult;

// Struct simplificado para la fila de vehicles
#[derive(Debug, sqlx::FromRow)]
struct VehicleRow {
    id: Uuid,
    vehicle_no: String,
    trip_driver: Option<String>,
    trip_id: Option<Uuid>,
    updated_at: DateTime<Utc>,
}

impl From<VehicleRow> for Vehicle {
    fn from(row: VehicleRow) -> Self {
        Vehicle {
            id: row.id,
            vehicle_no: row.vehicle_no,
            trip_details: TripDetails {
                driver: row.trip_driver,
                id: row.trip_id,
            },
            updated_at: row.updated_at,
        }
    }
}

pub struct PgVehicleRepository {
    pool: PgPool,
}

impl PgVehicleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VehicleRepository for PgVehicleRepository {
    async fn find_by_number(&self, vehicle_no: &str) -> AppResult<Option<Vehicle>> {
        let vehicle = sqlx::query_as::<_, VehicleRow>(
            "SELECT id, vehicle_no, trip_driver, trip_id, updated_at FROM vehicles WHERE vehicle_no = $1",
        )
        .bind(vehicle_no)
        .fetch_optional(&self.pool)
        .await?;

        Ok(vehicle.map(Vehicle::from))
    }

    async fn set_latest_trip(&self, vehicle_no: &str, trip_id: Option<Uuid>) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE vehicles SET trip_id = $2, updated_at = NOW() WHERE vehicle_no = $1",
        )
        .bind(vehicle_no)
        .bind(trip_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_driver(&self, vehicle_no: &str, driver: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE vehicles SET trip_driver = $2, updated_at = NOW() WHERE vehicle_no = $1",
        )
        .bind(vehicle_no)
        .bind(driver)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn bulk_set_latest_trips(&self, updates: &[LatestTripUpdate]) -> AppResult<u64> {
        if updates.is_empty() {
            return Ok(0);
        }

        let vehicle_nos: Vec<String> = updates.iter().map(|u| u.vehicle_no.clone()).collect();
        let trip_ids: Vec<Option<Uuid>> = updates.iter().map(|u| u.trip_id).collect();

        // Un solo statement: cada par (vehicle_no, trip_id) fija o limpia el puntero
        let result = sqlx::query(
            r#"
            UPDATE vehicles AS v
            SET trip_id = u.trip_id, updated_at = NOW()
            FROM UNNEST($1::text[], $2::uuid[]) AS u(vehicle_no, trip_id)
            WHERE v.vehicle_no = u.vehicle_no
            "#,
        )
        .bind(vehicle_nos)
        .bind(trip_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
