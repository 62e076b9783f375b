use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::DriverLogRepository;
use crate::models::{DriverLog, JoiningEvent, LeavingEvent};
use crate::utils::errors::AppResult;

const LOG_COLUMNS: &str = "id, vehicle_no, driver_id, driver_name, joining, leaving, created_at";

#[derive(Debug, sqlx::FromRow)]
struct DriverLogRow {
    id: Uuid,
    vehicle_no: String,
    driver_id: Uuid,
    driver_name: String,
    joining: Option<Json<JoiningEvent>>,
    leaving: Option<Json<LeavingEvent>>,
    created_at: DateTime<Utc>,
}

impl From<DriverLogRow> for DriverLog {
    fn from(row: DriverLogRow) -> Self {
        DriverLog {
            id: row.id,
            vehicle_no: row.vehicle_no,
            driver_id: row.driver_id,
            driver_name: row.driver_name,
            joining: row.joining.map(|j| j.0),
            leaving: row.leaving.map(|l| l.0),
            created_at: row.created_at,
        }
    }
}

pub struct PgDriverLogRepository {
    pool: PgPool,
}

impl PgDriverLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DriverLogRepository for PgDriverLogRepository {
    async fn latest_joining_for_driver(&self, driver_id: Uuid) -> AppResult<Option<DriverLog>> {
        let row = sqlx::query_as::<_, DriverLogRow>(&format!(
            r#"
            SELECT {} FROM driver_logs
            WHERE driver_id = $1 AND joining IS NOT NULL
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
            LOG_COLUMNS
        ))
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DriverLog::from))
    }

    async fn latest_for_vehicle(&self, vehicle_no: &str) -> AppResult<Option<DriverLog>> {
        let row = sqlx::query_as::<_, DriverLogRow>(&format!(
            r#"
            SELECT {} FROM driver_logs
            WHERE vehicle_no = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
            LOG_COLUMNS
        ))
        .bind(vehicle_no)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DriverLog::from))
    }

    async fn create(&self, log: &DriverLog) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO driver_logs (id, vehicle_no, driver_id, driver_name, joining, leaving, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id)
        .bind(&log.vehicle_no)
        .bind(log.driver_id)
        .bind(&log.driver_name)
        .bind(log.joining.as_ref().map(Json))
        .bind(log.leaving.as_ref().map(Json))
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
