use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::TripRepository;
use crate::models::{
    apply_patch, BulkWriteResult, DriverStatus, StatusUpdate, TravelEntry, Trip, TripBulkOp,
    TripFilter, TripPatch,
};
use crate::utils::errors::{AppError, AppResult};

const TRIP_COLUMNS: &str = "id, trip_number, vehicle_no, start_date, end_date, start_from, end_to, \
     load_status, driver_name, driver_mobile, driver_status, rank_index, travel_history, \
     status_updates, created_at, updated_at";

// Fila tal como vive en la tabla trips
#[derive(Debug, sqlx::FromRow)]
struct TripRow {
    id: Uuid,
    trip_number: i64,
    vehicle_no: String,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    start_from: Option<String>,
    end_to: Option<String>,
    load_status: i16,
    driver_name: String,
    driver_mobile: Option<String>,
    driver_status: i16,
    rank_index: i32,
    travel_history: Json<Vec<TravelEntry>>,
    status_updates: Json<Vec<StatusUpdate>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TripRow> for Trip {
    type Error = AppError;

    fn try_from(row: TripRow) -> Result<Self, Self::Error> {
        Ok(Trip {
            id: row.id,
            trip_number: row.trip_number,
            vehicle_no: row.vehicle_no,
            start_date: row.start_date,
            end_date: row.end_date,
            start_from: row.start_from,
            end_to: row.end_to,
            load_status: row.load_status.try_into()?,
            driver_name: row.driver_name,
            driver_mobile: row.driver_mobile,
            driver_status: row.driver_status.try_into()?,
            rank_index: row.rank_index,
            travel_history: row.travel_history.0,
            status_updates: row.status_updates.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn rows_to_trips(rows: Vec<TripRow>) -> AppResult<Vec<Trip>> {
    rows.into_iter().map(Trip::try_from).collect()
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &TripFilter) {
    if let Some(id) = filter.id {
        qb.push(" AND id = ").push_bind(id);
    }
    if let Some(vehicle_no) = &filter.vehicle_no {
        qb.push(" AND vehicle_no = ").push_bind(vehicle_no.clone());
    }
    if let Some(number) = filter.trip_number {
        qb.push(" AND trip_number = ").push_bind(number);
    }
    if let Some(from) = filter.started_from {
        qb.push(" AND start_date >= ").push_bind(from);
    }
    if let Some(before) = filter.started_before {
        qb.push(" AND start_date < ").push_bind(before);
    }
}

async fn fetch_matching<'e, E: PgExecutor<'e>>(
    executor: E,
    filter: &TripFilter,
    limit: Option<usize>,
    for_update: bool,
) -> AppResult<Vec<Trip>> {
    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT {} FROM trips WHERE TRUE",
        TRIP_COLUMNS
    ));
    push_filter(&mut qb, filter);
    qb.push(" ORDER BY created_at ASC, id ASC");
    if let Some(limit) = limit {
        qb.push(" LIMIT ").push_bind(limit as i64);
    }
    if for_update {
        qb.push(" FOR UPDATE");
    }

    let rows = qb.build_query_as::<TripRow>().fetch_all(executor).await?;
    rows_to_trips(rows)
}

async fn next_number<'e, E: PgExecutor<'e>>(executor: E) -> AppResult<i64> {
    let number: i64 = sqlx::query_scalar("SELECT nextval('trip_number_seq')")
        .fetch_one(executor)
        .await?;
    Ok(number)
}

async fn insert_trip<'e, E: PgExecutor<'e>>(executor: E, trip: &Trip) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO trips (id, trip_number, vehicle_no, start_date, end_date, start_from, end_to,
                           load_status, driver_name, driver_mobile, driver_status, rank_index,
                           travel_history, status_updates, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(trip.id)
    .bind(trip.trip_number)
    .bind(&trip.vehicle_no)
    .bind(trip.start_date)
    .bind(trip.end_date)
    .bind(&trip.start_from)
    .bind(&trip.end_to)
    .bind(i16::from(trip.load_status))
    .bind(&trip.driver_name)
    .bind(&trip.driver_mobile)
    .bind(i16::from(trip.driver_status))
    .bind(trip.rank_index)
    .bind(Json(&trip.travel_history))
    .bind(Json(&trip.status_updates))
    .bind(trip.created_at)
    .bind(trip.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn write_trip<'e, E: PgExecutor<'e>>(executor: E, trip: &Trip) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE trips
        SET vehicle_no = $2, start_date = $3, end_date = $4, start_from = $5, end_to = $6,
            load_status = $7, driver_name = $8, driver_mobile = $9, driver_status = $10,
            rank_index = $11, travel_history = $12, status_updates = $13, updated_at = $14
        WHERE id = $1
        "#,
    )
    .bind(trip.id)
    .bind(&trip.vehicle_no)
    .bind(trip.start_date)
    .bind(trip.end_date)
    .bind(&trip.start_from)
    .bind(&trip.end_to)
    .bind(i16::from(trip.load_status))
    .bind(&trip.driver_name)
    .bind(&trip.driver_mobile)
    .bind(i16::from(trip.driver_status))
    .bind(trip.rank_index)
    .bind(Json(&trip.travel_history))
    .bind(Json(&trip.status_updates))
    .bind(trip.updated_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub struct PgTripRepository {
    pool: PgPool,
}

impl PgTripRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TripRepository for PgTripRepository {
    async fn next_trip_number(&self) -> AppResult<i64> {
        next_number(&self.pool).await
    }

    async fn insert(&self, trip: &Trip) -> AppResult<()> {
        insert_trip(&self.pool, trip).await
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Trip>> {
        let row = sqlx::query_as::<_, TripRow>(&format!(
            "SELECT {} FROM trips WHERE id = $1",
            TRIP_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Trip::try_from).transpose()
    }

    async fn find(&self, filter: &TripFilter, limit: Option<usize>) -> AppResult<Vec<Trip>> {
        fetch_matching(&self.pool, filter, limit, false).await
    }

    async fn find_dated_by_vehicle(&self, vehicle_no: &str) -> AppResult<Vec<Trip>> {
        let rows = sqlx::query_as::<_, TripRow>(&format!(
            "SELECT {} FROM trips WHERE vehicle_no = $1 AND start_date IS NOT NULL",
            TRIP_COLUMNS
        ))
        .bind(vehicle_no)
        .fetch_all(&self.pool)
        .await?;

        rows_to_trips(rows)
    }

    async fn latest_for_vehicle(&self, vehicle_no: &str) -> AppResult<Option<Trip>> {
        let row = sqlx::query_as::<_, TripRow>(&format!(
            r#"
            SELECT {} FROM trips
            WHERE vehicle_no = $1 AND start_date IS NOT NULL
            ORDER BY start_date DESC, rank_index ASC, id DESC
            LIMIT 1
            "#,
            TRIP_COLUMNS
        ))
        .bind(vehicle_no)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Trip::try_from).transpose()
    }

    async fn insert_at_day_head(
        &self,
        trip: &Trip,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut tx = self.pool.begin().await?;

        // Serializa las altas del mismo vehículo hasta el commit
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&trip.vehicle_no)
            .execute(&mut *tx)
            .await?;

        let shifted = sqlx::query(
            r#"
            UPDATE trips
            SET rank_index = rank_index + 1, updated_at = NOW()
            WHERE vehicle_no = $1 AND start_date >= $2 AND start_date < $3
            "#,
        )
        .bind(&trip.vehicle_no)
        .bind(day_start)
        .bind(day_end)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let mut head = trip.clone();
        head.rank_index = 0;
        insert_trip(&mut *tx, &head).await?;

        tx.commit().await?;
        Ok(shifted)
    }

    async fn update_by_id(&self, id: Uuid, patch: &TripPatch) -> AppResult<Option<Trip>> {
        let mut tx = self.pool.begin().await?;

        let current = fetch_matching(&mut *tx, &TripFilter::by_id(id), Some(1), true)
            .await?
            .into_iter()
            .next();
        let Some(current) = current else {
            return Ok(None);
        };

        let mut updated = apply_patch(&current, patch)?;
        updated.updated_at = Utc::now();
        write_trip(&mut *tx, &updated).await?;

        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn replace(&self, trip: &Trip) -> AppResult<bool> {
        let mut stored = trip.clone();
        stored.updated_at = Utc::now();
        write_trip(&self.pool, &stored).await
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM trips WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_driver_status(&self, id: Uuid, status: DriverStatus) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE trips SET driver_status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(i16::from(status))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn bulk_write(&self, ops: &[TripBulkOp]) -> AppResult<BulkWriteResult> {
        let mut tx = self.pool.begin().await?;
        let mut result = BulkWriteResult::default();
        let now = Utc::now();

        for op in ops {
            match op {
                TripBulkOp::InsertOne { document } => {
                    let number = next_number(&mut *tx).await?;
                    let trip = Trip::from_new(document.clone(), Uuid::now_v7(), number, now);
                    insert_trip(&mut *tx, &trip).await?;
                    result.inserted_ids.push(trip.id);
                }
                TripBulkOp::UpdateOne { filter, update } | TripBulkOp::UpdateMany { filter, update } => {
                    let limit = matches!(op, TripBulkOp::UpdateOne { .. }).then_some(1);
                    for current in fetch_matching(&mut *tx, filter, limit, true).await? {
                        result.matched += 1;
                        let mut updated = apply_patch(&current, update)?;
                        updated.updated_at = now;
                        if write_trip(&mut *tx, &updated).await? {
                            result.modified += 1;
                        }
                    }
                }
                TripBulkOp::ReplaceOne { filter, replacement } => {
                    let matched = fetch_matching(&mut *tx, filter, Some(1), true).await?;
                    if let Some(current) = matched.into_iter().next() {
                        result.matched += 1;
                        let replaced = current.replaced_with(replacement.clone(), now);
                        if write_trip(&mut *tx, &replaced).await? {
                            result.modified += 1;
                        }
                    }
                }
                TripBulkOp::DeleteOne { filter } | TripBulkOp::DeleteMany { filter } => {
                    let limit = matches!(op, TripBulkOp::DeleteOne { .. }).then_some(1);
                    let ids: Vec<Uuid> = fetch_matching(&mut *tx, filter, limit, true)
                        .await?
                        .into_iter()
                        .map(|t| t.id)
                        .collect();
                    if !ids.is_empty() {
                        let deleted = sqlx::query("DELETE FROM trips WHERE id = ANY($1)")
                            .bind(ids)
                            .execute(&mut *tx)
                            .await?;
                        result.deleted += deleted.rows_affected();
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(result)
    }
}
