//! Pipeline de escritura de viajes
//!
//! Todas las escrituras sobre viajes pasan por aquí. Cada operación arma un
//! `WriteContext`, ejecuta `before_write` de cada hook, hace la escritura
//! primaria y luego `after_write`. Los errores de los hooks se registran y se
//! descartan: quien llama sólo ve fallos de la escritura primaria.
//!
//! Las altas de un mismo vehículo se serializan: el desplazamiento del ranking
//! del día y la inserción ocurren en una única escritura del repositorio, y la
//! bitácora de drivers y el vehículo sólo se tocan si la inserción tuvo éxito.
//!
//! Los bulk writes no disparan hooks por documento: se extraen los vehículos
//! afectados, se ejecuta el lote y el recálculo de punteros se encola en
//! segundo plano sin bloquear la respuesta.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::models::{
    apply_patch, day_bounds, BulkWriteResult, NewTrip, Trip, TripBulkOp, TripFilter, TripPatch,
    UpdateResult,
};
use crate::repositories::TripRepository;
use crate::services::background::BackgroundQueue;
use crate::services::bulk_vehicle_updater::BulkVehicleUpdater;
use crate::services::driver_assignment::{DriverAssignmentService, DriverPlan};
use crate::services::latest_trip::{LatestTripService, TripOverlay};
use crate::utils::clock::Clock;
use crate::utils::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
    Delete,
}

/// Estado compartido entre las fases de una escritura
#[derive(Debug, Clone)]
pub struct WriteContext {
    pub op: WriteOp,
    /// Create: documento a insertar; los hooks pueden modificarlo
    pub document: Option<Trip>,
    /// Update/Delete: documentos almacenados antes de escribir
    pub previous: Vec<Trip>,
    /// Update: estado final proyectado y, tras escribir, el resultante
    pub projected: Vec<Trip>,
    /// Vehículos capturados en `before_write`
    pub affected_vehicles: BTreeSet<String>,
    /// Create: día cuyo ranking encabeza el documento
    pub rank_day: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Create: escrituras de driver pendientes hasta persistir el viaje
    pub driver_plan: Option<DriverPlan>,
}

impl WriteContext {
    fn new(op: WriteOp) -> Self {
        Self {
            op,
            document: None,
            previous: Vec::new(),
            projected: Vec::new(),
            affected_vehicles: BTreeSet::new(),
            rank_day: None,
            driver_plan: None,
        }
    }

    fn create(document: Trip) -> Self {
        Self {
            document: Some(document),
            ..Self::new(WriteOp::Create)
        }
    }

    fn update(previous: Vec<Trip>, projected: Vec<Trip>) -> Self {
        Self {
            previous,
            projected,
            ..Self::new(WriteOp::Update)
        }
    }

    fn delete(previous: Vec<Trip>) -> Self {
        Self {
            previous,
            ..Self::new(WriteOp::Delete)
        }
    }

    fn describe(&self) -> String {
        match (&self.document, self.previous.first()) {
            (Some(trip), _) | (None, Some(trip)) => {
                format!("vehicle={} trip={}", trip.vehicle_no, trip.id)
            }
            (None, None) => "no documents".to_string(),
        }
    }
}

/// Etapa interceptora de escrituras de viajes
#[async_trait]
pub trait TripWriteHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn before_write(&self, _ctx: &mut WriteContext) -> AppResult<()> {
        Ok(())
    }

    async fn after_write(&self, _ctx: &WriteContext) -> AppResult<()> {
        Ok(())
    }
}

/// Hook principal: ranking del día, asignación de driver y puntero "latest"
pub struct ReconciliationHook {
    drivers: Arc<DriverAssignmentService>,
    latest: Arc<LatestTripService>,
    config: PipelineConfig,
}

impl ReconciliationHook {
    pub fn new(
        drivers: Arc<DriverAssignmentService>,
        latest: Arc<LatestTripService>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            drivers,
            latest,
            config,
        }
    }

    fn day_of(&self, trip: &Trip) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        trip.start_date
            .map(|start| day_bounds(start, self.config.day_offset()))
    }
}

#[async_trait]
impl TripWriteHook for ReconciliationHook {
    fn name(&self) -> &'static str {
        "reconciliation"
    }

    async fn before_write(&self, ctx: &mut WriteContext) -> AppResult<()> {
        match ctx.op {
            WriteOp::Create => {
                let Some(trip) = ctx.document.as_mut() else {
                    return Ok(());
                };
                // Orden estricto: ranking, luego driver
                ctx.rank_day = self.day_of(trip);
                trip.rank_index = 0;
                match self.drivers.plan(trip).await {
                    Ok(plan) => {
                        debug!(vehicle_no = %trip.vehicle_no, trip_id = %trip.id, decision = ?plan.decision, "Driver resuelto");
                        ctx.driver_plan = Some(plan);
                    }
                    Err(e) => {
                        warn!(vehicle_no = %trip.vehicle_no, trip_id = %trip.id, "⚠️ Error resolviendo driver: {}", e);
                    }
                }
                ctx.affected_vehicles.insert(trip.vehicle_no.clone());
            }
            WriteOp::Update | WriteOp::Delete => {
                let vehicles: Vec<String> = ctx
                    .previous
                    .iter()
                    .chain(ctx.projected.iter())
                    .map(|trip| trip.vehicle_no.clone())
                    .collect();
                ctx.affected_vehicles.extend(vehicles);
            }
        }
        Ok(())
    }

    async fn after_write(&self, ctx: &WriteContext) -> AppResult<()> {
        if let (Some(trip), Some(plan)) = (&ctx.document, &ctx.driver_plan) {
            if let Err(e) = self.drivers.apply(trip, plan).await {
                warn!(vehicle_no = %trip.vehicle_no, trip_id = %trip.id, "⚠️ Error aplicando driver: {}", e);
            }
        }

        let overlay = match ctx.op {
            WriteOp::Create => match &ctx.document {
                Some(trip) => TripOverlay::upsert(trip.clone()),
                None => return Ok(()),
            },
            WriteOp::Update => TripOverlay {
                upserts: ctx.projected.clone(),
                removed: BTreeSet::new(),
            },
            WriteOp::Delete => TripOverlay::removed(ctx.previous.iter().map(|trip| trip.id)),
        };

        let mut vehicles = ctx.affected_vehicles.clone();
        vehicles.extend(ctx.projected.iter().map(|trip| trip.vehicle_no.clone()));

        let failed = self.latest.refresh_each(&vehicles, &overlay).await;
        if failed.is_empty() {
            Ok(())
        } else {
            Err(AppError::Resolution(format!(
                "latest trip pointer not refreshed for {:?}",
                failed
            )))
        }
    }
}

/// Un mutex por vehículo; la entrada se descarta al soltar el último guard
#[derive(Default)]
struct VehicleLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl VehicleLocks {
    async fn lock(&self, vehicle_no: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(vehicle_no.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    async fn release(&self, vehicle_no: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self.locks.lock().await;
        if locks
            .get(vehicle_no)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(vehicle_no);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

pub struct TripPipeline {
    trips: Arc<dyn TripRepository>,
    create_locks: VehicleLocks,
    hooks: Vec<Arc<dyn TripWriteHook>>,
    bulk_updater: Arc<BulkVehicleUpdater>,
    queue: BackgroundQueue,
    clock: Arc<dyn Clock>,
}

impl TripPipeline {
    pub fn new(
        trips: Arc<dyn TripRepository>,
        bulk_updater: Arc<BulkVehicleUpdater>,
        queue: BackgroundQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            trips,
            hooks: Vec::new(),
            create_locks: VehicleLocks::default(),
            bulk_updater,
            queue,
            clock,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn TripWriteHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    async fn run_before(&self, ctx: &mut WriteContext) {
        for hook in &self.hooks {
            if let Err(e) = hook.before_write(ctx).await {
                warn!(hook = hook.name(), context = %ctx.describe(), "⚠️ Hook before_write falló: {}", e);
            }
        }
    }

    async fn run_after(&self, ctx: &WriteContext) {
        for hook in &self.hooks {
            if let Err(e) = hook.after_write(ctx).await {
                warn!(hook = hook.name(), context = %ctx.describe(), "⚠️ Hook after_write falló: {}", e);
            }
        }
    }

    pub async fn find(&self, filter: &TripFilter, limit: Option<usize>) -> AppResult<Vec<Trip>> {
        self.trips.find(filter, limit).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Trip>> {
        self.trips.find_by_id(id).await
    }

    /// Alta de un viaje
    pub async fn create(&self, new_trip: NewTrip) -> AppResult<Trip> {
        if new_trip.vehicle_no.trim().is_empty() {
            return Err(AppError::BadRequest("vehicle_no is required".to_string()));
        }
        let trip_number = self.trips.next_trip_number().await?;
        let trip = Trip::from_new(new_trip, Uuid::now_v7(), trip_number, self.clock.now());
        self.insert_with_hooks(trip).await
    }

    async fn insert_with_hooks(&self, trip: Trip) -> AppResult<Trip> {
        let vehicle_no = trip.vehicle_no.clone();
        let guard = self.create_locks.lock(&vehicle_no).await;
        let result = self.insert_locked(trip).await;
        self.create_locks.release(&vehicle_no, guard).await;
        result
    }

    async fn insert_locked(&self, trip: Trip) -> AppResult<Trip> {
        let mut ctx = WriteContext::create(trip);
        self.run_before(&mut ctx).await;

        let trip = ctx
            .document
            .clone()
            .ok_or_else(|| AppError::Internal("create hook dropped the document".to_string()))?;
        match ctx.rank_day {
            Some((day_start, day_end)) => {
                let shifted = self
                    .trips
                    .insert_at_day_head(&trip, day_start, day_end)
                    .await?;
                if shifted > 0 {
                    debug!(vehicle_no = %trip.vehicle_no, shifted, "Viajes del mismo día desplazados");
                }
            }
            None => self.trips.insert(&trip).await?,
        }
        info!(vehicle_no = %trip.vehicle_no, trip_id = %trip.id, trip_number = trip.trip_number, "✅ Viaje creado");

        self.run_after(&ctx).await;
        Ok(trip)
    }

    /// Guarda el documento completo; si no existe se trata como alta
    pub async fn save(&self, trip: Trip) -> AppResult<Trip> {
        let Some(stored) = self.trips.find_by_id(trip.id).await? else {
            let mut trip = trip;
            trip.rank_index = 0;
            return self.insert_with_hooks(trip).await;
        };

        let mut projected = trip;
        projected.created_at = stored.created_at;
        projected.trip_number = stored.trip_number;
        projected.updated_at = self.clock.now();

        let mut ctx = WriteContext::update(vec![stored], vec![projected.clone()]);
        self.run_before(&mut ctx).await;

        if !self.trips.replace(&projected).await? {
            return Err(AppError::NotFound(format!("Trip {} not found", projected.id)));
        }
        ctx.projected = vec![projected.clone()];
        self.run_after(&ctx).await;
        Ok(projected)
    }

    /// Aplica el patch al primer viaje del filtro y devuelve el documento resultante
    pub async fn find_one_and_update(
        &self,
        filter: &TripFilter,
        patch: &TripPatch,
    ) -> AppResult<Option<Trip>> {
        let updated = self.update_matching(filter, patch, Some(1)).await?;
        Ok(updated.into_iter().next())
    }

    pub async fn update_one(&self, filter: &TripFilter, patch: &TripPatch) -> AppResult<UpdateResult> {
        let updated = self.update_matching(filter, patch, Some(1)).await?;
        Ok(update_result(&updated, patch))
    }

    pub async fn update_many(
        &self,
        filter: &TripFilter,
        patch: &TripPatch,
    ) -> AppResult<UpdateResult> {
        let updated = self.update_matching(filter, patch, None).await?;
        Ok(update_result(&updated, patch))
    }

    async fn update_matching(
        &self,
        filter: &TripFilter,
        patch: &TripPatch,
        limit: Option<usize>,
    ) -> AppResult<Vec<Trip>> {
        let previous = self.trips.find(filter, limit).await?;
        if previous.is_empty() {
            return Ok(Vec::new());
        }

        // Proyección pura: un patch inválido falla antes de escribir nada
        let projected = previous
            .iter()
            .map(|trip| apply_patch(trip, patch))
            .collect::<AppResult<Vec<Trip>>>()?;

        let mut ctx = WriteContext::update(previous, projected);
        self.run_before(&mut ctx).await;

        let mut updated = Vec::with_capacity(ctx.previous.len());
        for trip in &ctx.previous {
            if let Some(result) = self.trips.update_by_id(trip.id, patch).await? {
                updated.push(result);
            }
        }
        debug!(matched = ctx.previous.len(), updated = updated.len(), "Viajes actualizados");

        ctx.projected = updated.clone();
        self.run_after(&ctx).await;
        Ok(updated)
    }

    pub async fn delete_one(&self, filter: &TripFilter) -> AppResult<u64> {
        self.delete_matching(filter, Some(1)).await
    }

    pub async fn delete_many(&self, filter: &TripFilter) -> AppResult<u64> {
        self.delete_matching(filter, None).await
    }

    async fn delete_matching(&self, filter: &TripFilter, limit: Option<usize>) -> AppResult<u64> {
        let previous = self.trips.find(filter, limit).await?;
        if previous.is_empty() {
            return Ok(0);
        }

        let mut ctx = WriteContext::delete(previous);
        self.run_before(&mut ctx).await;

        let ids: Vec<Uuid> = ctx.previous.iter().map(|trip| trip.id).collect();
        let deleted = self.trips.delete_by_ids(&ids).await?;
        info!(deleted, vehicles = ?ctx.affected_vehicles, "🗑️ Viajes eliminados");

        self.run_after(&ctx).await;
        Ok(deleted)
    }

    /// Ejecuta el lote y encola el recálculo de punteros de los vehículos afectados
    pub async fn bulk_write(&self, ops: Vec<TripBulkOp>) -> AppResult<BulkWriteResult> {
        let vehicles = self.extract_vehicles(&ops).await;
        let result = self.trips.bulk_write(&ops).await?;

        if !vehicles.is_empty() {
            let updater = self.bulk_updater.clone();
            let vehicle_nos: Vec<String> = vehicles.into_iter().collect();
            info!(vehicles = ?vehicle_nos, "📬 Recálculo de punteros encolado tras bulk write");
            self.queue.submit("bulk-vehicle-update", async move {
                updater.update_vehicles(&vehicle_nos).await;
            });
        }
        Ok(result)
    }

    /// Vehículos referenciados por cualquier operación del lote (antes y después)
    pub async fn extract_vehicles(&self, ops: &[TripBulkOp]) -> BTreeSet<String> {
        let mut vehicles = BTreeSet::new();

        for op in ops {
            let (filter, limit) = match op {
                TripBulkOp::InsertOne { document } => {
                    vehicles.insert(document.vehicle_no.trim().to_string());
                    continue;
                }
                TripBulkOp::UpdateOne { filter, update } => {
                    vehicles.extend(update.target_vehicle().map(str::to_string));
                    (filter, Some(1))
                }
                TripBulkOp::UpdateMany { filter, update } => {
                    vehicles.extend(update.target_vehicle().map(str::to_string));
                    (filter, None)
                }
                TripBulkOp::ReplaceOne {
                    filter,
                    replacement,
                } => {
                    vehicles.insert(replacement.vehicle_no.trim().to_string());
                    (filter, Some(1))
                }
                TripBulkOp::DeleteOne { filter } => (filter, Some(1)),
                TripBulkOp::DeleteMany { filter } => (filter, None),
            };

            if let Some(vehicle_no) = &filter.vehicle_no {
                vehicles.insert(vehicle_no.clone());
                continue;
            }
            match self.trips.find(filter, limit).await {
                Ok(matched) => vehicles.extend(matched.into_iter().map(|trip| trip.vehicle_no)),
                Err(e) => warn!("⚠️ No se pudieron resolver vehículos del filtro {:?}: {}", filter, e),
            }
        }

        vehicles.retain(|vehicle_no| !vehicle_no.is_empty());
        vehicles
    }
}

fn update_result(updated: &[Trip], patch: &TripPatch) -> UpdateResult {
    let matched = updated.len() as u64;
    UpdateResult {
        matched,
        modified: if patch.is_empty() { 0 } else { matched },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_vehicle_locks_are_dropped_after_release() {
        let locks = Arc::new(VehicleLocks::default());

        let first = locks.lock("GJ-01-AB-1234").await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let guard = locks.lock("GJ-01-AB-1234").await;
                locks.release("GJ-01-AB-1234", guard).await;
            })
        };
        tokio::task::yield_now().await;
        locks.release("GJ-01-AB-1234", first).await;
        waiter.await.unwrap();

        assert_eq!(locks.len().await, 0);
    }
}
