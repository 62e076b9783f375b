//! Services module
//! 
//! Este módulo contiene la lógica del núcleo de reconciliación: pipeline de
//! escritura de viajes, punteros "latest trip", asignación y reconciliación de
//! drivers, y los trabajos en segundo plano.

pub mod background;
pub mod bulk_vehicle_updater;
pub mod circuit_breaker;
pub mod driver_assignment;
pub mod driver_status_reconciler;
pub mod latest_trip;
pub mod sync_engine;
pub mod trip_pipeline;

pub use background::{BackgroundQueue, QueueStats};
pub use bulk_vehicle_updater::{BulkUpdateReport, BulkVehicleUpdater};
pub use circuit_breaker::{BreakerState, BreakerStatus, CircuitBreaker};
pub use driver_assignment::{DriverAssignmentService, DriverDecision, DriverPlan};
pub use driver_status_reconciler::{DriverStatusReconciler, ReconcileOutcome, ReconcileReport};
pub use latest_trip::{LatestTripService, PointerOutcome, TripOverlay};
pub use sync_engine::{HealthReport, HealthStatus, SyncEngine};
pub use trip_pipeline::{ReconciliationHook, TripPipeline, TripWriteHook, WriteContext, WriteOp};
