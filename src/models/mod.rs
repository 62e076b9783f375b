//! Modelos del sistema
//! 
//! Documentos que maneja el núcleo de reconciliación: viajes, vehículos,
//! drivers y su bitácora.

pub mod driver;
pub mod driver_log;
pub mod ordering;
pub mod trip;
pub mod trip_patch;
pub mod vehicle;

pub use driver::Driver;
pub use driver_log::{DriverLog, JoiningEvent, LeavingEvent};
pub use ordering::{compare_latest, day_bounds, select_latest, sort_latest_first, within_recency};
pub use trip::{
    is_named_driver, BulkWriteResult, DriverStatus, LoadStatus, NewTrip, StatusUpdate,
    TravelEntry, Trip, TripBulkOp, TripFilter, UpdateResult, NO_DRIVER,
};
pub use trip_patch::{apply_patch, TripPatch};
pub use vehicle::{TripDetails, Vehicle};
