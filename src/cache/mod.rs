//! Cache
//! 
//! Este módulo contiene el cache en memoria de vehículos y drivers.

pub mod vehicle_cache;

pub use vehicle_cache::{CacheStats, CacheStatsSnapshot, VehicleCache};
