//! Núcleo de reconciliación de viajes y vehículos
//!
//! Mantiene consistentes el puntero "latest trip" y la asignación de drivers de
//! cada tanquero frente a escrituras concurrentes, bulk writes y borrados, y
//! coordina transacciones sobre varias conexiones lógicas.

pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod dto;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

pub use services::SyncEngine;
pub use utils::errors::{AppError, AppResult};
