//! Controladores
//!
//! Orquestan DTOs, validación y el núcleo de reconciliación para las rutas.

pub mod ops_controller;
pub mod trip_controller;

pub use ops_controller::OpsController;
pub use trip_controller::TripController;
