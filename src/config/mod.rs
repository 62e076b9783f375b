//! Configuración del proyecto
//! 
//! Este módulo contiene la configuración de base de datos, variables de entorno
//! y los parámetros del núcleo de reconciliación.

pub mod database;
pub mod environment;
pub mod sync;

pub use database::DatabaseConfig;
pub use environment::*;
pub use sync::*;
