//! Shared application state
//! 
//! Este módulo define el estado compartido de la aplicación que se pasa
//! a través del router de Axum.

use std::sync::Arc;

use crate::config::environment::EnvironmentConfig;
use crate::services::SyncEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub config: EnvironmentConfig,
}

impl AppState {
    pub fn new(engine: Arc<SyncEngine>, config: EnvironmentConfig) -> Self {
        Self { engine, config }
    }
}
