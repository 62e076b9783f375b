//! Registro de conexiones lógicas
//!
//! Resuelve nombres ("transport", "accounts", "identity") a conexiones capaces
//! de abrir sesiones, y las verifica para el health check.

use serde::Serialize;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::transaction::{MemoryConnection, PgTransactionalConnection, TransactionalConnection};
use crate::config::DatabaseConfig;
use crate::utils::errors::{AppError, AppResult};

/// Resultado del ping de una conexión
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub name: String,
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<String, Arc<dyn TransactionalConnection>>,
    pools: BTreeMap<String, PgPool>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connection: Arc<dyn TransactionalConnection>) {
        self.connections
            .insert(connection.name().to_string(), connection);
    }

    /// Un pool por conexión lógica; conexiones con la misma URL comparten pool
    pub async fn connect_postgres(config: &DatabaseConfig) -> AppResult<Self> {
        let mut registry = Self::new();
        let mut by_url: BTreeMap<String, PgPool> = BTreeMap::new();

        for (name, url) in &config.urls {
            let pool = match by_url.get(url) {
                Some(pool) => pool.clone(),
                None => {
                    let pool = config.create_pool(name).await?;
                    by_url.insert(url.clone(), pool.clone());
                    pool
                }
            };
            registry.register(Arc::new(PgTransactionalConnection::new(
                name.clone(),
                pool.clone(),
            )));
            registry.pools.insert(name.clone(), pool);
        }

        info!(
            connections = ?registry.names(),
            pools = by_url.len(),
            "✅ Conexiones lógicas registradas"
        );
        Ok(registry)
    }

    /// Registro en memoria; devuelve también las conexiones para inspección
    pub fn memory<I, S>(names: I) -> (Self, Vec<MemoryConnection>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        let mut handles = Vec::new();
        for name in names {
            let connection = MemoryConnection::new(name);
            handles.push(connection.clone());
            registry.register(Arc::new(connection));
        }
        (registry, handles)
    }

    pub fn get(&self, name: &str) -> AppResult<Arc<dyn TransactionalConnection>> {
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("Unknown logical connection '{}'", name)))
    }

    pub fn pool(&self, name: &str) -> Option<&PgPool> {
        self.pools.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    pub async fn ping_all(&self) -> Vec<ConnectionHealth> {
        let checks = self.connections.iter().map(|(name, connection)| async move {
            let started = Instant::now();
            let result = connection.ping().await;
            let latency_ms = started.elapsed().as_millis() as u64;
            if let Err(e) = &result {
                warn!(connection = %name, "⚠️ Ping fallido: {}", e);
            }
            ConnectionHealth {
                name: name.clone(),
                healthy: result.is_ok(),
                latency_ms,
                error: result.err().map(|e| e.to_string()),
            }
        });
        futures::future::join_all(checks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_registry_resolves_names() {
        let (registry, handles) = ConnectionRegistry::memory(["transport", "accounts"]);
        assert_eq!(handles.len(), 2);
        assert_eq!(registry.get("transport").unwrap().name(), "transport");
        assert!(matches!(registry.get("fleet"), Err(AppError::Config(_))));
        assert!(registry.pool("transport").is_none());
    }

    #[tokio::test]
    async fn test_ping_all_reports_offline_connections() {
        let (registry, handles) = ConnectionRegistry::memory(["transport", "identity"]);
        handles[1].set_offline(true);

        let health = registry.ping_all().await;
        let identity = health.iter().find(|h| h.name == "identity").unwrap();
        assert!(!identity.healthy);
        assert!(identity.error.is_some());
        assert!(health.iter().any(|h| h.name == "transport" && h.healthy));
    }
}
