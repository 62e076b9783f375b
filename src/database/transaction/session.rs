//! Sesiones transaccionales por conexión lógica

use async_trait::async_trait;
use std::any::Any;
use std::collections::BTreeMap;
use tracing::warn;

use super::cancel::CancelSignal;
use super::memory::MemorySession;
use super::postgres::PgSession;
use crate::utils::errors::{AppError, AppResult};

/// Nivel de lectura pedido a cada transacción
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadConcern {
    Local,
    #[default]
    Majority,
    Snapshot,
}

/// Garantía de durabilidad del commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteConcern {
    pub majority: bool,
    pub journal: bool,
}

impl Default for WriteConcern {
    fn default() -> Self {
        Self {
            majority: true,
            journal: true,
        }
    }
}

/// Opciones de `with_transaction`
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Conexiones lógicas que participan, en orden de commit
    pub connections: Vec<String>,
    pub read_concern: ReadConcern,
    pub write_concern: WriteConcern,
    /// Sobrescribe el máximo de intentos configurado
    pub max_retries: Option<u32>,
    pub cancel: Option<CancelSignal>,
}

impl TransactionOptions {
    pub fn on<I, S>(connections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            connections: connections.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn read_concern(mut self, read_concern: ReadConcern) -> Self {
        self.read_concern = read_concern;
        self
    }

    pub fn write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = write_concern;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn cancel_on(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Conexión lógica capaz de abrir sesiones
#[async_trait]
pub trait TransactionalConnection: Send + Sync {
    fn name(&self) -> &str;

    async fn start_session(&self) -> AppResult<Box<dyn Session>>;

    async fn ping(&self) -> AppResult<()>;
}

/// Sesión abierta contra una conexión
///
/// `end` es idempotente y nunca falla: se llama en todas las salidas.
#[async_trait]
pub trait Session: Any + Send {
    fn connection(&self) -> &str;

    fn in_transaction(&self) -> bool;

    async fn start_transaction(&mut self, options: &TransactionOptions) -> AppResult<()>;

    async fn commit(&mut self) -> AppResult<()>;

    async fn abort(&mut self) -> AppResult<()>;

    async fn end(&mut self);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Una sesión por conexión lógica, viva durante un intento
pub struct SessionSet {
    order: Vec<String>,
    sessions: BTreeMap<String, Box<dyn Session>>,
}

impl SessionSet {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            sessions: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, session: Box<dyn Session>) {
        let name = session.connection().to_string();
        if self.sessions.insert(name.clone(), session).is_none() {
            self.order.push(name);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn connections(&self) -> &[String] {
        &self.order
    }

    pub fn get(&mut self, connection: &str) -> AppResult<&mut (dyn Session + 'static)> {
        self.sessions
            .get_mut(connection)
            .map(|session| session.as_mut())
            .ok_or_else(|| AppError::NoSuchTransaction(connection.to_string()))
    }

    /// Sesión Postgres de la conexión (para ejecutar SQL dentro de la transacción)
    pub fn postgres(&mut self, connection: &str) -> AppResult<&mut PgSession> {
        self.get(connection)?
            .as_any_mut()
            .downcast_mut::<PgSession>()
            .ok_or_else(|| {
                AppError::Internal(format!("Connection '{}' is not a postgres session", connection))
            })
    }

    pub fn memory(&mut self, connection: &str) -> AppResult<&mut MemorySession> {
        self.get(connection)?
            .as_any_mut()
            .downcast_mut::<MemorySession>()
            .ok_or_else(|| {
                AppError::Internal(format!("Connection '{}' is not a memory session", connection))
            })
    }

    pub async fn start_all(&mut self, options: &TransactionOptions) -> AppResult<()> {
        for name in &self.order {
            if let Some(session) = self.sessions.get_mut(name) {
                session.start_transaction(options).await?;
            }
        }
        Ok(())
    }

    /// Commit en orden; no hay 2PC entre conexiones
    ///
    /// Si falla la primera conexión se aborta el resto y se devuelve el error
    /// original (reintentable). Si ya confirmó alguna, el resultado es
    /// `PartialCommit` y no se reintenta.
    pub async fn commit_all(&mut self) -> AppResult<()> {
        let mut committed = Vec::new();

        for name in self.order.clone() {
            let Some(session) = self.sessions.get_mut(&name) else {
                continue;
            };
            if let Err(e) = session.commit().await {
                self.abort_all().await;
                if committed.is_empty() {
                    return Err(e);
                }
                warn!(
                    connection = %name,
                    committed = ?committed,
                    "⚠️ Commit parcial entre conexiones: {}",
                    e
                );
                return Err(AppError::PartialCommit {
                    committed,
                    failed: name,
                    reason: e.to_string(),
                });
            }
            committed.push(name);
        }
        Ok(())
    }

    /// Aborta las transacciones activas; los errores sólo se registran
    pub async fn abort_all(&mut self) {
        for (name, session) in self.sessions.iter_mut() {
            if !session.in_transaction() {
                continue;
            }
            if let Err(e) = session.abort().await {
                warn!(connection = %name, "Error abortando transacción: {}", e);
            }
        }
    }

    pub async fn end_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.end().await;
        }
    }
}

impl Default for SessionSet {
    fn default() -> Self {
        Self::new()
    }
}
