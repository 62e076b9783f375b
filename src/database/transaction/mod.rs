//! Coordinador de transacciones multi-conexión
//!
//! Abre una sesión por conexión lógica, inicia una transacción en cada una,
//! ejecuta el callback y confirma o aborta todo. Los errores transitorios
//! reintentan el intento completo con sesiones nuevas y backoff exponencial.
//!
//! No es una transacción distribuida: cada conexión confirma por separado, sin
//! 2PC. Si una conexión falla después de que otra confirmó, el resultado es
//! `AppError::PartialCommit` y no se reintenta.

pub mod cancel;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod session;

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::database::connection::ConnectionRegistry;
use crate::utils::errors::{AppError, AppResult};

pub use cancel::CancelSignal;
pub use memory::{CommitFailure, MemoryConnection, MemorySession};
pub use postgres::{PgSession, PgTransactionalConnection};
pub use retry::backoff_delay;
pub use session::{
    ReadConcern, Session, SessionSet, TransactionOptions, TransactionalConnection, WriteConcern,
};

pub struct TransactionCoordinator {
    registry: Arc<ConnectionRegistry>,
    retry: RetryConfig,
}

impl TransactionCoordinator {
    pub fn new(registry: Arc<ConnectionRegistry>, retry: RetryConfig) -> Self {
        Self { registry, retry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Ejecuta `callback` dentro de una transacción en cada conexión pedida
    ///
    /// El callback se invoca una vez por intento con un `SessionSet` nuevo.
    /// La cancelación siempre gana frente a un callback que termina tarde.
    pub async fn with_transaction<T, F>(
        &self,
        options: TransactionOptions,
        mut callback: F,
    ) -> AppResult<T>
    where
        T: Send,
        F: for<'s> FnMut(&'s mut SessionSet) -> BoxFuture<'s, AppResult<T>> + Send,
    {
        if options.connections.is_empty() {
            return Err(AppError::BadRequest(
                "with_transaction requires at least one connection".to_string(),
            ));
        }

        let max_attempts = options.max_retries.unwrap_or(self.retry.max_retries).max(1);
        let mut attempt: u32 = 0;

        loop {
            if is_cancelled(&options) {
                return Err(AppError::Cancelled);
            }

            match self.run_attempt(&options, &mut callback).await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(attempt = attempt + 1, "✅ Transacción confirmada tras reintentos");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    let delay = backoff_delay(&self.retry, attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "🔄 Error transitorio en transacción, reintentando: {}",
                        e
                    );
                    match &options.cancel {
                        Some(cancel) => {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(max_attempts, "❌ Reintentos agotados: {}", e);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Abre una sesión por conexión; si alguna falla se cierran las ya abiertas
    pub async fn open_sessions(&self, connections: &[String]) -> AppResult<SessionSet> {
        let mut sessions = SessionSet::new();
        for name in connections {
            let opened = match self.registry.get(name) {
                Ok(connection) => connection.start_session().await,
                Err(e) => Err(e),
            };
            match opened {
                Ok(session) => sessions.insert(session),
                Err(e) => {
                    sessions.end_all().await;
                    return Err(e);
                }
            }
        }
        Ok(sessions)
    }

    async fn run_attempt<T, F>(&self, options: &TransactionOptions, callback: &mut F) -> AppResult<T>
    where
        T: Send,
        F: for<'s> FnMut(&'s mut SessionSet) -> BoxFuture<'s, AppResult<T>> + Send,
    {
        let mut sessions = self.open_sessions(&options.connections).await?;
        let result = drive(&mut sessions, options, callback).await;
        sessions.end_all().await;
        result
    }
}

fn is_cancelled(options: &TransactionOptions) -> bool {
    options
        .cancel
        .as_ref()
        .map(CancelSignal::is_cancelled)
        .unwrap_or(false)
}

async fn drive<T, F>(
    sessions: &mut SessionSet,
    options: &TransactionOptions,
    callback: &mut F,
) -> AppResult<T>
where
    F: for<'s> FnMut(&'s mut SessionSet) -> BoxFuture<'s, AppResult<T>>,
{
    if let Err(e) = sessions.start_all(options).await {
        sessions.abort_all().await;
        return Err(e);
    }

    let outcome = match &options.cancel {
        Some(cancel) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AppError::Cancelled),
                result = callback(&mut *sessions) => result,
            }
        }
        None => callback(&mut *sessions).await,
    };

    let value = match outcome {
        Ok(value) => value,
        Err(e) => {
            debug!("Callback falló, abortando sesiones: {}", e);
            sessions.abort_all().await;
            return Err(e);
        }
    };

    // Una cancelación que llega junto con el resultado también gana
    if is_cancelled(options) {
        sessions.abort_all().await;
        return Err(AppError::Cancelled);
    }

    sessions.commit_all().await?;
    Ok(value)
}

/// Ejecuta `f` sobre sesiones ya abiertas: inicia, confirma o aborta; sin reintentos
///
/// Las sesiones quedan abiertas; cerrarlas es responsabilidad de quien las abrió.
pub async fn execute_in_transaction<T, F>(
    sessions: &mut SessionSet,
    options: &TransactionOptions,
    f: F,
) -> AppResult<T>
where
    F: for<'s> FnOnce(&'s mut SessionSet) -> BoxFuture<'s, AppResult<T>>,
{
    if let Err(e) = sessions.start_all(options).await {
        sessions.abort_all().await;
        return Err(e);
    }

    match f(&mut *sessions).await {
        Ok(value) => {
            sessions.commit_all().await?;
            Ok(value)
        }
        Err(e) => {
            sessions.abort_all().await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn coordinator(max_retries: u32) -> (TransactionCoordinator, MemoryConnection, MemoryConnection) {
        let transport = MemoryConnection::new("transport");
        let accounts = MemoryConnection::new("accounts");
        let mut registry = ConnectionRegistry::new();
        registry.register(Arc::new(transport.clone()));
        registry.register(Arc::new(accounts.clone()));
        let retry = RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_jitter: Duration::from_millis(1),
        };
        (
            TransactionCoordinator::new(Arc::new(registry), retry),
            transport,
            accounts,
        )
    }

    #[tokio::test]
    async fn test_commits_every_connection() {
        let (coordinator, transport, accounts) = coordinator(3);

        let result = coordinator
            .with_transaction(TransactionOptions::on(["transport", "accounts"]), |sessions| {
                Box::pin(async move {
                    sessions.memory("transport")?.put("trip:1", json!(1))?;
                    sessions.memory("accounts")?.put("entry:1", json!(2))?;
                    Ok(42)
                })
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(transport.read("trip:1").await, Some(json!(1)));
        assert_eq!(accounts.read("entry:1").await, Some(json!(2)));
        assert_eq!(transport.sessions_started(), transport.sessions_ended());
    }

    #[tokio::test]
    async fn test_unknown_connection_is_rejected() {
        let (coordinator, _, _) = coordinator(3);
        let result: AppResult<()> = coordinator
            .with_transaction(TransactionOptions::on(["fleet"]), |_| Box::pin(async { Ok(()) }))
            .await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_transient_commit_failure_is_retried() {
        let (coordinator, transport, _) = coordinator(3);
        transport.fail_next_commit(CommitFailure::WriteConflict);
        let calls = AtomicU32::new(0);

        coordinator
            .with_transaction(TransactionOptions::on(["transport"]), |sessions| {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    sessions.memory("transport")?.put("trip:1", json!("ok"))?;
                    Ok(())
                })
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(transport.read("trip:1").await, Some(json!("ok")));
    }

    #[tokio::test]
    async fn test_execute_in_transaction_aborts_on_error() {
        let (coordinator, transport, _) = coordinator(3);
        let mut sessions = coordinator
            .open_sessions(&["transport".to_string()])
            .await
            .unwrap();

        let result: AppResult<()> = execute_in_transaction(
            &mut sessions,
            &TransactionOptions::default(),
            |sessions| {
                Box::pin(async move {
                    sessions.memory("transport")?.put("trip:9", json!(9))?;
                    Err(AppError::BadRequest("invalid trip".into()))
                })
            },
        )
        .await;
        sessions.end_all().await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert!(transport.read("trip:9").await.is_none());
        assert_eq!(transport.sessions_ended(), 1);
    }
}
