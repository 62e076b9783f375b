//! Sesiones sobre PostgreSQL
//!
//! Cada sesión envuelve una `sqlx::Transaction`. El read concern se traduce a
//! nivel de aislamiento y el write concern con journal a `synchronous_commit`.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::any::Any;
use tracing::{debug, warn};

use super::session::{ReadConcern, Session, TransactionOptions, TransactionalConnection};
use crate::utils::errors::{AppError, AppResult};

/// Conexión lógica respaldada por un pool de PostgreSQL
#[derive(Clone)]
pub struct PgTransactionalConnection {
    name: String,
    pool: PgPool,
}

impl PgTransactionalConnection {
    pub fn new(name: impl Into<String>, pool: PgPool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionalConnection for PgTransactionalConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_session(&self) -> AppResult<Box<dyn Session>> {
        Ok(Box::new(PgSession {
            connection: self.name.clone(),
            pool: self.pool.clone(),
            transaction: None,
        }))
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn isolation_level(read_concern: ReadConcern) -> &'static str {
    match read_concern {
        ReadConcern::Local => "READ COMMITTED",
        ReadConcern::Majority => "REPEATABLE READ",
        ReadConcern::Snapshot => "SERIALIZABLE",
    }
}

pub struct PgSession {
    connection: String,
    pool: PgPool,
    transaction: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    /// Transacción activa, para usar como executor: `&mut **session.transaction()?`
    pub fn transaction(&mut self) -> AppResult<&mut Transaction<'static, Postgres>> {
        self.transaction
            .as_mut()
            .ok_or_else(|| AppError::NoSuchTransaction(self.connection.clone()))
    }
}

#[async_trait]
impl Session for PgSession {
    fn connection(&self) -> &str {
        &self.connection
    }

    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    async fn start_transaction(&mut self, options: &TransactionOptions) -> AppResult<()> {
        if self.transaction.is_some() {
            return Err(AppError::Conflict(format!(
                "Transaction already in progress on '{}'",
                self.connection
            )));
        }

        let mut tx = self.pool.begin().await?;
        let statement = format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            isolation_level(options.read_concern)
        );
        sqlx::query(&statement).execute(&mut *tx).await?;

        if options.write_concern.journal {
            sqlx::query("SET LOCAL synchronous_commit = on")
                .execute(&mut *tx)
                .await?;
        }

        debug!(connection = %self.connection, "🔒 Transacción iniciada");
        self.transaction = Some(tx);
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        let tx = self
            .transaction
            .take()
            .ok_or_else(|| AppError::NoSuchTransaction(self.connection.clone()))?;
        tx.commit().await?;
        Ok(())
    }

    async fn abort(&mut self) -> AppResult<()> {
        if let Some(tx) = self.transaction.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn end(&mut self) {
        if let Some(tx) = self.transaction.take() {
            if let Err(e) = tx.rollback().await {
                warn!(connection = %self.connection, "Rollback al cerrar sesión falló: {}", e);
            }
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
