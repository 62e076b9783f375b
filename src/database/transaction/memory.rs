//! Conexión transaccional en memoria
//!
//! Las escrituras quedan en staging hasta el commit y se descartan en el abort.
//! Permite inyectar fallos de commit para probar reintentos y commits parciales.

use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use super::session::{Session, TransactionOptions, TransactionalConnection};
use crate::utils::errors::{AppError, AppResult};

/// Fallo a inyectar en el próximo commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitFailure {
    WriteConflict,
    Fatal(String),
}

impl CommitFailure {
    fn into_error(self, connection: &str) -> AppError {
        match self {
            CommitFailure::WriteConflict => {
                AppError::WriteConflict(format!("commit conflict on '{}'", connection))
            }
            CommitFailure::Fatal(reason) => AppError::Internal(reason),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryShared {
    data: RwLock<BTreeMap<String, Value>>,
    commit_failures: Mutex<VecDeque<CommitFailure>>,
    offline: AtomicBool,
    sessions_started: AtomicU64,
    sessions_ended: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
}

/// Conexión lógica en memoria (clave -> documento JSON)
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    name: String,
    shared: Arc<MemoryShared>,
}

impl MemoryConnection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(MemoryShared::default()),
        }
    }

    /// Lectura del estado confirmado, fuera de cualquier transacción
    pub async fn read(&self, key: &str) -> Option<Value> {
        self.shared.data.read().await.get(key).cloned()
    }

    pub async fn committed_len(&self) -> usize {
        self.shared.data.read().await.len()
    }

    pub fn fail_next_commit(&self, failure: CommitFailure) {
        if let Ok(mut failures) = self.shared.commit_failures.lock() {
            failures.push_back(failure);
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    pub fn sessions_started(&self) -> u64 {
        self.shared.sessions_started.load(Ordering::SeqCst)
    }

    pub fn sessions_ended(&self) -> u64 {
        self.shared.sessions_ended.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> u64 {
        self.shared.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionalConnection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_session(&self) -> AppResult<Box<dyn Session>> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(AppError::Internal(format!(
                "network error: connection '{}' unreachable",
                self.name
            )));
        }
        self.shared.sessions_started.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            connection: self.name.clone(),
            shared: self.shared.clone(),
            staged: None,
            ended: false,
        }))
    }

    async fn ping(&self) -> AppResult<()> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(AppError::Internal(format!(
                "connection '{}' timed out",
                self.name
            )));
        }
        Ok(())
    }
}

/// `None` en staging = borrado
type Staged = BTreeMap<String, Option<Value>>;

pub struct MemorySession {
    connection: String,
    shared: Arc<MemoryShared>,
    staged: Option<Staged>,
    ended: bool,
}

impl MemorySession {
    fn staged_mut(&mut self) -> AppResult<&mut Staged> {
        self.staged
            .as_mut()
            .ok_or_else(|| AppError::NoSuchTransaction(self.connection.clone()))
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) -> AppResult<()> {
        self.staged_mut()?.insert(key.into(), Some(value));
        Ok(())
    }

    pub fn delete(&mut self, key: impl Into<String>) -> AppResult<()> {
        self.staged_mut()?.insert(key.into(), None);
        Ok(())
    }

    /// Lee primero lo escrito en esta transacción
    pub async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        let staged = self
            .staged
            .as_ref()
            .ok_or_else(|| AppError::NoSuchTransaction(self.connection.clone()))?;
        if let Some(value) = staged.get(key) {
            return Ok(value.clone());
        }
        Ok(self.shared.data.read().await.get(key).cloned())
    }
}

#[async_trait]
impl Session for MemorySession {
    fn connection(&self) -> &str {
        &self.connection
    }

    fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    async fn start_transaction(&mut self, _options: &TransactionOptions) -> AppResult<()> {
        if self.ended {
            return Err(AppError::Internal(format!(
                "session on '{}' already ended",
                self.connection
            )));
        }
        if self.staged.is_some() {
            return Err(AppError::Conflict(format!(
                "Transaction already in progress on '{}'",
                self.connection
            )));
        }
        self.staged = Some(BTreeMap::new());
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| AppError::NoSuchTransaction(self.connection.clone()))?;

        let injected = self
            .shared
            .commit_failures
            .lock()
            .ok()
            .and_then(|mut failures| failures.pop_front());
        if let Some(failure) = injected {
            self.shared.aborts.fetch_add(1, Ordering::SeqCst);
            return Err(failure.into_error(&self.connection));
        }

        let mut data = self.shared.data.write().await;
        for (key, value) in staged {
            match value {
                Some(value) => {
                    data.insert(key, value);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort(&mut self) -> AppResult<()> {
        if self.staged.take().is_some() {
            self.shared.aborts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn end(&mut self) {
        if self.ended {
            return;
        }
        if self.staged.take().is_some() {
            self.shared.aborts.fetch_add(1, Ordering::SeqCst);
        }
        self.ended = true;
        self.shared.sessions_ended.fetch_add(1, Ordering::SeqCst);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_staged_writes_visible_only_after_commit() {
        let connection = MemoryConnection::new("transport");
        let mut session = connection.start_session().await.unwrap();
        session
            .start_transaction(&TransactionOptions::default())
            .await
            .unwrap();

        let memory = session.as_any_mut().downcast_mut::<MemorySession>().unwrap();
        memory.put("trip:1", json!({ "rank_index": 0 })).unwrap();
        assert!(memory.get("trip:1").await.unwrap().is_some());
        assert!(connection.read("trip:1").await.is_none());

        session.commit().await.unwrap();
        assert_eq!(connection.read("trip:1").await, Some(json!({ "rank_index": 0 })));
    }

    #[tokio::test]
    async fn test_abort_discards_and_end_is_idempotent() {
        let connection = MemoryConnection::new("accounts");
        let mut session = connection.start_session().await.unwrap();
        session
            .start_transaction(&TransactionOptions::default())
            .await
            .unwrap();
        let memory = session.as_any_mut().downcast_mut::<MemorySession>().unwrap();
        memory.put("ledger:1", json!(10)).unwrap();

        session.abort().await.unwrap();
        session.end().await;
        session.end().await;

        assert_eq!(connection.committed_len().await, 0);
        assert_eq!(connection.sessions_ended(), 1);
        assert!(matches!(
            session.commit().await,
            Err(AppError::NoSuchTransaction(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_commit_failure() {
        let connection = MemoryConnection::new("identity");
        connection.fail_next_commit(CommitFailure::WriteConflict);

        let mut session = connection.start_session().await.unwrap();
        session
            .start_transaction(&TransactionOptions::default())
            .await
            .unwrap();
        let err = session.commit().await.unwrap_err();
        assert!(matches!(err, AppError::WriteConflict(_)));
        assert!(!session.in_transaction());
    }
}
