//! Cola de trabajos en segundo plano
//!
//! Reemplaza las llamadas async "sin await" por una cola acotada: `submit` nunca
//! bloquea al llamador y `flush` permite esperar de forma determinista a que
//! terminen todos los trabajos pendientes (incluidos los que otros trabajos encolan).

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, error, warn};

use crate::config::BackgroundConfig;

struct Job {
    name: &'static str,
    future: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct QueueShared {
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    dropped: AtomicU64,
    pending: AtomicU64,
    idle: Notify,
}

impl QueueShared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Estadísticas de la cola
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
    pub dropped: u64,
    pub pending: u64,
    pub capacity: usize,
    pub concurrency: usize,
}

#[derive(Clone)]
pub struct BackgroundQueue {
    sender: mpsc::Sender<Job>,
    shared: Arc<QueueShared>,
    config: BackgroundConfig,
}

impl BackgroundQueue {
    /// Crea la cola y lanza su worker; requiere un runtime de tokio activo
    pub fn new(config: BackgroundConfig) -> Self {
        let capacity = config.capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let shared = Arc::new(QueueShared::default());

        tokio::spawn(run_worker(receiver, shared.clone(), config.concurrency.max(1)));

        Self {
            sender,
            shared,
            config,
        }
    }

    /// Encola un trabajo; `false` si la cola está llena y el trabajo se descartó
    pub fn submit<F>(&self, name: &'static str, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            name,
            future: future.boxed(),
        };

        match self.sender.try_send(job) {
            Ok(()) => {
                self.shared.submitted.fetch_add(1, Ordering::SeqCst);
                debug!(job = name, "📬 Trabajo encolado");
                true
            }
            Err(e) => {
                self.shared.dropped.fetch_add(1, Ordering::SeqCst);
                self.shared.finish_one();
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "queue closed",
                };
                warn!(job = name, reason, "⚠️ Trabajo en segundo plano descartado");
                false
            }
        }
    }

    /// Espera a que no quede ningún trabajo pendiente
    pub async fn flush(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.shared.submitted.load(Ordering::SeqCst),
            completed: self.shared.completed.load(Ordering::SeqCst),
            panicked: self.shared.panicked.load(Ordering::SeqCst),
            dropped: self.shared.dropped.load(Ordering::SeqCst),
            pending: self.shared.pending.load(Ordering::SeqCst),
            capacity: self.config.capacity,
            concurrency: self.config.concurrency,
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<Job>,
    shared: Arc<QueueShared>,
    concurrency: usize,
) {
    let permits = Arc::new(Semaphore::new(concurrency));

    while let Some(job) = receiver.recv().await {
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let shared = shared.clone();

        tokio::spawn(async move {
            let _permit = permit;
            match AssertUnwindSafe(job.future).catch_unwind().await {
                Ok(()) => {
                    shared.completed.fetch_add(1, Ordering::SeqCst);
                }
                Err(_) => {
                    shared.panicked.fetch_add(1, Ordering::SeqCst);
                    error!(job = job.name, "💥 Trabajo en segundo plano entró en pánico");
                }
            }
            shared.finish_one();
        });
    }

    debug!("Worker de la cola en segundo plano detenido");
}
