//! Circuit breaker del reconciliador
//!
//! N fallos consecutivos dentro de la ventana abren el circuito durante el
//! cooldown. Al vencer pasa a half-open y deja pasar una única llamada de
//! prueba: su éxito lo cierra y su fallo lo vuelve a abrir. Mientras esa
//! llamada está en curso el resto se rechaza; una llamada de prueba abandonada
//! caduca con el cooldown.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::utils::errors::{AppError, AppResult};

#[derive(Debug, Default)]
struct BreakerInner {
    failure_count: u32,
    first_failure_at: Option<Instant>,
    open_until: Option<Instant>,
    half_open: bool,
    trial_started: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub remaining_cooldown_ms: u64,
    pub opened_total: u64,
    pub rejected_total: u64,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    opened_total: AtomicU64,
    rejected_total: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::default()),
            opened_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
        }
    }

    /// `Err(CircuitOpen)` mientras dure el cooldown o haya una llamada de prueba en curso
    pub async fn check(&self) -> AppResult<()> {
        let now = Instant::now();
        let mut lock = self.inner.lock().await;
        if let Some(until) = lock.open_until {
            if now < until {
                return Err(self.reject());
            }
            lock.open_until = None;
            lock.half_open = true;
            info!(breaker = %self.name, "🟡 Circuit breaker en half-open");
        }
        if lock.half_open {
            let trial_running = lock
                .trial_started
                .map_or(false, |started| now.duration_since(started) < self.config.cooldown);
            if trial_running {
                return Err(self.reject());
            }
            lock.trial_started = Some(now);
        }
        Ok(())
    }

    fn reject(&self) -> AppError {
        self.rejected_total.fetch_add(1, Ordering::Relaxed);
        AppError::CircuitOpen(self.name.clone())
    }

    pub async fn is_open(&self) -> bool {
        let lock = self.inner.lock().await;
        lock.open_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    pub async fn record_success(&self) {
        let mut lock = self.inner.lock().await;
        if lock.half_open {
            info!(breaker = %self.name, "🟢 Circuit breaker cerrado");
        }
        *lock = BreakerInner::default();
    }

    pub async fn record_failure(&self) {
        let now = Instant::now();
        let mut lock = self.inner.lock().await;

        let window_expired = lock
            .first_failure_at
            .map(|first| now.duration_since(first) > self.config.failure_window)
            .unwrap_or(true);
        if window_expired {
            lock.failure_count = 0;
            lock.first_failure_at = Some(now);
        }
        lock.failure_count += 1;

        if lock.half_open || lock.failure_count >= self.config.failure_threshold {
            lock.open_until = Some(now + self.config.cooldown);
            lock.half_open = false;
            lock.trial_started = None;
            self.opened_total.fetch_add(1, Ordering::Relaxed);
            warn!(
                breaker = %self.name,
                failures = lock.failure_count,
                cooldown_secs = self.config.cooldown.as_secs(),
                "🔴 Circuit breaker abierto"
            );
        }
    }

    pub async fn reset(&self) {
        let mut lock = self.inner.lock().await;
        *lock = BreakerInner::default();
    }

    pub async fn status(&self) -> BreakerStatus {
        let lock = self.inner.lock().await;
        let now = Instant::now();
        let (state, remaining) = match lock.open_until {
            Some(until) if now < until => (BreakerState::Open, until - now),
            // Vencido pero todavía nadie consultó `check`
            Some(_) => (BreakerState::HalfOpen, std::time::Duration::ZERO),
            None if lock.half_open => (BreakerState::HalfOpen, std::time::Duration::ZERO),
            None => (BreakerState::Closed, std::time::Duration::ZERO),
        };
        BreakerStatus {
            name: self.name.clone(),
            state,
            failure_count: lock.failure_count,
            remaining_cooldown_ms: remaining.as_millis() as u64,
            opened_total: self.opened_total.load(Ordering::Relaxed),
            rejected_total: self.rejected_total.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "driver-status",
            BreakerConfig {
                failure_threshold: 3,
                failure_window: Duration::from_secs(60),
                cooldown: Duration::from_secs(30),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_recovers() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.check().await.unwrap();
            breaker.record_failure().await;
        }

        assert!(matches!(breaker.check().await, Err(AppError::CircuitOpen(_))));
        assert_eq!(breaker.status().await.state, BreakerState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        breaker.check().await.unwrap();
        assert_eq!(breaker.status().await.state, BreakerState::HalfOpen);

        breaker.record_success().await;
        assert_eq!(breaker.status().await.state, BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_in_half_open_reopens() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        breaker.check().await.unwrap();

        breaker.record_failure().await;
        assert!(breaker.is_open().await);
        assert_eq!(breaker.status().await.opened_total, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_a_single_trial_call() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        breaker.check().await.unwrap();
        assert!(matches!(breaker.check().await, Err(AppError::CircuitOpen(_))));
        assert!(matches!(breaker.check().await, Err(AppError::CircuitOpen(_))));
        assert_eq!(breaker.status().await.rejected_total, 2);

        breaker.record_success().await;
        breaker.check().await.unwrap();
        breaker.check().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_call_expires_with_cooldown() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        breaker.check().await.unwrap();
        assert!(breaker.check().await.is_err());

        tokio::time::advance(Duration::from_secs(31)).await;
        breaker.check().await.unwrap();
        assert_eq!(breaker.status().await.state, BreakerState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_do_not_accumulate() {
        let breaker = breaker();
        breaker.record_failure().await;
        breaker.record_failure().await;
        tokio::time::advance(Duration::from_secs(61)).await;
        breaker.record_failure().await;

        assert!(!breaker.is_open().await);
        assert_eq!(breaker.status().await.failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let breaker = breaker();
        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        assert!(!breaker.is_open().await);
    }
}
