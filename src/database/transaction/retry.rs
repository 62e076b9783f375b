//! Clasificación de errores transitorios y backoff

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::utils::errors::AppError;

/// serialization_failure: el equivalente a un write conflict
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";
/// no_active_sql_transaction
const SQLSTATE_NO_ACTIVE_TRANSACTION: &str = "25P01";

const NETWORK_PATTERNS: [&str; 7] = [
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "network",
];

fn matches_network_pattern(message: &str) -> bool {
    let message = message.to_lowercase();
    NETWORK_PATTERNS.iter().any(|pattern| message.contains(pattern))
}

fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(SQLSTATE_SERIALIZATION_FAILURE)
            | Some(SQLSTATE_DEADLOCK_DETECTED)
            | Some(SQLSTATE_NO_ACTIVE_TRANSACTION) => true,
            _ => matches_network_pattern(db.message()),
        },
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        other => matches_network_pattern(&other.to_string()),
    }
}

impl AppError {
    /// `true` si el intento completo puede repetirse con sesiones nuevas
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Database(e) => is_transient_sqlx(e),
            AppError::WriteConflict(_)
            | AppError::TransientTransaction(_)
            | AppError::NoSuchTransaction(_)
            | AppError::Timeout(_) => true,
            AppError::Cancelled | AppError::PartialCommit { .. } => false,
            AppError::Internal(message) => matches_network_pattern(message),
            _ => false,
        }
    }
}

/// `base * 2^attempt + random(0..=jitter)`
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.min(16);
    let jitter_ms = config.max_jitter.as_millis() as u64;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    config.base_delay.saturating_mul(factor) + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::WriteConflict("doc".into()).is_transient());
        assert!(AppError::TransientTransaction("label".into()).is_transient());
        assert!(AppError::NoSuchTransaction("transport".into()).is_transient());
        assert!(AppError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(AppError::Internal("socket connection reset by peer".into()).is_transient());

        assert!(!AppError::Cancelled.is_transient());
        assert!(!AppError::BadRequest("nope".into()).is_transient());
        assert!(!AppError::PartialCommit {
            committed: vec!["transport".into()],
            failed: "accounts".into(),
            reason: "timeout".into(),
        }
        .is_transient());
    }

    #[test]
    fn test_backoff_grows_exponentially_within_jitter() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(50),
            max_jitter: Duration::from_millis(50),
        };

        for attempt in 0..4 {
            let delay = backoff_delay(&config, attempt);
            let floor = Duration::from_millis(50 * (1 << attempt));
            assert!(delay >= floor);
            assert!(delay <= floor + Duration::from_millis(50));
        }
    }

    #[test]
    fn test_backoff_without_jitter_is_exact() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_jitter: Duration::ZERO,
        };
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(40));
    }
}
