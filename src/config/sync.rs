//! Parámetros del núcleo de reconciliación
//!
//! Todos los umbrales que el sistema original tenía fijos en código viven aquí,
//! con los mismos valores por defecto.

use chrono::{Duration as ChronoDuration, FixedOffset, Offset, Utc};
use std::time::Duration;

use super::environment::env_parse;
use crate::utils::errors::{AppError, AppResult};

/// Configuración del pipeline de escritura de viajes
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sólo viajes que arrancaron dentro de esta ventana pueden tocar el driver del vehículo
    pub recency_window: ChronoDuration,
    /// Offset UTC usado para calcular el "día calendario" de un viaje
    pub day_offset_minutes: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recency_window: ChronoDuration::days(7),
            day_offset_minutes: 0,
        }
    }
}

impl PipelineConfig {
    pub fn day_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.day_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

/// Configuración del cache de vehículos/drivers
#[derive(Debug, Clone)]
pub struct VehicleCacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for VehicleCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            max_entries: 1000,
        }
    }
}

/// Configuración del circuit breaker del reconciliador
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Configuración de reintentos del coordinador de transacciones
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(50),
            max_jitter: Duration::from_millis(50),
        }
    }
}

/// Configuración de la cola de trabajos en segundo plano
#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    pub capacity: usize,
    pub concurrency: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            concurrency: 4,
        }
    }
}

/// Configuración del actualizador masivo de vehículos
#[derive(Debug, Clone)]
pub struct BulkUpdateConfig {
    pub write_timeout: Duration,
    pub fetch_concurrency: usize,
    pub reconcile_concurrency: usize,
}

impl Default for BulkUpdateConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(10),
            fetch_concurrency: 16,
            reconcile_concurrency: 8,
        }
    }
}

/// Agrupa todos los parámetros del núcleo
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub pipeline: PipelineConfig,
    pub cache: VehicleCacheConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub background: BackgroundConfig,
    pub bulk: BulkUpdateConfig,
}

impl SyncConfig {
    /// Lee los parámetros del entorno; cada variable ausente conserva su default
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();

        let recency_days: i64 = env_parse("RECENCY_WINDOW_DAYS", 7)?;
        if recency_days < 0 {
            return Err(AppError::Config(
                "RECENCY_WINDOW_DAYS must not be negative".to_string(),
            ));
        }

        let config = Self {
            pipeline: PipelineConfig {
                recency_window: ChronoDuration::days(recency_days),
                day_offset_minutes: env_parse("DAY_OFFSET_MINUTES", 0)?,
            },
            cache: VehicleCacheConfig {
                ttl: Duration::from_secs(env_parse("VEHICLE_CACHE_TTL_SECS", 60)?),
                max_entries: env_parse("VEHICLE_CACHE_MAX_ENTRIES", 1000)?,
            },
            breaker: BreakerConfig {
                failure_threshold: env_parse("BREAKER_FAILURE_THRESHOLD", 5)?,
                failure_window: Duration::from_secs(env_parse("BREAKER_WINDOW_SECS", 60)?),
                cooldown: Duration::from_secs(env_parse("BREAKER_COOLDOWN_SECS", 60)?),
            },
            retry: RetryConfig {
                max_retries: env_parse("TX_MAX_RETRIES", 5)?,
                base_delay: Duration::from_millis(env_parse("TX_BASE_DELAY_MS", 50)?),
                max_jitter: Duration::from_millis(env_parse("TX_MAX_JITTER_MS", 50)?),
            },
            background: BackgroundConfig {
                capacity: env_parse("BACKGROUND_QUEUE_CAPACITY", defaults.background.capacity)?,
                concurrency: env_parse(
                    "BACKGROUND_QUEUE_CONCURRENCY",
                    defaults.background.concurrency,
                )?,
            },
            bulk: BulkUpdateConfig {
                write_timeout: Duration::from_millis(env_parse("BULK_WRITE_TIMEOUT_MS", 10_000)?),
                fetch_concurrency: env_parse(
                    "BULK_FETCH_CONCURRENCY",
                    defaults.bulk.fetch_concurrency,
                )?,
                reconcile_concurrency: env_parse(
                    "RECONCILE_CONCURRENCY",
                    defaults.bulk.reconcile_concurrency,
                )?,
            },
        };

        if config.retry.max_retries == 0 {
            return Err(AppError::Config("TX_MAX_RETRIES must be at least 1".to_string()));
        }
        if config.background.concurrency == 0 || config.background.capacity == 0 {
            return Err(AppError::Config(
                "background queue needs capacity and concurrency > 0".to_string(),
            ));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_preserve_original_thresholds() {
        let config = SyncConfig::default();
        assert_eq!(config.pipeline.recency_window, ChronoDuration::days(7));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(50));
    }

    #[test]
    fn test_day_offset_from_minutes() {
        let config = PipelineConfig {
            day_offset_minutes: 330,
            ..Default::default()
        };
        assert_eq!(config.day_offset().local_minus_utc(), 330 * 60);
    }
}
