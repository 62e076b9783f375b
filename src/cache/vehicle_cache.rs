//! Cache de vehículos y drivers
//!
//! Cache en memoria de corta vida para no repetir lecturas durante una ráfaga de
//! reconciliación. Acotado por tamaño (LRU) y por TTL. Nunca es la fuente de
//! verdad: el mantenimiento del puntero "latest trip" siempre lee de la base.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::VehicleCacheConfig;
use crate::models::{Driver, Vehicle};
use crate::repositories::{DriverRepository, VehicleRepository};
use crate::utils::errors::AppResult;

/// Datos en cache con metadatos
#[derive(Debug, Clone)]
struct CachedEntry<T> {
    value: T,
    stored_at: Instant,
    last_accessed: Instant,
}

/// Estadísticas del cache
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries_created: u64,
    pub entries_expired: u64,
    pub entries_evicted: u64,
    pub invalidations: u64,
    /// Lecturas descartadas porque una invalidación llegó mientras se leía la base
    pub stale_fills_skipped: u64,
}

/// Foto de las estadísticas para herramientas operativas
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub vehicles_cached: usize,
    pub drivers_cached: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub hit_rate: f64,
    #[serde(flatten)]
    pub counters: CacheStats,
}

/// Marca tomada antes de leer la base; sólo se guarda el valor si sigue vigente
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FillTicket {
    epoch: u64,
    generation: u64,
}

enum Lookup<T> {
    Hit(T),
    Miss(FillTicket),
}

/// Mapa con TTL, desalojo LRU y generaciones por clave
///
/// Una clave sólo tiene generación mientras haya lecturas a la base en curso
/// para ella; la última lectura en terminar la descarta.
#[derive(Debug)]
struct TtlMap<T> {
    entries: HashMap<String, CachedEntry<T>>,
    pending_fills: HashMap<String, u32>,
    generations: HashMap<String, u64>,
    epoch: u64,
}

impl<T: Clone> TtlMap<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            pending_fills: HashMap::new(),
            generations: HashMap::new(),
            epoch: 0,
        }
    }

    fn ticket(&self, key: &str) -> FillTicket {
        FillTicket {
            epoch: self.epoch,
            generation: self.generations.get(key).copied().unwrap_or(0),
        }
    }

    fn begin_fill(&mut self, key: &str) -> FillTicket {
        *self.pending_fills.entry(key.to_string()).or_insert(0) += 1;
        self.ticket(key)
    }

    /// Cierra una lectura en curso; la lectura fallida o vacía también pasa por aquí
    fn finish_fill(&mut self, key: &str) {
        if let Some(pending) = self.pending_fills.get_mut(key) {
            *pending = pending.saturating_sub(1);
            if *pending == 0 {
                self.pending_fills.remove(key);
                self.generations.remove(key);
            }
        }
    }

    fn lookup(&mut self, key: &str, config: &VehicleCacheConfig, stats: &mut CacheStats) -> Lookup<T> {
        let now = Instant::now();
        let expired = match self.entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.stored_at) <= config.ttl => {
                entry.last_accessed = now;
                stats.hits += 1;
                return Lookup::Hit(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(key);
            stats.entries_expired += 1;
        }
        stats.misses += 1;
        Lookup::Miss(self.begin_fill(key))
    }

    fn fill(
        &mut self,
        key: &str,
        value: T,
        ticket: FillTicket,
        config: &VehicleCacheConfig,
        stats: &mut CacheStats,
    ) {
        let current = self.ticket(key);
        self.finish_fill(key);
        if current != ticket {
            stats.stale_fills_skipped += 1;
            return;
        }
        if !self.entries.contains_key(key) && self.entries.len() >= config.max_entries {
            self.evict_lru(stats);
        }
        let now = Instant::now();
        self.entries.insert(
            key.to_string(),
            CachedEntry {
                value,
                stored_at: now,
                last_accessed: now,
            },
        );
        stats.entries_created += 1;
    }

    fn invalidate(&mut self, key: &str) -> bool {
        if self.pending_fills.contains_key(key) {
            *self.generations.entry(key.to_string()).or_insert(0) += 1;
        }
        self.entries.remove(key).is_some()
    }

    fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.generations.clear();
        self.epoch += 1;
        removed
    }

    fn purge_expired(&mut self, config: &VehicleCacheConfig) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.duration_since(entry.stored_at) <= config.ttl);
        before - self.entries.len()
    }

    /// Eliminar la entrada con menor last_accessed
    fn evict_lru(&mut self, stats: &mut CacheStats) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
            stats.entries_evicted += 1;
            debug!("Entrada LRU eliminada: {}", key);
        }
    }
}

struct CacheInner {
    vehicles: TtlMap<Vehicle>,
    drivers: TtlMap<Driver>,
    stats: CacheStats,
}

/// Cache de vehículos y drivers, inyectado en el pipeline
pub struct VehicleCache {
    vehicles: Arc<dyn VehicleRepository>,
    drivers: Arc<dyn DriverRepository>,
    config: VehicleCacheConfig,
    inner: RwLock<CacheInner>,
}

fn driver_key(name_or_code: &str) -> String {
    name_or_code.trim().to_lowercase()
}

impl VehicleCache {
    pub fn new(
        config: VehicleCacheConfig,
        vehicles: Arc<dyn VehicleRepository>,
        drivers: Arc<dyn DriverRepository>,
    ) -> Self {
        Self {
            vehicles,
            drivers,
            config,
            inner: RwLock::new(CacheInner {
                vehicles: TtlMap::new(),
                drivers: TtlMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Proyección cacheada del vehículo; lee la base si no está o expiró
    pub async fn get_vehicle(&self, vehicle_no: &str) -> AppResult<Option<Vehicle>> {
        let ticket = {
            let mut inner = self.inner.write().await;
            let CacheInner { vehicles, stats, .. } = &mut *inner;
            match vehicles.lookup(vehicle_no, &self.config, stats) {
                Lookup::Hit(vehicle) => {
                    debug!(vehicle_no, "📥 Cache HIT vehículo");
                    return Ok(Some(vehicle));
                }
                Lookup::Miss(ticket) => ticket,
            }
        };

        // El lock no se mantiene durante la lectura a la base
        let fetched = self.vehicles.find_by_number(vehicle_no).await;

        let mut inner = self.inner.write().await;
        let CacheInner { vehicles, stats, .. } = &mut *inner;
        match &fetched {
            Ok(Some(vehicle)) => {
                vehicles.fill(vehicle_no, vehicle.clone(), ticket, &self.config, stats)
            }
            _ => vehicles.finish_fill(vehicle_no),
        }
        fetched
    }

    /// Driver por nombre o código ITPL, cacheado
    pub async fn get_driver(&self, name_or_code: &str) -> AppResult<Option<Driver>> {
        let key = driver_key(name_or_code);
        let ticket = {
            let mut inner = self.inner.write().await;
            let CacheInner { drivers, stats, .. } = &mut *inner;
            match drivers.lookup(&key, &self.config, stats) {
                Lookup::Hit(driver) => return Ok(Some(driver)),
                Lookup::Miss(ticket) => ticket,
            }
        };

        let fetched = self.drivers.find_by_name_or_code(name_or_code).await;

        let mut inner = self.inner.write().await;
        let CacheInner { drivers, stats, .. } = &mut *inner;
        match &fetched {
            Ok(Some(driver)) => drivers.fill(&key, driver.clone(), ticket, &self.config, stats),
            _ => drivers.finish_fill(&key),
        }
        fetched
    }

    pub async fn invalidate_vehicle(&self, vehicle_no: &str) {
        let mut inner = self.inner.write().await;
        inner.vehicles.invalidate(vehicle_no);
        inner.stats.invalidations += 1;
    }

    pub async fn invalidate_vehicles<'a, I>(&self, vehicle_nos: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut inner = self.inner.write().await;
        for vehicle_no in vehicle_nos {
            inner.vehicles.invalidate(vehicle_no);
            inner.stats.invalidations += 1;
        }
    }

    pub async fn invalidate_driver(&self, name_or_code: &str) {
        let mut inner = self.inner.write().await;
        inner.drivers.invalidate(&driver_key(name_or_code));
        inner.stats.invalidations += 1;
    }

    /// Limpiar todo el cache; devuelve las entradas eliminadas
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.write().await;
        let removed = inner.vehicles.clear() + inner.drivers.clear();
        tracing::info!(removed, "🧹 Cache de vehículos limpiado");
        removed
    }

    /// Limpiar entradas expiradas
    pub async fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.write().await;
        let removed =
            inner.vehicles.purge_expired(&self.config) + inner.drivers.purge_expired(&self.config);
        inner.stats.entries_expired += removed as u64;
        removed
    }

    pub async fn stats(&self) -> CacheStatsSnapshot {
        let inner = self.inner.read().await;
        let lookups = inner.stats.hits + inner.stats.misses;
        CacheStatsSnapshot {
            vehicles_cached: inner.vehicles.entries.len(),
            drivers_cached: inner.drivers.entries.len(),
            max_entries: self.config.max_entries,
            ttl_secs: self.config.ttl.as_secs(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.stats.hits as f64 / lookups as f64
            },
            counters: inner.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::MemoryStore;
    use std::time::Duration;

    async fn cache_with(config: VehicleCacheConfig) -> (Arc<MemoryStore>, VehicleCache) {
        let store = Arc::new(MemoryStore::new());
        store.insert_vehicle(Vehicle::new("GJ-01-AB-1234")).await;
        store.insert_vehicle(Vehicle::new("GJ-02-CD-5678")).await;
        store
            .insert_driver(Driver::new("Ramesh Patel").with_code("ITPL-0042"))
            .await;
        let cache = VehicleCache::new(config, store.clone(), store.clone());
        (store, cache)
    }

    #[tokio::test]
    async fn test_cache_hit_after_first_lookup() {
        let (_, cache) = cache_with(VehicleCacheConfig::default()).await;

        assert!(cache.get_vehicle("GJ-01-AB-1234").await.unwrap().is_some());
        assert!(cache.get_vehicle("GJ-01-AB-1234").await.unwrap().is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.counters.misses, 1);
        assert_eq!(stats.counters.hits, 1);
        assert_eq!(stats.vehicles_cached, 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_fresh_read() {
        let (store, cache) = cache_with(VehicleCacheConfig::default()).await;
        cache.get_vehicle("GJ-01-AB-1234").await.unwrap();

        store
            .insert_vehicle(Vehicle::new("GJ-01-AB-1234").with_driver("Suresh"))
            .await;
        let stale = cache.get_vehicle("GJ-01-AB-1234").await.unwrap().unwrap();
        assert_eq!(stale.current_driver(), None);

        cache.invalidate_vehicle("GJ-01-AB-1234").await;
        let fresh = cache.get_vehicle("GJ-01-AB-1234").await.unwrap().unwrap();
        assert_eq!(fresh.current_driver(), Some("Suresh"));
    }

    #[tokio::test]
    async fn test_lru_eviction_respects_capacity() {
        let (_, cache) = cache_with(VehicleCacheConfig {
            ttl: Duration::from_secs(60),
            max_entries: 1,
        })
        .await;

        cache.get_vehicle("GJ-01-AB-1234").await.unwrap();
        cache.get_vehicle("GJ-02-CD-5678").await.unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.vehicles_cached, 1);
        assert_eq!(stats.counters.entries_evicted, 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_refetched() {
        let (_, cache) = cache_with(VehicleCacheConfig {
            ttl: Duration::from_millis(0),
            max_entries: 10,
        })
        .await;

        cache.get_vehicle("GJ-01-AB-1234").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.get_vehicle("GJ-01-AB-1234").await.unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.counters.misses, 2);
        assert_eq!(stats.counters.entries_expired, 1);
    }

    #[tokio::test]
    async fn test_driver_lookup_by_code_is_case_insensitive() {
        let (_, cache) = cache_with(VehicleCacheConfig::default()).await;
        let driver = cache.get_driver("itpl-0042").await.unwrap().unwrap();
        assert_eq!(driver.name, "Ramesh Patel");
        assert!(cache.get_driver("ITPL-0042").await.unwrap().is_some());
        assert_eq!(cache.stats().await.counters.hits, 1);
    }

    #[test]
    fn test_fill_is_skipped_after_invalidation() {
        let config = VehicleCacheConfig::default();
        let mut stats = CacheStats::default();
        let mut map: TtlMap<u32> = TtlMap::new();

        let ticket = match map.lookup("V1", &config, &mut stats) {
            Lookup::Miss(ticket) => ticket,
            Lookup::Hit(_) => unreachable!(),
        };
        map.invalidate("V1");
        map.fill("V1", 7, ticket, &config, &mut stats);

        assert!(map.entries.is_empty());
        assert_eq!(stats.stale_fills_skipped, 1);
        assert!(map.generations.is_empty());
        assert!(map.pending_fills.is_empty());
    }

    #[tokio::test]
    async fn test_invalidations_do_not_accumulate_generations() {
        let (store, cache) = cache_with(VehicleCacheConfig::default()).await;
        for i in 0..50 {
            let vehicle_no = format!("GJ-09-ZZ-{:04}", i);
            store.insert_vehicle(Vehicle::new(vehicle_no.clone())).await;
            cache.get_vehicle(&vehicle_no).await.unwrap();
            cache.invalidate_vehicle(&vehicle_no).await;
        }
        cache.get_vehicle("GJ-00-NO-0000").await.unwrap();
        cache.invalidate_vehicle("GJ-00-NO-0000").await;

        let inner = cache.inner.read().await;
        assert!(inner.vehicles.generations.is_empty());
        assert!(inner.vehicles.pending_fills.is_empty());
        assert!(inner.vehicles.entries.is_empty());
    }
}
