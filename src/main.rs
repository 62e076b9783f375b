use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use dotenvy::dotenv;

use tanker_trip_sync::config::database::{LOGICAL_CONNECTIONS, TRANSPORT_CONNECTION};
use tanker_trip_sync::config::{DatabaseConfig, EnvironmentConfig, StorageBackend, SyncConfig};
use tanker_trip_sync::database::ConnectionRegistry;
use tanker_trip_sync::repositories::{MemoryStore, Stores};
use tanker_trip_sync::routes::create_router;
use tanker_trip_sync::state::AppState;
use tanker_trip_sync::SyncEngine;

const BACKGROUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Cargar variables de entorno
    dotenv().ok();

    let config = EnvironmentConfig::from_env()?;

    // Configurar logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚚 Tanker Trip Sync - núcleo de reconciliación");
    info!("================================================");

    let sync_config = SyncConfig::from_env()?;

    let (stores, registry) = match config.storage_backend {
        StorageBackend::Memory => {
            warn!("⚠️ STORAGE_BACKEND=memory: los datos no se persisten");
            let (registry, _) = ConnectionRegistry::memory(LOGICAL_CONNECTIONS);
            (Stores::memory(Arc::new(MemoryStore::new())), registry)
        }
        StorageBackend::Postgres => {
            let db_config = DatabaseConfig::from_env()?;
            let registry = match ConnectionRegistry::connect_postgres(&db_config).await {
                Ok(registry) => registry,
                Err(e) => {
                    error!("❌ Error conectando a la base de datos: {}", e);
                    return Err(anyhow::anyhow!("Error de base de datos: {}", e));
                }
            };
            let pool = registry
                .pool(TRANSPORT_CONNECTION)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("No pool for '{}'", TRANSPORT_CONNECTION))?;

            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("✅ Migraciones aplicadas");

            (Stores::postgres(pool), registry)
        }
    };

    let engine = Arc::new(SyncEngine::new(stores, Arc::new(registry), sync_config));
    let app_state = AppState::new(engine.clone(), config.clone());
    let app = create_router(app_state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    info!("🌐 Servidor iniciando en http://{}", addr);
    info!("🔍 Endpoints disponibles:");
    info!("   GET    /health - Health check");
    info!("   GET    /api/cache/stats - Estadísticas de cache");
    info!("   POST   /api/cache/clear - Limpiar cache");
    info!("   POST   /api/vehicles/:vehicle_no/reconcile - Reconciliar driver");
    info!("🛢️ Endpoints - Trips:");
    info!("   POST   /api/trips - Crear viaje");
    info!("   GET    /api/trips/:id - Obtener viaje");
    info!("   PATCH  /api/trips/:id - Actualizar viaje");
    info!("   DELETE /api/trips/:id - Eliminar viaje");
    info!("   POST   /api/trips/:id/status - Registrar estado");
    info!("   POST   /api/trips/bulk - Bulk write");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Error del servidor: {}", e);
    }

    info!("⏳ Esperando trabajos en segundo plano...");
    if tokio::time::timeout(BACKGROUND_DRAIN_TIMEOUT, engine.flush_background())
        .await
        .is_err()
    {
        warn!("⚠️ Trabajos en segundo plano sin terminar al apagar");
    }

    info!("👋 Servidor terminado");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("No se pudo instalar el handler de Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("No se pudo instalar el handler de SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("🛑 Señal Ctrl+C recibida, apagando servidor...");
        },
        _ = terminate => {
            info!("🛑 Señal de terminación recibida, apagando servidor...");
        },
    }
}
