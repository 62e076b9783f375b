pub mod ops_routes;
pub mod trip_routes;

use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::cors::cors_middleware;
use crate::state::AppState;

const MAX_IN_FLIGHT_REQUESTS: usize = 256;

/// Router completo de la aplicación
pub fn create_router(state: AppState) -> Router {
    let cors = cors_middleware(&state.config.cors_origins);

    Router::new()
        .merge(ops_routes::create_ops_router())
        .nest("/api/trips", trip_routes::create_trip_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(ConcurrencyLimitLayer::new(MAX_IN_FLIGHT_REQUESTS))
                .layer(cors),
        )
        .with_state(state)
}
