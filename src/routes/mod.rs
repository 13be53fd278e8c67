pub mod auth;
pub mod cars;
pub mod companies;
pub mod cortex;
pub mod health;
pub mod pdf;
pub mod people;
pub mod users;

use std::sync::Arc;

use axum::{http::HeaderValue, routing::get, Json, Router};
use libsql::Database;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::guard::{ConfigurationError, Guard, RouteManifestEntry, RouteTable};
use crate::middleware::rate_limit::RateLimiter;
use crate::services::{DetectionWarehouse, OidcClient, RedisCache, RegistryLookup, ReportRenderer};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    pub cache: Option<RedisCache>,
    pub oidc: OidcClient,
    pub cortex: Arc<dyn RegistryLookup>,
    pub cpf_limiter: Arc<dyn RateLimiter>,
    pub warehouse: Arc<dyn DetectionWarehouse>,
    pub renderer: Arc<dyn ReportRenderer>,
}

/// Registers every guarded route, finalizes the table and mounts the open endpoints next to it.
pub fn create_router(state: AppState, guard: Guard) -> Result<Router, ConfigurationError> {
    let mut table = RouteTable::new(guard);
    cars::register(&mut table)?;
    cortex::register(&mut table)?;
    people::register(&mut table)?;
    companies::register(&mut table)?;
    users::register(&mut table)?;
    pdf::register(&mut table)?;

    let guarded = table.finalize()?;
    let manifest: Arc<Vec<RouteManifestEntry>> = Arc::new(guarded.manifest);
    let cors = cors_layer(&state.config.allowed_origins);

    Ok(Router::new()
        .merge(auth::routes())
        .merge(health::routes())
        .route(
            "/routes",
            get(move || {
                let manifest = manifest.clone();
                async move { Json(manifest.as_ref().clone()) }
            }),
        )
        .merge(guarded.router)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
