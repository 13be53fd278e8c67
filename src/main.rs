use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use civitas_api::audit::{AuditSink, LibsqlAuditSink, QueuedAuditSink};
use civitas_api::config::Config;
use civitas_api::db;
use civitas_api::guard::Guard;
use civitas_api::middleware::auth::{GroupNames, OidcAuthResolver};
use civitas_api::middleware::rate_limit::RateLimiter;
use civitas_api::routes::{create_router, AppState};
use civitas_api::services::{
    CortexClient, HttpRenderer, HttpWarehouse, JwksVerifier, MemoryRateLimiter, OidcClient,
    RedisCache, RedisConnector, RedisRateLimiter,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "civitas_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env().expect("Failed to load configuration");

    let db = db::create_database(&config.database_url, config.turso_auth_token.as_deref())
        .await
        .expect("Failed to create database");
    db::run_migrations(&db.connect()?).await?;
    let db = Arc::new(db);

    tracing::info!("Connected to database");

    let jwks = JwksVerifier::new(
        &config.oidc_jwks_url,
        &config.oidc_issuer_url,
        &config.oidc_client_id,
    );

    // Fetch keys on startup
    match jwks.initialize().await {
        Ok(count) => tracing::info!("JWKS cache initialized with {} keys", count),
        Err(e) => {
            tracing::warn!("Failed to initialize JWKS cache: {} - will retry on first request", e)
        }
    }

    let redis = match &config.redis_url {
        Some(url) => match RedisConnector::new(url) {
            Ok(redis) => {
                tracing::info!("Redis configured");
                Some(redis)
            }
            Err(e) => {
                tracing::error!("Invalid Redis URL: {} - using in-process rate limits", e);
                None
            }
        },
        None => {
            tracing::warn!("Redis not configured - rate limits are per-process and caching is off");
            None
        }
    };

    let limiter: Arc<dyn RateLimiter> = match &redis {
        Some(redis) => Arc::new(RedisRateLimiter::new(redis.clone())),
        None => Arc::new(MemoryRateLimiter::new()),
    };
    let cpf_limiter: Arc<dyn RateLimiter> = match &redis {
        Some(redis) => Arc::new(RedisRateLimiter::new(redis.clone())),
        None => Arc::new(MemoryRateLimiter::new()),
    };
    let cache = redis.map(RedisCache::new);

    let durable: Arc<dyn AuditSink> = Arc::new(LibsqlAuditSink::new(db.clone()));
    let queue = (config.audit_queue_capacity > 0).then(|| {
        tracing::info!("Audit writes buffered, capacity {}", config.audit_queue_capacity);
        Arc::new(QueuedAuditSink::spawn(durable.clone(), config.audit_queue_capacity))
    });
    let audit: Arc<dyn AuditSink> = match &queue {
        Some(queue) => queue.clone() as Arc<dyn AuditSink>,
        None => durable,
    };

    let auth = OidcAuthResolver::new(
        jwks,
        db.clone(),
        GroupNames {
            user: config.group_user.clone(),
            agent: config.group_agent.clone(),
            admin: config.group_admin.clone(),
        },
    );

    let mut guard = Guard::new(Arc::new(auth), limiter, audit, config.rate_limit_default);
    if !config.rate_limit_fail_open {
        tracing::info!("Rate limiter fails closed");
        guard = guard.fail_closed();
    }

    let state = AppState {
        db,
        oidc: OidcClient::new(
            &config.oidc_base_url,
            &config.oidc_token_url,
            &config.oidc_client_id,
            &config.oidc_client_secret,
            cache.clone(),
            config.oidc_token_cache_ttl,
        ),
        cortex: Arc::new(CortexClient::new(
            &config.cortex_base_url,
            &config.cortex_people_base_url,
            &config.cortex_username,
            &config.cortex_password,
        )),
        warehouse: Arc::new(HttpWarehouse::new(
            &config.warehouse_url,
            config.warehouse_token.as_deref(),
        )),
        renderer: Arc::new(HttpRenderer::new(&config.report_renderer_url)),
        cpf_limiter,
        cache,
        config: config.clone(),
    };

    let app = match create_router(state, guard) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!("Invalid route table: {}", e);
            return Err(e.into());
        }
    };

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(queue) = queue {
        tracing::info!("Flushing {} pending audit entries", queue.pending());
        queue.shutdown().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
