use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::routes::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(healthcheck))
}

async fn healthcheck(State(state): State<AppState>) -> Response {
    if let Some(cache) = &state.cache {
        if let Err(e) = cache.ping().await {
            tracing::error!("Failed to ping Redis: {}", e);
            return unavailable();
        }
    }

    if !state.oidc.healthy().await {
        return unavailable();
    }

    Json(json!({ "status": "OK" })).into_response()
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "status": "Service Unavailable" })),
    )
        .into_response()
}
