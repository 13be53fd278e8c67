use axum::{extract::State, routing::post, Form, Json, Router};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::routes::AppState;
use crate::services::oidc::Token;

#[derive(Deserialize)]
pub struct TokenForm {
    pub username: String,
    pub password: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/auth/token", post(login_for_access_token))
}

async fn login_for_access_token(
    State(state): State<AppState>,
    Form(form): Form<TokenForm>,
) -> AppResult<Json<Token>> {
    if form.username.trim().is_empty() || form.password.is_empty() {
        return Err(AppError::Validation("username and password are required".to_string()));
    }

    let token = state
        .oidc
        .password_grant(form.username.trim(), &form.password)
        .await?;

    tracing::debug!("Issued token for {}", form.username.trim());

    Ok(Json(token))
}
