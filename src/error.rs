use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Unavailable for legal reasons: {0}")]
    LegalRestriction(String),

    /// Error body relayed verbatim from the identity provider.
    #[error("Identity provider returned {status}")]
    AuthProvider {
        status: StatusCode,
        body: serde_json::Value,
    },
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::LegalRestriction(_) => StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS,
            AppError::AuthProvider { status, .. } => *status,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!("Error response: {} - {}", status, self);
        } else {
            tracing::debug!("Error response: {} - {}", status, self);
        }

        let message = match self {
            AppError::Database(_) => "Database error".to_string(),
            AppError::AuthProvider { body, .. } => return (status, Json(body)).into_response(),
            AppError::NotFound(msg)
            | AppError::Unauthorized(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg)
            | AppError::Validation(msg)
            | AppError::TooManyRequests(msg)
            | AppError::Internal(msg)
            | AppError::ExternalService(msg)
            | AppError::Unavailable(msg)
            | AppError::LegalRestriction(msg) => msg,
        };

        (status, Json(json!({ "detail": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn role_failures_and_client_errors_map_to_their_statuses() {
        let cases = [
            (AppError::Unauthorized("no".into()), StatusCode::UNAUTHORIZED),
            (AppError::BadRequest("no".into()), StatusCode::BAD_REQUEST),
            (AppError::Validation("no".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (AppError::LegalRestriction("no".into()), StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS),
            (AppError::ExternalService("no".into()), StatusCode::BAD_GATEWAY),
        ];

        for (error, status) in cases {
            let response = error.into_response();
            assert_eq!(response.status(), status);
            assert_eq!(body(response).await, json!({ "detail": "no" }));
        }
    }

    #[tokio::test]
    async fn provider_errors_are_relayed_verbatim() {
        let error = AppError::AuthProvider {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "error": "invalid_grant" }),
        };

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(response).await, json!({ "error": "invalid_grant" }));
    }
}
