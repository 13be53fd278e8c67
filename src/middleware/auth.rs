use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use libsql::Database;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::models::{SyncUser, User};
use crate::services::jwks::{JwksVerifier, OidcClaims};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Admin,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Roles {
    pub user: bool,
    pub agent: bool,
    pub admin: bool,
}

/// The authenticated principal for a single request.
#[derive(Debug, Clone, Serialize)]
pub struct CallerIdentity {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub cpf: Option<String>,
    pub roles: Roles,
}

impl CallerIdentity {
    pub fn has_role(&self, role: Role) -> bool {
        match role {
            Role::User => self.roles.user,
            Role::Agent => self.roles.agent,
            Role::Admin => self.roles.admin,
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthFailure {
    #[error("Invalid credentials")]
    MissingCredential,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token is expired")]
    Expired,

    #[error("You do not have access to this application.")]
    NotAMember,

    #[error("You don't have permission to do this.")]
    InsufficientRole(Role),

    #[error("A registered CPF is required for this resource.")]
    MissingCpf,

    #[error("Identity backend error: {0}")]
    Backend(String),
}

impl AuthFailure {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthFailure::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            AuthFailure::Backend(_) => "Authentication service unavailable".to_string(),
            other => other.to_string(),
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Pulls the credential out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthFailure> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthFailure::MissingCredential)
}

#[async_trait]
pub trait AuthResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<CallerIdentity, AuthFailure>;
}

#[derive(Debug, Clone)]
pub struct GroupNames {
    pub user: String,
    pub agent: String,
    pub admin: String,
}

/// Verifies identity-provider tokens and keeps the local user table in step with them.
pub struct OidcAuthResolver {
    jwks: JwksVerifier,
    db: Arc<Database>,
    groups: GroupNames,
}

impl OidcAuthResolver {
    pub fn new(jwks: JwksVerifier, db: Arc<Database>, groups: GroupNames) -> Self {
        Self { jwks, db, groups }
    }

    fn profile(&self, claims: OidcClaims) -> SyncUser {
        let is_admin = claims.groups.iter().any(|g| *g == self.groups.admin);
        let is_agent = claims.groups.iter().any(|g| *g == self.groups.agent);

        SyncUser {
            username: claims.username().to_string(),
            full_name: claims.name,
            cpf: claims.cpf,
            registration: claims.matricula,
            agency: claims.orgao,
            sector: claims.setor,
            email: claims.email,
            is_admin,
            is_agent,
        }
    }
}

#[async_trait]
impl AuthResolver for OidcAuthResolver {
    async fn resolve(&self, credential: &str) -> Result<CallerIdentity, AuthFailure> {
        let claims = self.jwks.verify_token(credential).await?;

        if !claims.groups.iter().any(|g| *g == self.groups.user) {
            tracing::warn!("User {} is not in group {}", claims.username(), self.groups.user);
            return Err(AuthFailure::NotAMember);
        }

        let conn = self
            .db
            .connect()
            .map_err(|e| AuthFailure::Backend(e.to_string()))?;

        let user = User::sync(&conn, self.profile(claims))
            .await
            .map_err(|e| AuthFailure::Backend(e.to_string()))?;

        Ok(CallerIdentity::from(user))
    }
}

impl From<User> for CallerIdentity {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.full_name,
            cpf: user.cpf,
            roles: Roles {
                user: true,
                agent: user.is_agent,
                admin: user.is_admin,
            },
        }
    }
}

/// Token-to-identity table for exercising guarded routes without an identity provider.
#[cfg(test)]
#[derive(Default)]
pub struct StaticAuthResolver {
    identities: std::collections::HashMap<String, CallerIdentity>,
}

#[cfg(test)]
impl StaticAuthResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: &str, identity: CallerIdentity) -> Self {
        self.identities.insert(token.to_string(), identity);
        self
    }
}

#[cfg(test)]
#[async_trait]
impl AuthResolver for StaticAuthResolver {
    async fn resolve(&self, credential: &str) -> Result<CallerIdentity, AuthFailure> {
        match credential {
            "expired" => Err(AuthFailure::Expired),
            token => self
                .identities
                .get(token)
                .cloned()
                .ok_or_else(|| AuthFailure::InvalidToken("unknown token".to_string())),
        }
    }
}

#[cfg(test)]
pub fn test_identity(id: &str, roles: Roles) -> CallerIdentity {
    CallerIdentity {
        id: id.to_string(),
        username: format!("{}.user", id),
        display_name: Some(format!("User {}", id)),
        cpf: Some("12345678901".to_string()),
        roles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def");
    }

    #[test]
    fn rejects_missing_or_foreign_scheme() {
        let headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(AuthFailure::MissingCredential)));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert!(matches!(bearer_token(&headers), Err(AuthFailure::MissingCredential)));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(matches!(bearer_token(&headers), Err(AuthFailure::MissingCredential)));
    }

    #[test]
    fn backend_failures_are_not_401() {
        assert_eq!(AuthFailure::Expired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthFailure::InsufficientRole(Role::Admin).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthFailure::Backend("down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn roles_follow_user_flags() {
        let identity = test_identity(
            "7",
            Roles {
                user: true,
                agent: false,
                admin: true,
            },
        );
        assert!(identity.has_role(Role::User));
        assert!(identity.has_role(Role::Admin));
        assert!(!identity.has_role(Role::Agent));
    }
}
