use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};
use crate::services::cache::RedisCache;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: u64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Client for the identity provider's token and health endpoints.
#[derive(Clone)]
pub struct OidcClient {
    client: Client,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    cache: Option<RedisCache>,
    cache_ttl: u64,
}

impl OidcClient {
    pub fn new(
        base_url: &str,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        cache: Option<RedisCache>,
        cache_ttl: u64,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            cache,
            cache_ttl,
        }
    }

    /// Resource-owner password grant. Successful tokens are cached per
    /// username and password digest; provider rejections are relayed as-is.
    pub async fn password_grant(&self, username: &str, password: &str) -> AppResult<Token> {
        let cache_key = token_cache_key(username, password);

        if let Some(cache) = &self.cache {
            if let Some(token) = cache.get_json::<Token>(&cache_key).await {
                tracing::debug!("Using cached token for {}", username);
                return Ok(token);
            }
        }

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "password"),
                ("username", username),
                ("password", password),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", "openid profile email"),
            ])
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Identity provider error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!("Token request for {} rejected with {}", username, status);
            let body = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({ "detail": text }));
            return Err(AppError::AuthProvider { status, body });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::ExternalService(format!("Failed to parse token response: {}", e)))?;

        let token = Token {
            access_token: token.access_token,
            token_type: token.token_type,
            expires_in: token.expires_in,
        };

        if let Some(cache) = &self.cache {
            let ttl = match token.expires_in {
                0 => self.cache_ttl,
                expires_in => self.cache_ttl.min(expires_in),
            };
            cache.set_json(&cache_key, &token, ttl).await;
        }

        Ok(token)
    }

    /// Liveness and readiness of the provider.
    pub async fn healthy(&self) -> bool {
        for check in ["/-/health/live/", "/-/health/ready/"] {
            let url = format!("{}{}", self.base_url, check);
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    tracing::warn!("Identity provider health check {} returned {}", check, response.status());
                    return false;
                }
                Err(e) => {
                    tracing::warn!("Identity provider health check {} failed: {}", check, e);
                    return false;
                }
            }
        }
        true
    }
}

fn token_cache_key(username: &str, password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    format!("oidc_token:{}:{}", username, hex::encode(digest))
}
