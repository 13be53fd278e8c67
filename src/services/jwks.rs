use jsonwebtoken::{decode, decode_header, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use crate::middleware::auth::AuthFailure;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub use_: Option<String>,
    pub kid: String,
    pub n: String,
    pub e: String,
    pub alg: Option<String>,
}

/// Claims issued by the identity provider for API users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcClaims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    pub nickname: Option<String>,
    pub preferred_username: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    pub matricula: Option<String>,
    pub orgao: Option<String>,
    pub setor: Option<String>,
    pub cpf: Option<String>,
}

impl OidcClaims {
    pub fn username(&self) -> &str {
        self.nickname
            .as_deref()
            .or(self.preferred_username.as_deref())
            .unwrap_or(&self.sub)
    }
}

#[derive(Clone)]
struct CachedKey {
    key: DecodingKey,
    algorithm: Algorithm,
}

/// Shortest gap between two refreshes triggered by unknown key ids.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct JwksVerifier {
    client: Client,
    jwks_url: String,
    issuer: String,
    audience: String,
    keys: Arc<RwLock<HashMap<String, CachedKey>>>,
    last_refresh: Arc<Mutex<Option<Instant>>>,
    min_refresh_interval: Duration,
}

impl JwksVerifier {
    pub fn new(jwks_url: &str, issuer: &str, audience: &str) -> Self {
        Self {
            client: Client::new(),
            jwks_url: jwks_url.to_string(),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            keys: Arc::new(RwLock::new(HashMap::new())),
            last_refresh: Arc::new(Mutex::new(None)),
            min_refresh_interval: MIN_REFRESH_INTERVAL,
        }
    }

    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Fetch the provider's JWKS and cache the RSA keys
    pub async fn refresh_keys(&self) -> Result<usize, AuthFailure> {
        tracing::info!("Fetching JWKS from {}", self.jwks_url);

        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthFailure::Backend(format!("Failed to fetch JWKS: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthFailure::Backend(format!(
                "JWKS fetch failed {}: {}",
                status, body
            )));
        }

        let jwks: JwksResponse = response
            .json()
            .await
            .map_err(|e| AuthFailure::Backend(format!("Failed to parse JWKS: {}", e)))?;

        let mut keys = self.keys.write().await;
        keys.clear();

        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                continue;
            }

            let algorithm = jwk
                .alg
                .as_deref()
                .and_then(|alg| alg.parse().ok())
                .unwrap_or(Algorithm::RS256);

            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    tracing::debug!("Cached JWKS key: {}", jwk.kid);
                    keys.insert(jwk.kid.clone(), CachedKey { key, algorithm });
                }
                Err(e) => {
                    tracing::warn!("Failed to parse JWK {}: {}", jwk.kid, e);
                }
            }
        }

        tracing::info!("Cached {} JWKS keys", keys.len());
        Ok(keys.len())
    }

    /// Verify a JWT and return its claims.
    ///
    /// An unknown `kid` triggers a JWKS refresh, which covers provider key rotation.
    /// Such refreshes are spaced at least `min_refresh_interval` apart.
    pub async fn verify_token(&self, token: &str) -> Result<OidcClaims, AuthFailure> {
        let header = decode_header(token)
            .map_err(|_| AuthFailure::InvalidToken("Unable to parse JWT header".to_string()))?;

        let kid = header.kid.ok_or_else(|| {
            AuthFailure::InvalidToken("The JWT header is missing the 'kid' field".to_string())
        })?;

        let cached = self.keys.read().await.get(&kid).cloned();
        let cached = match cached {
            Some(cached) => cached,
            None => {
                self.refresh_for_unknown_kid(&kid).await?;
                self.keys.read().await.get(&kid).cloned().ok_or_else(|| {
                    AuthFailure::InvalidToken("Unable to find a valid RSA key".to_string())
                })?
            }
        };

        let mut validation = Validation::new(cached.algorithm);
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        decode::<OidcClaims>(token, &cached.key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthFailure::Expired,
                ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => AuthFailure::InvalidToken(
                    "Incorrect claims, please check the audience and issuer".to_string(),
                ),
                _ => AuthFailure::InvalidToken("Unable to parse JWT token".to_string()),
            })
    }

    async fn refresh_for_unknown_kid(&self, kid: &str) -> Result<(), AuthFailure> {
        // Held across the fetch so concurrent misses share one request.
        let mut last = self.last_refresh.lock().await;

        if let Some(at) = *last {
            if at.elapsed() < self.min_refresh_interval {
                tracing::debug!("Unknown key ID {}, JWKS refreshed recently", kid);
                return Ok(());
            }
        }

        tracing::debug!("Unknown key ID {}, refreshing JWKS", kid);
        *last = Some(Instant::now());
        self.refresh_keys().await.map(|_| ())
    }

    /// Prime the key cache (call on startup)
    pub async fn initialize(&self) -> Result<usize, AuthFailure> {
        self.refresh_keys().await
    }
}
