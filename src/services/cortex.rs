use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::models::Registry;

/// Registration lookups (vehicles, people, companies), billed to the CPF of
/// the person asking.
#[async_trait]
pub trait RegistryLookup: Send + Sync {
    async fn lookup(&self, registry: Registry, key: &str, cpf: &str) -> AppResult<Value>;
}

#[derive(Clone)]
pub struct CortexClient {
    client: Client,
    vehicles_url: String,
    people_url: String,
    username: String,
    password: String,
}

impl CortexClient {
    pub fn new(vehicles_url: &str, people_url: &str, username: &str, password: &str) -> Self {
        Self {
            client: Client::new(),
            vehicles_url: vehicles_url.trim_end_matches('/').to_string(),
            people_url: people_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn url(&self, registry: Registry, key: &str) -> String {
        match registry {
            Registry::Plate => format!("{}/emplacamentos/placa/{}", self.vehicles_url, key),
            Registry::Person => format!("{}/pessoas/cpf/{}", self.people_url, key),
            Registry::Company => format!("{}/empresas/cnpj/{}", self.people_url, key),
        }
    }
}

#[async_trait]
impl RegistryLookup for CortexClient {
    async fn lookup(&self, registry: Registry, key: &str, cpf: &str) -> AppResult<Value> {
        let response = self
            .client
            .get(self.url(registry, key))
            .basic_auth(&self.username, Some(&self.password))
            .header("usuario", cpf)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Cortex API error: {}", e)))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| AppError::ExternalService(format!("Failed to parse Cortex response: {}", e))),
            StatusCode::NOT_FOUND => Err(AppError::NotFound(format!("{} not found", registry.subject()))),
            StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!("Cortex refused lookup of {} for legal reasons: {}", key, body);
                Err(AppError::LegalRestriction(
                    "Lookup refused by the registration service".to_string(),
                ))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AppError::ExternalService(format!(
                    "Cortex API error {}: {}",
                    status, body
                )))
            }
        }
    }
}
