use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::services::path::Location;

/// Source of camera detections for a plate.
#[async_trait]
pub trait DetectionWarehouse: Send + Sync {
    async fn positions(
        &self,
        plate: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<Location>>;
}

#[derive(Serialize)]
struct PositionsQuery<'a> {
    plate: &'a str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct PositionsResponse {
    locations: Vec<Location>,
}

/// Query gateway in front of the analytics warehouse.
#[derive(Clone)]
pub struct HttpWarehouse {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpWarehouse {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
        }
    }
}

#[async_trait]
impl DetectionWarehouse for HttpWarehouse {
    async fn positions(
        &self,
        plate: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<Location>> {
        let mut request = self
            .client
            .post(format!("{}/positions", self.base_url))
            .json(&PositionsQuery { plate, start, end });

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Warehouse error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Warehouse error {}: {}",
                status, body
            )));
        }

        let positions: PositionsResponse = response
            .json()
            .await
            .map_err(|e| AppError::ExternalService(format!("Failed to parse warehouse response: {}", e)))?;

        tracing::debug!("Warehouse returned {} positions for {}", positions.locations.len(), plate);

        Ok(positions.locations)
    }
}
