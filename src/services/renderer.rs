use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};

/// Turns a report context into a finished PDF.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, kind: &str, report_id: &str, context: &Value) -> AppResult<Vec<u8>>;
}

#[derive(Clone)]
pub struct HttpRenderer {
    client: Client,
    base_url: String,
}

impl HttpRenderer {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ReportRenderer for HttpRenderer {
    async fn render(&self, kind: &str, report_id: &str, context: &Value) -> AppResult<Vec<u8>> {
        let response = self
            .client
            .post(format!("{}/render/{}", self.base_url, kind))
            .json(&json!({ "report_id": report_id, "context": context }))
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Renderer error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Renderer error {}: {}",
                status, body
            )));
        }

        let pdf = response
            .bytes()
            .await
            .map_err(|e| AppError::ExternalService(format!("Failed to read rendered report: {}", e)))?;

        tracing::info!("Rendered {} report {} ({} bytes)", kind, report_id, pdf.len());

        Ok(pdf.to_vec())
    }
}
