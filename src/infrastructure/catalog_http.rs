use crate::config::CatalogSettings;
use crate::domain::ports::{CatalogClient, ServiceDetails};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

/// Client for the sibling shop service.
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    http_client: Client,
    base_url: String,
    api_token: SecretString,
}

impl HttpCatalogClient {
    pub fn new(settings: &CatalogSettings) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
        })
    }
}

fn transport(e: reqwest::Error) -> GatewayError {
    GatewayError::Transport(e.to_string())
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn service_details(&self, service_id: Uuid) -> Result<Option<ServiceDetails>> {
        let response = self
            .http_client
            .get(format!("{}/service/{}", self.base_url, service_id))
            .bearer_auth(self.api_token.expose_secret())
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let details = response
            .error_for_status()
            .map_err(transport)?
            .json::<ServiceDetails>()
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        Ok(Some(details))
    }

    async fn mark_appointment_paid(&self, appointment_id: Uuid) -> Result<()> {
        self.http_client
            .patch(format!("{}/appointment/paid/{}", self.base_url, appointment_id))
            .bearer_auth(self.api_token.expose_secret())
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;
        Ok(())
    }
}
