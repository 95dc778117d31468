use crate::adapters::{AssetSigner, CreativeSource};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::CreativeContent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Creative lookup backed by the local `creatives` table.
#[derive(Debug, Clone)]
pub struct DatabaseCreativeSource {
    db: Arc<Database>,
}

impl DatabaseCreativeSource {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CreativeSource for DatabaseCreativeSource {
    async fn get_creative(&self, creative_id: &str) -> AppResult<CreativeContent> {
        self.db
            .get_creative(creative_id)?
            .ok_or_else(|| AppError::NotFound(format!("creative {}", creative_id)))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    asset_ref: &'a str,
    ttl_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    url: String,
}

/// Asks a storage signing endpoint for a time-limited URL. Without an endpoint every
/// call fails with `NotConnected`.
#[derive(Debug, Clone)]
pub struct HttpAssetSigner {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl HttpAssetSigner {
    pub fn new(endpoint: Option<String>, api_key: Option<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {}", error)))?;
        Ok(Self {
            client,
            endpoint: endpoint.filter(|value| !value.trim().is_empty()),
            api_key,
        })
    }
}

#[async_trait]
impl AssetSigner for HttpAssetSigner {
    async fn sign(&self, asset_ref: &str, ttl_secs: u64) -> AppResult<String> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| AppError::NotConnected("asset signing endpoint is not configured".to_string()))?;

        let mut request = self.client.post(endpoint).json(&SignRequest {
            asset_ref,
            ttl_seconds: ttl_secs,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = format!("asset signing failed for {} with HTTP {}", asset_ref, status.as_u16());
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                AppError::RemoteTransient(message)
            } else {
                AppError::RemotePolicy(message)
            });
        }
        let body: SignResponse = response.json().await?;
        if !(body.url.starts_with("https://") || body.url.starts_with("http://")) {
            return Err(AppError::RemotePolicy(format!("signer returned a non-URL for {}", asset_ref)));
        }
        Ok(body.url)
    }
}
