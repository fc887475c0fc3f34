//! Secondary pinning service
//!
//! After a successful add the content identifier can be pinned on a hosted
//! pinning service (Pinata's pin-by-hash API). This is best effort only.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::errors::RemoteError;
use crate::config::PinningConfig;

#[async_trait]
pub trait Pinner: Send + Sync {
    async fn pin(&self, cid: &str) -> Result<(), RemoteError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PinByHashRequest<'a> {
    hash_to_pin: &'a str,
    pinata_metadata: PinMetadata,
}

#[derive(Debug, Serialize)]
struct PinMetadata {
    name: String,
}

/// Pinata pin-by-hash client
pub struct PinataPinner {
    http_client: Client,
    endpoint: String,
    api_key: String,
    secret_key: String,
}

impl PinataPinner {
    /// Build a pinner when the config is enabled and carries both keys
    pub fn from_config(config: &PinningConfig, timeout: Duration) -> Option<Self> {
        if !config.is_active() {
            return None;
        }
        let http_client = Client::builder().timeout(timeout).build().ok()?;

        Some(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone()?,
            secret_key: config.secret_key.clone()?,
        })
    }
}

#[async_trait]
impl Pinner for PinataPinner {
    async fn pin(&self, cid: &str) -> Result<(), RemoteError> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let request = PinByHashRequest {
            hash_to_pin: cid,
            pinata_metadata: PinMetadata {
                name: format!("resilient-ipfs-{}", millis),
            },
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("pinata_api_key", &self.api_key)
            .header("pinata_secret_api_key", &self.secret_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status, &body));
        }

        debug!(cid = cid, "Pinned on secondary service");
        Ok(())
    }
}
